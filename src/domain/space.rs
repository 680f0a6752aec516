use super::bc::{BcType, BoundaryConditions};
use super::mesh::elem::{Point, Rect, Side, VertexKey};
use super::mesh::h_refinement::{HRef, HRefError};
use super::mesh::p_refinement::{check_order, PRefError};
use super::mesh::topology::Topology;
use super::mesh::{Mesh, MAX_POLYNOMIAL_ORDER};
use crate::basis::lagrange_basis;

use smallvec::{smallvec, SmallVec};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Constraint coefficients smaller than this are treated as roundoff and dropped
const COEFF_TOLERANCE: f64 = 1e-13;

/// An affine combination of global degrees of freedom: `constant + sum(c_i * u[dof_i])`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinComb {
    pub terms: SmallVec<[(usize, f64); 4]>,
    pub constant: f64,
}

impl LinComb {
    /// A single free degree of freedom
    pub fn dof(id: usize) -> Self {
        Self {
            terms: smallvec![(id, 1.0)],
            constant: 0.0,
        }
    }

    /// A fixed value (essential boundary node)
    pub fn fixed(value: f64) -> Self {
        Self {
            terms: SmallVec::new(),
            constant: value,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.terms.is_empty()
    }

    /// `self += scale * other`
    pub fn add_scaled(&mut self, other: &Self, scale: f64) {
        for (id, c) in other.terms.iter() {
            match self.terms.iter_mut().find(|(t_id, _)| t_id == id) {
                Some(term) => term.1 += c * scale,
                None => self.terms.push((*id, c * scale)),
            }
        }
        self.constant += other.constant * scale;
    }

    /// Evaluate against a vector of global coefficients
    pub fn evaluate(&self, coefficients: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|(id, c)| c * coefficients[*id])
            .sum::<f64>()
            + self.constant
    }

    fn pruned(mut self) -> Self {
        self.terms.retain(|(_, c)| c.abs() > COEFF_TOLERANCE);
        self.terms.sort_by_key(|(id, _)| *id);
        self
    }
}

/// The nodal values of a leaf expressed through the global degrees of freedom
///
/// Nodes sit on the tensor-product GLL grid of the leaf's order and are indexed as `[j * (order + 1) + i]`
#[derive(Clone, Debug)]
pub struct LocalMap {
    pub order: u8,
    pub nodes: Vec<LinComb>,
}

impl LocalMap {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodal values of the leaf for some vector of global coefficients
    pub fn local_values(&self, coefficients: &[f64]) -> Vec<f64> {
        self.nodes
            .iter()
            .map(|node| node.evaluate(coefficients))
            .collect()
    }
}

/// A change to a single leaf of the Mesh
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Refinement {
    /// Set the polynomial order of the leaf
    P(u8),
    /// Split the leaf, giving each child (in child-index order) its own polynomial order
    H(HRef, SmallVec<[u8; 4]>),
}

#[derive(Debug, thiserror::Error)]
pub enum SpaceError {
    #[error("hanging-node constraints form a cycle through the vertex at {0}")]
    CyclicConstraints(Point),
    #[error("inconsistent mesh topology: {0}")]
    Topology(String),
    #[error("refinement of elem {0} lists the wrong number of child orders")]
    ChildOrders(usize),
    #[error(transparent)]
    HRefinement(#[from] HRefError),
    #[error(transparent)]
    PRefinement(#[from] PRefError),
}

/// A continuous, piecewise polynomial approximation space over the leaves of a [Mesh]
///
/// Each leaf carries a tensor-product Lagrange expansion of its own order. Traces along master edges follow the
/// minimum rule, hanging vertices and slave sides are constrained to the polynomial of their master edge, and
/// nodes on essential boundaries are fixed by interpolating the boundary value.
#[derive(Clone, Debug)]
pub struct Space {
    mesh: Mesh,
    bcs: Arc<dyn BoundaryConditions>,
    topology: Topology,
    edge_orders: Vec<u8>,
    local_maps: BTreeMap<usize, LocalMap>,
    num_dofs: usize,
}

impl Space {
    /// Build a Space over the leaves of a Mesh and assign its degrees of freedom
    pub fn new(mesh: Mesh, bcs: Arc<dyn BoundaryConditions>) -> Result<Self, SpaceError> {
        let topology = Topology::analyze(&mesh);
        let assignment = DofAssignment::build(&mesh, bcs.as_ref(), &topology)?;

        Ok(Self {
            mesh,
            bcs,
            topology,
            edge_orders: assignment.edge_orders,
            local_maps: assignment.local_maps,
            num_dofs: assignment.num_dofs,
        })
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn bcs(&self) -> &Arc<dyn BoundaryConditions> {
        &self.bcs
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Number of free (global) degrees of freedom
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn local_map(&self, elem_id: usize) -> Option<&LocalMap> {
        self.local_maps.get(&elem_id)
    }

    /// Iterate over the leaves and their local maps (in ascending id order)
    pub fn local_maps(&self) -> impl Iterator<Item = (usize, &LocalMap)> + '_ {
        self.local_maps.iter().map(|(id, map)| (*id, map))
    }

    /// Polynomial order of every leaf
    pub fn orders(&self) -> BTreeMap<usize, u8> {
        self.mesh.leaves().map(|elem| (elem.id, elem.order)).collect()
    }

    /// Polynomial order of the trace along a master edge
    pub fn edge_order(&self, edge_id: usize) -> u8 {
        self.edge_orders[edge_id]
    }

    /// The leaf whose rectangle contains a point (the lowest id wins on shared boundaries)
    pub fn leaf_containing(&self, point: &Point) -> Option<usize> {
        self.mesh
            .leaves()
            .find(|elem| {
                elem.rect.x[0] <= point.x
                    && point.x <= elem.rect.x[1]
                    && elem.rect.y[0] <= point.y
                    && point.y <= elem.rect.y[1]
            })
            .map(|elem| elem.id)
    }

    /// The reference space: every leaf is split isotropically and the order is raised by one (up to [MAX_POLYNOMIAL_ORDER])
    pub fn reference_space(&self) -> Result<Self, SpaceError> {
        let mut mesh = self.mesh.clone();
        mesh.global_h_refinement(HRef::T)?;

        let orders = mesh
            .leaves()
            .map(|elem| (elem.id, (elem.order + 1).min(MAX_POLYNOMIAL_ORDER)))
            .collect();
        mesh.set_expansion_orders(orders)?;

        Self::new(mesh, self.bcs.clone())
    }

    /// Apply a batch of leaf refinements, restore the hanging-node bound (if one is given), and reassign the DOFs.
    ///
    /// The Space is unchanged if any part of the batch is rejected. Returns the number of extra refinements which
    /// were needed to restore regularity.
    pub fn apply_refinements(
        &mut self,
        refinements: &[(usize, Refinement)],
        regularity: Option<u8>,
    ) -> Result<usize, SpaceError> {
        let mut mesh = self.mesh.clone();

        let mut h_refinements = Vec::new();
        let mut orders = Vec::new();
        for (elem_id, refinement) in refinements {
            match refinement {
                Refinement::P(order) => orders.push((*elem_id, check_order(*order)?)),
                Refinement::H(href, child_orders) => {
                    if child_orders.len() != href.num_children() {
                        return Err(SpaceError::ChildOrders(*elem_id));
                    }
                    for order in child_orders.iter() {
                        check_order(*order)?;
                    }
                    h_refinements.push((*elem_id, *href));
                }
            }
        }

        mesh.execute_h_refinements(h_refinements)?;

        for (elem_id, refinement) in refinements {
            if let Refinement::H(_, child_orders) = refinement {
                let child_ids = mesh.elems[*elem_id].child_ids().unwrap_or_default();
                orders.extend(child_ids.into_iter().zip(child_orders.iter().copied()));
            }
        }
        mesh.set_expansion_orders(orders)?;

        let extra = match regularity {
            Some(bound) => mesh.enforce_regularity(bound)?,
            None => 0,
        };

        *self = Self::new(mesh, self.bcs.clone())?;
        Ok(extra)
    }

    /// Is this Space an h/p refinement of another: every leaf of `coarse` still exists here with the same geometry,
    /// and is covered by leaves whose orders are at least as large
    pub fn is_refinement_of(&self, coarse: &Self) -> bool {
        coarse.mesh.leaves().all(|c_leaf| match self.mesh.elems.get(c_leaf.id) {
            Some(elem) if elem.rect == c_leaf.rect => self
                .mesh
                .leaf_descendants(c_leaf.id)
                .map(|ids| ids.iter().all(|id| self.mesh.elems[*id].order >= c_leaf.order))
                .unwrap_or(false),
            _ => false,
        })
    }
}

// Issues consecutive ids
struct IdTracker {
    next_id: usize,
}

impl IdTracker {
    fn new(start: usize) -> Self {
        Self { next_id: start }
    }

    fn next_id(&mut self) -> usize {
        self.next_id += 1;
        self.next_id - 1
    }
}

enum VertexState {
    Resolving,
    Resolved(LinComb),
}

/// Working state for numbering the degrees of freedom of a Space
struct DofAssignment {
    edge_orders: Vec<u8>,
    local_maps: BTreeMap<usize, LocalMap>,
    num_dofs: usize,
}

impl DofAssignment {
    fn build(mesh: &Mesh, bcs: &dyn BoundaryConditions, topo: &Topology) -> Result<Self, SpaceError> {
        // minimum rule: the trace order of a master edge is the smallest order among the leaves touching it
        let edge_orders: Vec<u8> = topo
            .edges
            .iter()
            .map(|edge| {
                edge.adjacent_sides()
                    .map(|(elem_id, _)| mesh.elems[elem_id].order)
                    .min()
                    .unwrap_or(1)
            })
            .collect();

        let essential_marker = |marker: Option<u32>| {
            marker.filter(|m| bcs.classify(*m) == BcType::Essential)
        };

        // every leaf corner, and the essential marker touching it (if any)
        let mut vertices: BTreeMap<VertexKey, Point> = BTreeMap::new();
        for leaf in mesh.leaves() {
            for corner in leaf.rect.corners() {
                vertices.insert(corner.key(), corner);
            }
        }
        let mut vertex_markers: HashMap<VertexKey, u32> = HashMap::new();
        for edge in topo.edges.iter() {
            if let Some(marker) = essential_marker(edge.marker) {
                for end in edge.endpoints() {
                    vertex_markers.entry(end.key()).or_insert(marker);
                }
            }
        }

        let mut dof_ids = IdTracker::new(0);

        // regular vertices
        let mut vertex_values: HashMap<VertexKey, VertexState> = HashMap::new();
        for (key, point) in vertices.iter() {
            if topo.hanging_vertex(point).is_none() {
                let value = match vertex_markers.get(key) {
                    Some(marker) => LinComb::fixed(bcs.value(*marker, point.x, point.y)),
                    None => LinComb::dof(dof_ids.next_id()),
                };
                vertex_values.insert(*key, VertexState::Resolved(value));
            }
        }

        // master edge interiors
        let edge_interiors: Vec<Vec<LinComb>> = topo
            .edges
            .iter()
            .zip(edge_orders.iter())
            .map(|(edge, order)| {
                let nodes = &lagrange_basis(*order).nodes;
                nodes[1..nodes.len() - 1]
                    .iter()
                    .map(|t| match essential_marker(edge.marker) {
                        Some(marker) => {
                            let p = edge.point_at(*t);
                            LinComb::fixed(bcs.value(marker, p.x, p.y))
                        }
                        None => LinComb::dof(dof_ids.next_id()),
                    })
                    .collect()
            })
            .collect();

        // hanging vertices are evaluated on their master edge
        let mut resolver = ConstraintResolver {
            topo,
            edge_orders: &edge_orders,
            edge_interiors: &edge_interiors,
            vertices: vertex_values,
        };
        for point in vertices.values() {
            resolver.resolve(point)?;
        }

        // full nodal values of each master edge: [start, interior.., end]
        let edge_values: Vec<Vec<LinComb>> = topo
            .edges
            .iter()
            .zip(edge_interiors.iter())
            .map(|(edge, interior)| {
                let [start, end] = edge.endpoints();
                let mut values = Vec::with_capacity(interior.len() + 2);
                values.push(resolver.resolve(&start)?);
                values.extend(interior.iter().cloned());
                values.push(resolver.resolve(&end)?);
                Ok(values)
            })
            .collect::<Result<_, SpaceError>>()?;

        // element interiors
        let mut local_maps = BTreeMap::new();
        for leaf in mesh.leaves() {
            let links = topo.side_links(leaf.id).ok_or_else(|| {
                SpaceError::Topology(format!("leaf {} has no side links", leaf.id))
            })?;

            let p = leaf.order as usize;
            let basis = lagrange_basis(leaf.order);
            let mut nodes = Vec::with_capacity((p + 1) * (p + 1));

            for j in 0..=p {
                for i in 0..=p {
                    let point = node_location(&leaf.rect, &basis.nodes, i, j);
                    let on_x_bound = i == 0 || i == p;
                    let on_y_bound = j == 0 || j == p;

                    let value = match (on_x_bound, on_y_bound) {
                        (true, true) => resolver.resolve(&point)?,
                        (false, false) => LinComb::dof(dof_ids.next_id()),
                        (false, true) | (true, false) => {
                            let side = match (i, j) {
                                (_, 0) => Side::S,
                                (0, _) => Side::W,
                                _ if j == p => Side::N,
                                _ => Side::E,
                            };
                            let edge_id = links[side.index()].edge_id();
                            edge_trace(
                                edge_orders[edge_id],
                                &edge_values[edge_id],
                                topo.edges[edge_id].param_of(&point),
                            )
                        }
                    };
                    nodes.push(value);
                }
            }

            local_maps.insert(
                leaf.id,
                LocalMap {
                    order: leaf.order,
                    nodes,
                },
            );
        }

        Ok(Self {
            edge_orders,
            local_maps,
            num_dofs: dof_ids.next_id,
        })
    }
}

/// Resolves the value of (possibly chained) hanging vertices
struct ConstraintResolver<'a> {
    topo: &'a Topology,
    edge_orders: &'a [u8],
    edge_interiors: &'a [Vec<LinComb>],
    vertices: HashMap<VertexKey, VertexState>,
}

impl<'a> ConstraintResolver<'a> {
    fn resolve(&mut self, point: &Point) -> Result<LinComb, SpaceError> {
        let key = point.key();
        match self.vertices.get(&key) {
            Some(VertexState::Resolved(value)) => return Ok(value.clone()),
            Some(VertexState::Resolving) => return Err(SpaceError::CyclicConstraints(*point)),
            None => (),
        }

        let hanging = self.topo.hanging_vertex(point).ok_or_else(|| {
            SpaceError::Topology(format!("vertex {} is neither regular nor hanging", point))
        })?;
        self.vertices.insert(key, VertexState::Resolving);

        let edge = &self.topo.edges[hanging.edge_id];
        let [start, end] = edge.endpoints();
        let mut edge_values = Vec::with_capacity(self.edge_interiors[hanging.edge_id].len() + 2);
        edge_values.push(self.resolve(&start)?);
        edge_values.extend(self.edge_interiors[hanging.edge_id].iter().cloned());
        edge_values.push(self.resolve(&end)?);

        let value = edge_trace(self.edge_orders[hanging.edge_id], &edge_values, hanging.t);
        self.vertices
            .insert(key, VertexState::Resolved(value.clone()));
        Ok(value)
    }
}

/// Value of a master edge polynomial at parametric position `t`
fn edge_trace(order: u8, edge_values: &[LinComb], t: f64) -> LinComb {
    let weights = lagrange_basis(order).values(t);
    let mut value = LinComb::default();
    for (w, edge_value) in weights.iter().zip(edge_values.iter()) {
        if w.abs() > COEFF_TOLERANCE {
            value.add_scaled(edge_value, *w);
        }
    }
    value.pruned()
}

/// Real location of the `(i, j)`th GLL node on a rectangle (bit-exact at the corners)
fn node_location(rect: &Rect, nodes: &[f64], i: usize, j: usize) -> Point {
    let last = nodes.len() - 1;
    let map = |range: [f64; 2], k: usize| {
        if k == 0 {
            range[0]
        } else if k == last {
            range[1]
        } else {
            range[0] + (nodes[k] + 1.0) / 2.0 * (range[1] - range[0])
        }
    };
    Point::new(map(rect.x, i), map(rect.y, j))
}

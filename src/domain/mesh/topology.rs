use super::elem::{Orientation, Point, Side, VertexKey};
use super::Mesh;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};

/// A maximal straight side of some leaf Elems.
///
/// Master edges are either shared exactly by two leaves (conforming), lie on the domain boundary (one leaf),
/// or are the long side of a leaf whose neighbors across the edge are smaller ("slaves").
/// The trace of the approximation along a master edge is a single polynomial.
#[derive(Clone, Debug)]
pub struct MasterEdge {
    pub id: usize,
    pub orientation: Orientation,
    /// `y` for horizontal edges, `x` for vertical edges
    pub coord: f64,
    /// extent along the line
    pub range: [f64; 2],
    /// leaf sides which span exactly this edge
    pub owners: SmallVec<[(usize, Side); 2]>,
    /// leaf sides lying strictly within this edge, with their hanging-node depth
    pub slaves: SmallVec<[(usize, Side, u8); 4]>,
    /// boundary marker if the edge lies on the domain boundary
    pub marker: Option<u32>,
}

impl MasterEdge {
    pub fn length(&self) -> f64 {
        self.range[1] - self.range[0]
    }

    /// Position along the edge in `[-1, 1]` of a point on its line
    pub fn param_of(&self, point: &Point) -> f64 {
        let s = match self.orientation {
            Orientation::Horizontal => point.x,
            Orientation::Vertical => point.y,
        };
        2.0 * (s - self.range[0]) / self.length() - 1.0
    }

    /// The point at parametric position `t` in `[-1, 1]`
    pub fn point_at(&self, t: f64) -> Point {
        let s = self.range[0] + (t + 1.0) / 2.0 * self.length();
        match self.orientation {
            Orientation::Horizontal => Point::new(s, self.coord),
            Orientation::Vertical => Point::new(self.coord, s),
        }
    }

    pub fn endpoints(&self) -> [Point; 2] {
        [self.point_at(-1.0), self.point_at(1.0)]
    }

    /// Every leaf side touching this edge
    pub fn adjacent_sides(&self) -> impl Iterator<Item = (usize, Side)> + '_ {
        self.owners
            .iter()
            .copied()
            .chain(self.slaves.iter().map(|(elem_id, side, _)| (*elem_id, *side)))
    }
}

/// How a leaf side connects to the master edges
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SideLink {
    /// The side is (one of the) owners of the master edge
    Master(usize),
    /// The side lies strictly within the master edge
    Slave(usize),
}

impl SideLink {
    pub fn edge_id(&self) -> usize {
        match self {
            Self::Master(id) | Self::Slave(id) => *id,
        }
    }
}

/// A vertex lying strictly inside a master edge
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HangingVertex {
    pub edge_id: usize,
    /// parametric position along the master edge
    pub t: f64,
}

/// The connectivity of the leaves of a [Mesh]: master edges, slave sides and hanging vertices
#[derive(Clone, Debug)]
pub struct Topology {
    pub edges: Vec<MasterEdge>,
    sides: BTreeMap<usize, [SideLink; 4]>,
    hanging: HashMap<VertexKey, HangingVertex>,
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    elem_id: usize,
    side: Side,
    range: [f64; 2],
}

impl Segment {
    fn length(&self) -> f64 {
        self.range[1] - self.range[0]
    }

    fn strictly_within(&self, other: &Self) -> bool {
        other.range[0] <= self.range[0]
            && self.range[1] <= other.range[1]
            && other.length() > self.length()
    }
}

impl Topology {
    /// Find the master edges, slave sides, and hanging vertices among the leaves of a Mesh
    pub fn analyze(mesh: &Mesh) -> Self {
        // group the sides of every leaf by the line they lie on
        let mut lines: BTreeMap<(Orientation, u64), (f64, Vec<Segment>)> = BTreeMap::new();
        for leaf in mesh.leaves() {
            for side in Side::ALL {
                let (orientation, coord, range) = leaf.rect.side_geometry(side);
                lines
                    .entry((orientation, (coord + 0.0).to_bits()))
                    .or_insert_with(|| (coord, Vec::new()))
                    .1
                    .push(Segment {
                        elem_id: leaf.id,
                        side,
                        range,
                    });
            }
        }

        let mut edges: Vec<MasterEdge> = Vec::new();
        let mut sides: BTreeMap<usize, [Option<SideLink>; 4]> = BTreeMap::new();
        let mut hanging = HashMap::new();

        for ((orientation, _), (coord, mut segments)) in lines {
            segments.sort_by(|a, b| {
                a.range[0]
                    .total_cmp(&b.range[0])
                    .then(a.elem_id.cmp(&b.elem_id))
            });

            // the segment on the opposite side of the line which strictly contains each segment (if any)
            let containers: Vec<Option<usize>> = segments
                .iter()
                .map(|s| {
                    segments
                        .iter()
                        .position(|t| t.side == s.side.opposite() && s.strictly_within(t))
                })
                .collect();

            // masters are all segments without a container; conforming pairs share one edge
            let mut edge_by_range: BTreeMap<[u64; 2], usize> = BTreeMap::new();
            for (s, _) in segments
                .iter()
                .zip(containers.iter())
                .filter(|(_, container)| container.is_none())
            {
                let range_key = [s.range[0].to_bits(), s.range[1].to_bits()];
                let edge_id = *edge_by_range.entry(range_key).or_insert_with(|| {
                    edges.push(MasterEdge {
                        id: edges.len(),
                        orientation,
                        coord,
                        range: s.range,
                        owners: SmallVec::new(),
                        slaves: SmallVec::new(),
                        marker: None,
                    });
                    edges.len() - 1
                });

                edges[edge_id].owners.push((s.elem_id, s.side));
                sides.entry(s.elem_id).or_insert([None; 4])[s.side.index()] =
                    Some(SideLink::Master(edge_id));
            }

            for (s, container) in segments.iter().zip(containers.iter()) {
                if let Some(t_idx) = container {
                    let t = &segments[*t_idx];
                    let edge_id = edge_by_range[&[t.range[0].to_bits(), t.range[1].to_bits()]];
                    let depth = (t.length() / s.length()).log2().round() as u8;

                    edges[edge_id].slaves.push((s.elem_id, s.side, depth));
                    sides.entry(s.elem_id).or_insert([None; 4])[s.side.index()] =
                        Some(SideLink::Slave(edge_id));

                    let edge = &edges[edge_id];
                    for end in s.range {
                        if end > edge.range[0] && end < edge.range[1] {
                            let point = match orientation {
                                Orientation::Horizontal => Point::new(end, coord),
                                Orientation::Vertical => Point::new(coord, end),
                            };
                            hanging.insert(
                                point.key(),
                                HangingVertex {
                                    edge_id,
                                    t: edge.param_of(&point),
                                },
                            );
                        }
                    }
                }
            }
        }

        // boundary markers live on edges with a single owner and no slaves
        for edge in edges.iter_mut() {
            if edge.owners.len() == 1 && edge.slaves.is_empty() {
                let (elem_id, side) = edge.owners[0];
                edge.marker = mesh.elems[elem_id].boundary_marker(side);
            }
        }

        let sides = sides
            .into_iter()
            .map(|(elem_id, links)| {
                (
                    elem_id,
                    links.map(|link| {
                        link.expect("every side of a leaf is visited while grouping lines")
                    }),
                )
            })
            .collect();

        Self {
            edges,
            sides,
            hanging,
        }
    }

    /// The connection of each side of a leaf to the master edges (indexed by `Side::index`)
    pub fn side_links(&self, elem_id: usize) -> Option<&[SideLink; 4]> {
        self.sides.get(&elem_id)
    }

    /// Is the vertex at some point hanging on a master edge
    pub fn hanging_vertex(&self, point: &Point) -> Option<HangingVertex> {
        self.hanging.get(&point.key()).copied()
    }

    pub fn num_hanging_vertices(&self) -> usize {
        self.hanging.len()
    }

    /// The largest hanging-node depth among the sides of a leaf (0 if it has no constrained sides)
    pub fn hanging_depth(&self, elem_id: usize) -> u8 {
        self.sides
            .get(&elem_id)
            .map(|links| {
                links
                    .iter()
                    .filter_map(|link| match link {
                        SideLink::Slave(edge_id) => self.edges[*edge_id]
                            .slaves
                            .iter()
                            .find(|(slave_id, _, _)| *slave_id == elem_id)
                            .map(|(_, _, depth)| *depth),
                        SideLink::Master(_) => None,
                    })
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    /// The largest hanging-node depth in the mesh
    pub fn max_hanging_depth(&self) -> u8 {
        self.edges
            .iter()
            .flat_map(|edge| edge.slaves.iter().map(|(_, _, depth)| *depth))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::h_refinement::HRef;

    #[test]
    fn conforming_mesh_has_no_hanging_vertices() {
        let mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        let topo = Topology::analyze(&mesh);

        // 12 distinct sides in a 2x2 grid
        assert_eq!(topo.edges.len(), 12);
        assert_eq!(topo.num_hanging_vertices(), 0);
        assert_eq!(topo.max_hanging_depth(), 0);
        assert_eq!(topo.edges.iter().filter(|e| e.marker.is_some()).count(), 8);
        assert_eq!(topo.edges.iter().filter(|e| e.owners.len() == 2).count(), 4);
    }

    #[test]
    fn single_refinement_creates_hanging_vertices() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        let topo = Topology::analyze(&mesh);

        // midpoints of elem 0's interior sides hang on the sides of elems 1 and 2
        assert_eq!(topo.num_hanging_vertices(), 2);
        assert_eq!(topo.max_hanging_depth(), 1);

        let hv = topo.hanging_vertex(&Point::new(0.5, 0.25)).unwrap();
        assert!(hv.t.abs() < 1e-15);
        let edge = &topo.edges[hv.edge_id];
        assert_eq!(edge.owners.len(), 1);
        assert_eq!(edge.slaves.len(), 2);
        assert_eq!(edge.owners[0].0, 1);

        for child in mesh.elems[0].child_ids().unwrap() {
            assert!(topo.side_links(child).is_some());
        }
        assert_eq!(topo.hanging_depth(1), 0);
    }

    #[test]
    fn nested_refinements_increase_depth() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        // refine the north east child of elem 0 again
        let ne = mesh.elems[0].child_ids().unwrap()[3];
        mesh.h_refine_elems(vec![ne], HRef::T).unwrap();

        let topo = Topology::analyze(&mesh);
        assert_eq!(topo.max_hanging_depth(), 2);

        let deepest = mesh.elems[ne].child_ids().unwrap()[3];
        assert_eq!(topo.hanging_depth(deepest), 2);
    }
}

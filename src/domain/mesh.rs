/// An axis aligned rectangular Finite Element and its geometric primitives
pub mod elem;
/// Structures and Functions to facilitate isotropic and anisotropic h-refinement
pub mod h_refinement;
/// Structures and Functions to facilitate p-refinement
pub mod p_refinement;
/// Master edges, slave sides, and hanging vertices among the leaves of a Mesh
pub mod topology;

use elem::{Elem, Point, Rect, Side};
use h_refinement::{HRef, HRefError};
use p_refinement::{check_order, PRef, PRefError};
use topology::Topology;

#[cfg(feature = "json_export")]
use json::object;
use json::JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::read_to_string;
#[cfg(feature = "json_export")]
use std::fs::File;
#[cfg(feature = "json_export")]
use std::io::BufWriter;
use std::path::Path;

/// Maximum number of bisections in either direction. h-Refinements will fail past this depth.
pub const MAX_H_LEVEL: u8 = 24;

/// Maximum Polynomial expansion. p-Refinements will fail when Elem's expansion orders exceed this value.
pub const MAX_POLYNOMIAL_ORDER: u8 = 10;

/// Boundary marker given to boundary edges which are not listed in a mesh file
pub const DEFAULT_BOUNDARY_MARKER: u32 = 0;

/// Information used to Define the geometric structure and refinement state of a Domain.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elems: Vec<Elem>,
    pub nodes: Vec<Point>,
}

impl Mesh {
    /// Construct a Mesh from a JSON file with the following format
    ///
    /// The first "Element" and "Node" describe the meaning of each variable
    ///
    /// The following entries in each array describe this two element mesh:
    /// ```text
    ///     3               4               5
    /// 0.5 *---------------*---------------*
    ///     |               |               |
    ///     |               |               |
    ///     |               |               |
    /// 0.0 *---------------*---------------*
    ///  y  0               1               2
    ///  x 0.0             1.0             2.0
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         {
    ///             "node_ids": [node_0_id, node_1_id, node_2_id, node_3_id],
    ///         },
    ///         {
    ///             "node_ids": [0, 1, 3, 4],
    ///         },
    ///         {
    ///             "node_ids": [1, 2, 4, 5],
    ///         }
    ///     ],
    ///     "Nodes": [
    ///         [x_coordinate, y_coordinate],
    ///         [0.0, 0.0],
    ///         [1.0, 0.0],
    ///         [2.0, 0.0],
    ///         [0.0, 0.5],
    ///         [1.0, 0.5],
    ///         [2.0, 0.5],
    ///     ],
    ///     "Boundaries": [
    ///         {
    ///             "node_ids": [node_a_id, node_b_id],
    ///             "marker": marker,
    ///         },
    ///         {
    ///             "node_ids": [2, 5],
    ///             "marker": 2,
    ///         }
    ///     ]
    /// }
    /// ```
    ///
    /// Elements must be axis aligned rectangles with their nodes listed in the order `[SW, SE, NW, NE]`.
    /// Boundary edges which are not listed in "Boundaries" are given [DEFAULT_BOUNDARY_MARKER].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, MeshLoadError> {
        let contents = read_to_string(path.as_ref()).map_err(|err| MeshLoadError::Io {
            path: path.as_ref().display().to_string(),
            source: err,
        })?;
        Self::from_json_str(&contents)
    }

    /// Construct a Mesh from the contents of a JSON mesh file (see [Mesh::from_file])
    pub fn from_json_str(contents: &str) -> Result<Self, MeshLoadError> {
        let mesh_file_json =
            json::parse(contents).map_err(|err| MeshLoadError::Json(err.to_string()))?;

        let points = parse_node_information(&mesh_file_json)?;
        let element_node_ids = parse_element_information(&mesh_file_json, points.len())?;
        let boundaries = parse_boundary_information(&mesh_file_json, points.len())?;

        Self::from_parts(points, element_node_ids, boundaries)
    }

    /// Construct a Mesh from a list of points, sets of 4 node ids (`[SW, SE, NW, NE]`), and boundary edge markers
    pub fn from_parts(
        points: Vec<Point>,
        element_node_ids: Vec<[usize; 4]>,
        boundaries: Vec<([usize; 2], u32)>,
    ) -> Result<Self, MeshLoadError> {
        if element_node_ids.is_empty() {
            return Err(MeshLoadError::Empty);
        }
        if has_duplicates(&points) {
            return Err(MeshLoadError::DuplicateNodes);
        }

        // build rectangles from each set of node ids
        let rects = element_node_ids
            .iter()
            .enumerate()
            .map(|(element_id, node_ids)| {
                if node_ids.iter().any(|id| *id >= points.len()) {
                    return Err(MeshLoadError::BadElement(
                        element_id,
                        String::from("node_ids must be smaller than the total number of nodes"),
                    ));
                }
                if has_duplicates(node_ids) {
                    return Err(MeshLoadError::BadElement(
                        element_id,
                        String::from("node_ids should have 4 unique values"),
                    ));
                }

                let [sw, se, nw, ne] = node_ids.map(|id| points[id]);
                let axis_aligned =
                    sw.y == se.y && nw.y == ne.y && sw.x == nw.x && se.x == ne.x;
                let rect = Rect::new([sw.x, ne.x], [sw.y, ne.y]);

                if !axis_aligned || rect.is_degenerate() {
                    Err(MeshLoadError::BadElement(
                        element_id,
                        String::from("elements must be non-degenerate axis aligned rectangles with nodes ordered [SW, SE, NW, NE]"),
                    ))
                } else {
                    Ok(rect)
                }
            })
            .collect::<Result<Vec<Rect>, MeshLoadError>>()?;

        // build a map which describes all the edges and which element sides are adjacent to them
        // {[node_id_0, node_id_1] => [(element_id, Side)]}
        let mut edge_sides: BTreeMap<[usize; 2], Vec<(usize, Side)>> = BTreeMap::new();
        for (element_id, node_ids) in element_node_ids.iter().enumerate() {
            for side in Side::ALL {
                edge_sides
                    .entry(edge_key(side_node_ids(node_ids, side)))
                    .or_default()
                    .push((element_id, side));
            }
        }

        for (nodes, adjacent) in edge_sides.iter() {
            match adjacent.as_slice() {
                [_] => (),
                [(_, side_a), (_, side_b)] if side_a.opposite() == *side_b => (),
                _ => return Err(MeshLoadError::BadEdge(nodes[0], nodes[1])),
            }
        }

        // apply the default marker to every boundary edge, then overwrite with the listed markers
        let mut markers: Vec<[Option<u32>; 4]> = vec![[None; 4]; rects.len()];
        for adjacent in edge_sides.values() {
            if let [(element_id, side)] = adjacent.as_slice() {
                markers[*element_id][side.index()] = Some(DEFAULT_BOUNDARY_MARKER);
            }
        }
        for (nodes, marker) in boundaries {
            match edge_sides.get(&edge_key(nodes)).map(|adj| adj.as_slice()) {
                Some([(element_id, side)]) => markers[*element_id][side.index()] = Some(marker),
                Some(_) => return Err(MeshLoadError::InteriorMarker(nodes[0], nodes[1])),
                None => return Err(MeshLoadError::BadEdge(nodes[0], nodes[1])),
            }
        }

        let mesh = Self {
            elems: rects
                .into_iter()
                .zip(markers)
                .enumerate()
                .map(|(id, (rect, boundary))| Elem::new(id, rect, 1, boundary))
                .collect(),
            nodes: points,
        };

        // T-junctions in the base mesh show up as constrained sides
        if Topology::analyze(&mesh).max_hanging_depth() > 0 {
            return Err(MeshLoadError::NonConforming);
        }

        Ok(mesh)
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let mesh_object = object! {
            "Nodes": JsonValue::from(self.nodes.iter().map(|p| json::array![p.x, p.y]).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().map(|elem| elem.to_json()).collect::<Vec<_>>()),
        };

        mesh_object.write_pretty(&mut w, 4)?;

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Iterate over the Elems without children
    pub fn leaves(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| elem.is_leaf())
    }

    /// IDs of the Elems without children (in ascending order)
    pub fn leaf_ids(&self) -> Vec<usize> {
        self.leaves().map(|elem| elem.id).collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().count()
    }

    /// Largest polynomial order among the leaves
    pub fn max_order(&self) -> u8 {
        self.leaves().map(|elem| elem.order).max().unwrap_or(0)
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, String> {
        if elem_id >= self.elems.len() {
            Err(format!(
                "Elem {} doesn't exist; Cannot retrieve descendant Elems!",
                elem_id
            ))
        } else {
            let mut descendants = Vec::new();
            self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
            Ok(descendants)
        }
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get the IDs of the leaves covering an Elem (the Elem itself if it is a leaf)
    pub fn leaf_descendants(&self, elem_id: usize) -> Result<Vec<usize>, String> {
        Ok(self
            .descendant_elems(elem_id, true)?
            .into_iter()
            .filter(|id| self.elems[*id].is_leaf())
            .collect())
    }

    /// Get a list of an [`Elem`]s ancestors's IDs
    pub fn ancestor_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, String> {
        if elem_id >= self.elems.len() {
            Err(format!(
                "Elem {} doesn't exist; Cannot retrieve ancestor Elems!",
                elem_id
            ))
        } else {
            let mut ancestors = Vec::new();
            if include_starting_elem {
                ancestors.push(elem_id);
            }
            let mut current = self.elems[elem_id].parent_id();
            while let Some(parent_id) = current {
                ancestors.push(parent_id);
                current = self.elems[parent_id].parent_id();
            }
            Ok(ancestors)
        }
    }

    /// Can the leaf `elem_id` accept some h-Refinement
    pub fn elem_is_h_refineable(&self, elem_id: usize, refinement: HRef) -> Result<bool, HRefError> {
        match self.elems.get(elem_id) {
            None => Err(HRefError::ElemDoesntExist(elem_id)),
            Some(elem) if elem.has_children() => Err(HRefError::ElemHasChildren(elem_id)),
            Some(elem) => Ok(elem.h_levels.can_refine(refinement)),
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // h-Refinement
    // ----------------------------------------------------------------------------------------------------

    /// Apply an h-refinement to all leaves
    pub fn global_h_refinement(&mut self, refinement: HRef) -> Result<(), HRefError> {
        let leaf_ids = self.leaf_ids();
        self.h_refine_elems(leaf_ids, refinement)
    }

    /// Apply the same h-refinement to a list of Elems
    pub fn h_refine_elems(&mut self, elems: Vec<usize>, refinement: HRef) -> Result<(), HRefError> {
        self.execute_h_refinements(elems.into_iter().map(|id| (id, refinement)).collect())
    }

    /// Apply an h-refinement to all leaves for which the filter returns `Some`
    pub fn h_refine_with_filter<F>(&mut self, filt: F) -> Result<(), HRefError>
    where
        F: Fn(&Elem) -> Option<HRef>,
    {
        let refinements = self
            .leaves()
            .filter_map(|elem| filt(elem).map(|refinement| (elem.id, refinement)))
            .collect();
        self.execute_h_refinements(refinements)
    }

    /// Execute a batch of h-refinements. The batch is validated before the Mesh is modified.
    ///
    /// Children are appended to the list of Elems in the order of the batch and inherit their parent's order.
    pub fn execute_h_refinements(&mut self, refinements: Vec<(usize, HRef)>) -> Result<(), HRefError> {
        let mut seen = BTreeSet::new();
        for (elem_id, refinement) in refinements.iter() {
            if !seen.insert(*elem_id) {
                return Err(HRefError::DoubleRefinement(*elem_id));
            }
            if !self.elem_is_h_refineable(*elem_id, *refinement)? {
                return Err(HRefError::MinEdgeLength(*elem_id));
            }
        }

        for (elem_id, refinement) in refinements {
            let next_id = self.elems.len();
            let children = self.elems[elem_id].h_refine(refinement, next_id)?;
            self.elems.extend(children);
        }

        Ok(())
    }

    /// Refine the owners of master edges until no leaf has a hanging-node depth above `bound`
    ///
    /// Returns the number of extra refinements which were needed
    pub fn enforce_regularity(&mut self, bound: u8) -> Result<usize, HRefError> {
        let mut num_refined = 0;

        loop {
            let topo = Topology::analyze(self);
            let irregular_masters: BTreeSet<usize> = topo
                .edges
                .iter()
                .filter(|edge| edge.slaves.iter().any(|(_, _, depth)| *depth > bound))
                .flat_map(|edge| edge.owners.iter().map(|(elem_id, _)| *elem_id))
                .collect();

            if irregular_masters.is_empty() {
                return Ok(num_refined);
            }

            num_refined += irregular_masters.len();
            self.h_refine_elems(irregular_masters.into_iter().collect(), HRef::T)?;
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // p-Refinement
    // ----------------------------------------------------------------------------------------------------

    /// Apply the same p-refinement to a list of Elems
    pub fn p_refine_elems(&mut self, elems: Vec<usize>, refinement: PRef) -> Result<(), PRefError> {
        self.execute_p_refinements(elems.into_iter().map(|id| (id, refinement)).collect())
    }

    /// Execute a batch of p-refinements. The batch is validated before the Mesh is modified.
    pub fn execute_p_refinements(&mut self, refinements: Vec<(usize, PRef)>) -> Result<(), PRefError> {
        let orders = refinements
            .iter()
            .map(|(elem_id, refinement)| {
                let elem = self
                    .elems
                    .get(*elem_id)
                    .ok_or(PRefError::ElemDoesntExist(*elem_id))?;
                Ok((*elem_id, refinement.refine(elem.order)?))
            })
            .collect::<Result<Vec<_>, PRefError>>()?;

        self.set_expansion_orders(orders)
    }

    /// Set the polynomial order of every leaf
    pub fn set_global_expansion_orders(&mut self, order: u8) -> Result<(), PRefError> {
        let orders = self.leaves().map(|elem| (elem.id, order)).collect();
        self.set_expansion_orders(orders)
    }

    /// Set the polynomial order of a list of leaves. The batch is validated before the Mesh is modified.
    pub fn set_expansion_orders(&mut self, orders: Vec<(usize, u8)>) -> Result<(), PRefError> {
        let mut seen = BTreeSet::new();
        for (elem_id, order) in orders.iter() {
            match self.elems.get(*elem_id) {
                None => return Err(PRefError::ElemDoesntExist(*elem_id)),
                Some(elem) if elem.has_children() => {
                    return Err(PRefError::ElemHasChildren(*elem_id))
                }
                Some(_) => (),
            }
            if !seen.insert(*elem_id) {
                return Err(PRefError::DoubleRefinement(*elem_id));
            }
            check_order(*order)?;
        }

        for (elem_id, order) in orders {
            self.elems[elem_id].order = order;
        }

        Ok(())
    }
}

/// Errors encountered while loading a Mesh. These are fatal to an adaptive run.
#[derive(Debug, thiserror::Error)]
pub enum MeshLoadError {
    #[error("unable to read mesh file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse mesh file as JSON: {0}")]
    Json(String),
    #[error("malformed mesh file: {0}")]
    Format(String),
    #[error("mesh has no elements")]
    Empty,
    #[error("all nodes must be at unique locations")]
    DuplicateNodes,
    #[error("element {0} is invalid: {1}")]
    BadElement(usize, String),
    #[error("edge between nodes {0} and {1} does not join exactly one or two elements on opposite sides")]
    BadEdge(usize, usize),
    #[error("boundary marker given for interior edge between nodes {0} and {1}")]
    InteriorMarker(usize, usize),
    #[error("base mesh is not conforming (contains hanging nodes)")]
    NonConforming,
}

fn side_node_ids(node_ids: &[usize; 4], side: Side) -> [usize; 2] {
    match side {
        Side::S => [node_ids[0], node_ids[1]],
        Side::N => [node_ids[2], node_ids[3]],
        Side::W => [node_ids[0], node_ids[2]],
        Side::E => [node_ids[1], node_ids[3]],
    }
}

fn edge_key([a, b]: [usize; 2]) -> [usize; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

fn parse_element_information(
    mesh_file_json: &JsonValue,
    num_nodes: usize,
) -> Result<Vec<[usize; 4]>, MeshLoadError> {
    if !mesh_file_json["Elements"].is_array() {
        return Err(MeshLoadError::Format(String::from(
            "Elements must be an Array",
        )));
    }

    mesh_file_json["Elements"]
        .members()
        .enumerate()
        .map(|(element_id, json_element)| {
            let node_ids = parse_id_array::<4>(&json_element["node_ids"]).ok_or_else(|| {
                MeshLoadError::BadElement(
                    element_id,
                    String::from("Elements must have an Array of 4 non-negative integer node_ids"),
                )
            })?;
            if node_ids.iter().any(|id| *id >= num_nodes) {
                return Err(MeshLoadError::BadElement(
                    element_id,
                    String::from("node_ids must be smaller than the total number of nodes"),
                ));
            }
            Ok(node_ids)
        })
        .collect()
}

fn parse_node_information(mesh_file_json: &JsonValue) -> Result<Vec<Point>, MeshLoadError> {
    if !mesh_file_json["Nodes"].is_array() {
        return Err(MeshLoadError::Format(String::from("Nodes must be an Array")));
    }

    mesh_file_json["Nodes"]
        .members()
        .map(|json_node_point| {
            if !json_node_point.is_array() || json_node_point.members().count() != 2 {
                return Err(MeshLoadError::Format(String::from(
                    "nodes must be arrays of length 2",
                )));
            }

            match (json_node_point[0].as_f64(), json_node_point[1].as_f64()) {
                (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Point::new(x, y)),
                _ => Err(MeshLoadError::Format(String::from(
                    "nodes must be composed of finite numerical values",
                ))),
            }
        })
        .collect()
}

fn parse_boundary_information(
    mesh_file_json: &JsonValue,
    num_nodes: usize,
) -> Result<Vec<([usize; 2], u32)>, MeshLoadError> {
    if mesh_file_json["Boundaries"].is_null() {
        return Ok(Vec::new());
    }
    if !mesh_file_json["Boundaries"].is_array() {
        return Err(MeshLoadError::Format(String::from(
            "Boundaries must be an Array",
        )));
    }

    mesh_file_json["Boundaries"]
        .members()
        .map(|json_boundary| {
            let nodes = parse_id_array::<2>(&json_boundary["node_ids"])
                .filter(|ids| ids.iter().all(|id| *id < num_nodes))
                .ok_or_else(|| {
                    MeshLoadError::Format(String::from(
                        "Boundaries must have an Array of 2 valid node_ids",
                    ))
                })?;
            let marker = json_boundary["marker"].as_u32().ok_or_else(|| {
                MeshLoadError::Format(String::from(
                    "Boundary markers must be non-negative integers",
                ))
            })?;
            Ok((nodes, marker))
        })
        .collect()
}

fn parse_id_array<const N: usize>(json_ids: &JsonValue) -> Option<[usize; N]> {
    if !json_ids.is_array() || json_ids.members().count() != N {
        return None;
    }

    let ids: Vec<usize> = json_ids
        .members()
        .map(|id| id.as_usize())
        .collect::<Option<Vec<usize>>>()?;
    ids.try_into().ok()
}

fn has_duplicates<T>(values: &[T]) -> bool
where
    T: PartialEq,
{
    for (i, val) in values.iter().enumerate() {
        for val_cmp in values.iter().skip(i + 1) {
            if val == val_cmp {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_from_file() {
        let mesh = Mesh::from_file("./test_input/lshape.json").unwrap();

        assert_eq!(mesh.elems.len(), 3);
        assert_eq!(mesh.num_leaves(), 3);
        assert_eq!(mesh.elems[0].rect, Rect::new([0.0, 1.0], [-1.0, 0.0]));
        assert_eq!(mesh.elems[2].rect, Rect::new([-1.0, 0.0], [0.0, 1.0]));

        // the re-entrant sides of elems 0 and 2 are boundary sides, their shared sides with elem 1 are not
        assert_eq!(mesh.elems[0].boundary_marker(Side::W), Some(1));
        assert_eq!(mesh.elems[0].boundary_marker(Side::N), None);
        assert_eq!(mesh.elems[2].boundary_marker(Side::S), Some(1));
        assert_eq!(mesh.elems[2].boundary_marker(Side::E), None);
        assert_eq!(mesh.elems[1].boundary, [None, Some(1), None, Some(1)]);
    }

    #[test]
    fn unlisted_boundaries_get_default_marker() {
        let mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        assert_eq!(mesh.elems[0].boundary_marker(Side::S), Some(DEFAULT_BOUNDARY_MARKER));
        assert_eq!(mesh.elems[0].boundary_marker(Side::W), Some(3));
        assert_eq!(mesh.elems[0].boundary_marker(Side::E), None);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            Mesh::from_file("./test_input/does_not_exist.json"),
            Err(MeshLoadError::Io { .. })
        ));
    }

    #[test]
    fn malformed_files_are_errors() {
        assert!(matches!(
            Mesh::from_json_str("{ not json"),
            Err(MeshLoadError::Json(_))
        ));

        let skewed = r#"{
            "Nodes": [[0.0, 0.0], [1.0, 0.1], [0.0, 1.0], [1.0, 1.0]],
            "Elements": [{ "node_ids": [0, 1, 2, 3] }]
        }"#;
        assert!(matches!(
            Mesh::from_json_str(skewed),
            Err(MeshLoadError::BadElement(0, _))
        ));

        let misordered = r#"{
            "Nodes": [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
            "Elements": [{ "node_ids": [3, 2, 1, 0] }]
        }"#;
        assert!(matches!(
            Mesh::from_json_str(misordered),
            Err(MeshLoadError::BadElement(0, _))
        ));

        let interior_marker = r#"{
            "Nodes": [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0], [1.0, 1.0], [2.0, 1.0]],
            "Elements": [{ "node_ids": [0, 1, 3, 4] }, { "node_ids": [1, 2, 4, 5] }],
            "Boundaries": [{ "node_ids": [1, 4], "marker": 7 }]
        }"#;
        assert!(matches!(
            Mesh::from_json_str(interior_marker),
            Err(MeshLoadError::InteriorMarker(1, 4))
        ));
    }

    #[test]
    fn t_junctions_are_rejected() {
        // a 1x2 element next to two 1x1 elements
        let t_junction = r#"{
            "Nodes": [[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [1.0, 1.0], [2.0, 1.0], [0.0, 2.0], [1.0, 2.0], [2.0, 2.0]],
            "Elements": [{ "node_ids": [0, 1, 5, 6] }, { "node_ids": [1, 2, 3, 4] }, { "node_ids": [3, 4, 6, 7] }]
        }"#;
        assert!(matches!(
            Mesh::from_json_str(t_junction),
            Err(MeshLoadError::NonConforming)
        ));
    }

    #[test]
    fn basic_h_refinements() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_elems(vec![1, 2], HRef::U).unwrap();
        mesh.h_refine_elems(vec![3], HRef::V).unwrap();

        assert_eq!(mesh.elems.len(), 4 + 4 + 2 + 2 + 2);
        assert_eq!(mesh.num_leaves(), 4 + 2 + 2 + 2);
        assert_eq!(mesh.leaf_descendants(1).unwrap(), vec![8, 9]);
        assert_eq!(mesh.ancestor_elems(5, true).unwrap(), vec![5, 0]);

        let leaf_area: f64 = mesh.leaves().map(|elem| elem.rect.area()).sum();
        assert!((leaf_area - 1.0).abs() < 1e-15);
    }

    #[test]
    fn basic_p_refinements() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.set_global_expansion_orders(3).unwrap();
        mesh.p_refine_elems(vec![0], PRef::from(2)).unwrap();
        mesh.p_refine_elems(vec![1], PRef::from(-1)).unwrap();

        assert_eq!(mesh.elems[0].order, 5);
        assert_eq!(mesh.elems[1].order, 2);
        assert_eq!(mesh.elems[2].order, 3);
        assert_eq!(mesh.max_order(), 5);
    }

    #[test]
    fn h_refine_non_existent() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        assert_eq!(
            mesh.h_refine_elems(vec![0, 4], HRef::T),
            Err(HRefError::ElemDoesntExist(4))
        );
        // nothing was applied
        assert_eq!(mesh.elems.len(), 4);
    }

    #[test]
    fn h_refine_elem_with_children() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        assert_eq!(
            mesh.h_refine_elems(vec![0], HRef::T),
            Err(HRefError::ElemHasChildren(0))
        );
    }

    #[test]
    fn double_h_refinement() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        assert_eq!(
            mesh.execute_h_refinements(vec![(0, HRef::T), (1, HRef::T), (0, HRef::U)]),
            Err(HRefError::DoubleRefinement(0))
        );
    }

    #[test]
    fn minimum_edge_length_exceeded() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();

        // repeatedly refine the bottom left cell
        let result = (0..=MAX_H_LEVEL).try_for_each(|_| {
            mesh.h_refine_with_filter(|elem| {
                if elem.rect.x[0] == 0.0 && elem.rect.y[0] == 0.0 {
                    Some(HRef::T)
                } else {
                    None
                }
            })
        });

        assert!(matches!(result, Err(HRefError::MinEdgeLength(_))));
    }

    #[test]
    fn p_refinement_errors() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.set_global_expansion_orders(3).unwrap();

        assert_eq!(
            mesh.p_refine_elems(vec![0], PRef::from(-3)),
            Err(PRefError::NegExpansion)
        );
        assert_eq!(
            mesh.p_refine_elems(vec![0], PRef::from(MAX_POLYNOMIAL_ORDER as i8)),
            Err(PRefError::ExceededMaxExpansion)
        );
        assert_eq!(
            mesh.p_refine_elems(vec![0, 0], PRef::from(1)),
            Err(PRefError::DoubleRefinement(0))
        );
        assert_eq!(
            mesh.p_refine_elems(vec![7], PRef::from(1)),
            Err(PRefError::ElemDoesntExist(7))
        );

        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        assert_eq!(
            mesh.set_expansion_orders(vec![(0, 2)]),
            Err(PRefError::ElemHasChildren(0))
        );
    }

    #[test]
    fn regularity_is_enforced() {
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();

        // the north east grandchildren of elem 0 hang two levels deep along the west side of elem 1
        mesh.h_refine_elems(vec![0], HRef::T).unwrap();
        mesh.h_refine_with_filter(|elem| {
            if elem.rect.x[0] == 0.25 && elem.rect.y[0] == 0.25 {
                Some(HRef::T)
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(Topology::analyze(&mesh).max_hanging_depth(), 2);

        let extra = mesh.enforce_regularity(1).unwrap();
        assert!(extra > 0);
        assert!(Topology::analyze(&mesh).max_hanging_depth() <= 1);

        // already regular: nothing to do
        assert_eq!(mesh.enforce_regularity(1).unwrap(), 0);
    }

    #[test]
    #[cfg(feature = "json_export")]
    fn refined_mesh_to_file() {
        let mut mesh = Mesh::from_file("./test_input/lshape.json").unwrap();
        mesh.h_refine_elems(vec![1], HRef::T).unwrap();

        let path = std::env::temp_dir().join("hp_adapt_refined_lshape.json");
        mesh.export_to_json(&path).unwrap();

        let exported = json::parse(&read_to_string(&path).unwrap()).unwrap();
        assert_eq!(exported["Elems"].members().count(), 7);
        assert_eq!(exported["Elems"][1]["children"].members().count(), 4);
    }
}

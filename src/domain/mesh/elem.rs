use super::h_refinement::{HLevels, HRef, HRefError, HRefLoc};
#[cfg(feature = "json_export")]
use json::{array, object, JsonValue};
use smallvec::SmallVec;
use std::fmt;

/// A Point in real space
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Bit-exact key for hashing vertex locations (negative zero is folded into zero)
    pub fn key(&self) -> VertexKey {
        VertexKey([(self.x + 0.0).to_bits(), (self.y + 0.0).to_bits()])
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Location of a mesh vertex suitable for use as a map key
///
/// Refinements only ever bisect ranges, so vertices shared between Elems have bit-identical coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexKey(pub [u64; 2]);

/// An axis aligned rectangle: `[x_min, x_max] x [y_min, y_max]`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: [f64; 2],
    pub y: [f64; 2],
}

impl Rect {
    pub const fn new(x: [f64; 2], y: [f64; 2]) -> Self {
        Self { x, y }
    }

    pub fn width(&self) -> f64 {
        self.x[1] - self.x[0]
    }

    pub fn height(&self) -> f64 {
        self.y[1] - self.y[0]
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// A rectangle is degenerate if it has a non-positive or non-finite extent
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0 && self.area().is_finite())
    }

    /// The four corners in the order `[SW, SE, NW, NE]`
    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x[0], self.y[0]),
            Point::new(self.x[1], self.y[0]),
            Point::new(self.x[0], self.y[1]),
            Point::new(self.x[1], self.y[1]),
        ]
    }

    /// The rectangle occupied by a child at some [HRefLoc]
    pub fn child(&self, loc: HRefLoc) -> Self {
        let [x, y] = loc.sub_range([self.x, self.y]);
        Self { x, y }
    }

    /// The overlapping region of two rectangles (if it has a positive area)
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let x = [self.x[0].max(other.x[0]), self.x[1].min(other.x[1])];
        let y = [self.y[0].max(other.y[0]), self.y[1].min(other.y[1])];

        if x[1] > x[0] && y[1] > y[0] {
            Some(Self { x, y })
        } else {
            None
        }
    }

    /// Does this rectangle fully cover another
    pub fn contains(&self, other: &Self) -> bool {
        self.x[0] <= other.x[0]
            && other.x[1] <= self.x[1]
            && self.y[0] <= other.y[0]
            && other.y[1] <= self.y[1]
    }

    /// Orientation, fixed coordinate, and range of one of the rectangle's sides
    pub fn side_geometry(&self, side: Side) -> (Orientation, f64, [f64; 2]) {
        match side {
            Side::S => (Orientation::Horizontal, self.y[0], self.x),
            Side::N => (Orientation::Horizontal, self.y[1], self.x),
            Side::W => (Orientation::Vertical, self.x[0], self.y),
            Side::E => (Orientation::Vertical, self.x[1], self.y),
        }
    }
}

/// Orientation of a straight line in the mesh
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Orientation {
    /// constant `y`
    Horizontal,
    /// constant `x`
    Vertical,
}

/// The sides of an Elem (by cardinal direction)
///
/// ```text
///               N
///         2 --------- 3
///         |     1     |
///         |           |
///      W  |2         3|  E
///         |           |
///         |     0     |
///         0 --------- 1
///               S
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Side {
    S,
    N,
    W,
    E,
}

impl Side {
    pub const ALL: [Self; 4] = [Self::S, Self::N, Self::W, Self::E];

    pub fn index(&self) -> usize {
        match self {
            Self::S => 0,
            Self::N => 1,
            Self::W => 2,
            Self::E => 3,
        }
    }

    /// The side of a neighboring Elem which faces this side
    pub fn opposite(&self) -> Self {
        match self {
            Self::S => Self::N,
            Self::N => Self::S,
            Self::W => Self::E,
            Self::E => Self::W,
        }
    }

    /// Does a child at `loc` share this side with its parent
    fn on_parent_side(&self, loc: HRefLoc) -> bool {
        use super::h_refinement::{Bisection::*, Quadrant::*};

        match (self, loc) {
            (Self::S, HRefLoc::T(SW | SE)) | (Self::N, HRefLoc::T(NW | NE)) => true,
            (Self::W, HRefLoc::T(SW | NW)) | (Self::E, HRefLoc::T(SE | NE)) => true,
            (Self::S | Self::N, HRefLoc::U(_)) => true,
            (Self::W, HRefLoc::U(BL)) | (Self::E, HRefLoc::U(TR)) => true,
            (Self::W | Self::E, HRefLoc::V(_)) => true,
            (Self::S, HRefLoc::V(BL)) | (Self::N, HRefLoc::V(TR)) => true,
            _ => false,
        }
    }
}

/// `Elem`s are the basic geometric unit in the `Mesh`
///
/// `Elem`s are responsible for keeping track of:
/// * Their rectangle in real space
/// * Connections to their parent `Elem` (and their own h-refinement state)
/// * Connections to their child `Elem`s (if h-refined)
/// * Polynomial expansion order (p-refinement state)
/// * Boundary markers for the sides which lie on the boundary of the domain
///
/// Only `Elem`s without children ("leaves") carry an active approximation
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub rect: Rect,
    pub order: u8,
    pub h_levels: HLevels,
    /// boundary marker of each [Side] (indexed by `Side::index`), if that side lies on the boundary
    pub boundary: [Option<u32>; 4],
    children: Option<SmallVec<[usize; 4]>>,
    parent: Option<(usize, HRefLoc)>,
}

impl Elem {
    /// Construct a new base-layer Elem
    pub fn new(id: usize, rect: Rect, order: u8, boundary: [Option<u32>; 4]) -> Self {
        Self {
            id,
            rect,
            order,
            h_levels: HLevels::default(),
            boundary,
            children: None,
            parent: None,
        }
    }

    /// Construct the 2 or 4 children of this Elem described by an [HRef]
    ///
    /// The new children have IDs starting at `next_id`
    pub(crate) fn h_refine(&mut self, refinement: HRef, next_id: usize) -> Result<Vec<Elem>, HRefError> {
        if self.children.is_some() {
            return Err(HRefError::ElemHasChildren(self.id));
        }
        if !self.h_levels.can_refine(refinement) {
            return Err(HRefError::MinEdgeLength(self.id));
        }

        let children: Vec<Elem> = refinement
            .locs()
            .enumerate()
            .map(|(idx, loc)| Elem {
                id: next_id + idx,
                rect: self.rect.child(loc),
                order: self.order,
                h_levels: self.h_levels.refined(refinement),
                boundary: Side::ALL.map(|side| {
                    if side.on_parent_side(loc) {
                        self.boundary[side.index()]
                    } else {
                        None
                    }
                }),
                children: None,
                parent: Some((self.id, loc)),
            })
            .collect();

        self.children = Some(children.iter().map(|child| child.id).collect());
        Ok(children)
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.parent.map(|(id, _)| id)
    }

    /// Returns a vector of ids for this Elem's children. Returns `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<SmallVec<[usize; 4]>> {
        self.children.clone()
    }

    /// Has this `Elem` been h-Refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    pub fn boundary_marker(&self, side: Side) -> Option<u32> {
        self.boundary[side.index()]
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "parent": self.parent_id(),
            "active": self.children.is_none(),
            "x": array![self.rect.x[0], self.rect.x[1]],
            "y": array![self.rect.y[0], self.rect.y[1]],
            "order": self.order,
            "h_levels": array![self.h_levels.u, self.h_levels.v],
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::h_refinement::{Bisection, Quadrant};

    fn unit_elem() -> Elem {
        Elem::new(
            0,
            Rect::new([0.0, 1.0], [0.0, 1.0]),
            3,
            [Some(1), Some(2), Some(3), None],
        )
    }

    #[test]
    fn t_refinement_children() {
        let mut elem = unit_elem();
        let children = elem.h_refine(HRef::T, 1).unwrap();

        assert_eq!(children.len(), 4);
        assert_eq!(elem.child_ids().unwrap().to_vec(), vec![1, 2, 3, 4]);

        let ne = &children[Quadrant::NE.index()];
        assert_eq!(ne.rect, Rect::new([0.5, 1.0], [0.5, 1.0]));
        assert_eq!(ne.boundary, [None, Some(2), None, None]);
        assert_eq!(ne.order, 3);
        assert_eq!(ne.parent_id(), Some(0));

        let sw = &children[Quadrant::SW.index()];
        assert_eq!(sw.boundary, [Some(1), None, Some(3), None]);
    }

    #[test]
    fn anisotropic_children_inherit_long_sides() {
        let mut elem = unit_elem();
        let children = elem.h_refine(HRef::U, 1).unwrap();
        let right = &children[Bisection::TR.index()];

        assert_eq!(right.rect, Rect::new([0.5, 1.0], [0.0, 1.0]));
        assert_eq!(right.boundary, [Some(1), Some(2), None, None]);
        assert_eq!(right.h_levels, HLevels::from(1, 0));
    }

    #[test]
    fn cannot_refine_twice() {
        let mut elem = unit_elem();
        elem.h_refine(HRef::V, 1).unwrap();
        assert_eq!(
            elem.h_refine(HRef::T, 3).unwrap_err(),
            HRefError::ElemHasChildren(0)
        );
    }

    #[test]
    fn rect_intersections() {
        let a = Rect::new([0.0, 1.0], [0.0, 1.0]);
        let b = Rect::new([0.5, 2.0], [0.25, 0.75]);
        assert_eq!(a.intersection(&b), Some(Rect::new([0.5, 1.0], [0.25, 0.75])));

        let c = Rect::new([1.0, 2.0], [0.0, 1.0]);
        assert_eq!(a.intersection(&c), None);
        assert!(a.contains(&Rect::new([0.0, 0.5], [0.5, 1.0])));
    }

    #[test]
    fn vertex_keys_fold_negative_zero() {
        assert_eq!(Point::new(-0.0, 1.0).key(), Point::new(0.0, 1.0).key());
    }
}

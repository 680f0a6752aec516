use super::MAX_H_LEVEL;
use std::fmt;

/// Description of an h-Refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HRef {
    /// isotropic (4 children)
    T,
    /// anisotropic about the u-direction: the x-extent is bisected (2 children; left and right)
    U,
    /// anisotropic about the v-direction: the y-extent is bisected (2 children; bottom and top)
    V,
}

impl HRef {
    /// Number of child Elems produced by this refinement
    pub fn num_children(&self) -> usize {
        match self {
            Self::T => 4,
            Self::U | Self::V => 2,
        }
    }

    /// Location of the `idx`th child relative to its parent
    pub fn loc(&self, idx: usize) -> HRefLoc {
        match self {
            Self::T => HRefLoc::T(Quadrant::ALL[idx]),
            Self::U => HRefLoc::U(Bisection::ALL[idx]),
            Self::V => HRefLoc::V(Bisection::ALL[idx]),
        }
    }

    /// Iterate over the child locations in index order
    pub fn locs(self) -> impl Iterator<Item = HRefLoc> {
        (0..self.num_children()).map(move |idx| self.loc(idx))
    }
}

/// Quadrant of a child Elem following a T-Type h-Refinement (from the parent Elem's perspective)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quadrant {
    /// south west
    SW,
    /// south east
    SE,
    /// north west
    NW,
    /// north east
    NE,
}

impl Quadrant {
    pub const ALL: [Self; 4] = [Self::SW, Self::SE, Self::NW, Self::NE];

    pub fn index(&self) -> usize {
        match self {
            Self::SW => 0,
            Self::SE => 1,
            Self::NW => 2,
            Self::NE => 3,
        }
    }
}

/// Location of a child Elem following a U-Type or V-Type h-refinement (from the parent Elem's perspective).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bisection {
    /// Bottom (V-type) or Left (U-type)
    BL,
    /// Top (V-Type) or Right (U-type)
    TR,
}

impl Bisection {
    pub const ALL: [Self; 2] = [Self::BL, Self::TR];

    pub fn index(&self) -> usize {
        match self {
            Self::BL => 0,
            Self::TR => 1,
        }
    }
}

/// The location of an [Elem](super::elem::Elem) relative to its parent following an h-refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HRefLoc {
    T(Quadrant),
    U(Bisection),
    V(Bisection),
}

impl HRefLoc {
    pub fn index(&self) -> usize {
        match self {
            Self::T(quad) => quad.index(),
            Self::U(bi) | Self::V(bi) => bi.index(),
        }
    }

    /// Compute the sub-range of some parent range `[[x_min, x_max], [y_min, y_max]]` occupied by a child at this location
    pub fn sub_range(&self, [[x0, x1], [y0, y1]]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        let xm = (x0 + x1) / 2.0;
        let ym = (y0 + y1) / 2.0;

        match self {
            Self::T(Quadrant::SW) => [[x0, xm], [y0, ym]],
            Self::T(Quadrant::SE) => [[xm, x1], [y0, ym]],
            Self::T(Quadrant::NW) => [[x0, xm], [ym, y1]],
            Self::T(Quadrant::NE) => [[xm, x1], [ym, y1]],
            Self::U(Bisection::BL) => [[x0, xm], [y0, y1]],
            Self::U(Bisection::TR) => [[xm, x1], [y0, y1]],
            Self::V(Bisection::BL) => [[x0, x1], [y0, ym]],
            Self::V(Bisection::TR) => [[x0, x1], [ym, y1]],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Description of an Elem's h-Refinement levels in the u and v directions
pub struct HLevels {
    pub u: u8,
    pub v: u8,
}

impl HLevels {
    pub fn from(u: u8, v: u8) -> Self {
        Self { u, v }
    }

    pub fn refined(&self, refinement: HRef) -> Self {
        match refinement {
            HRef::T => Self::from(self.u + 1, self.v + 1),
            HRef::U => Self::from(self.u + 1, self.v),
            HRef::V => Self::from(self.u, self.v + 1),
        }
    }

    /// Can this level accept another refinement without exceeding [MAX_H_LEVEL]
    pub fn can_refine(&self, refinement: HRef) -> bool {
        let refined = self.refined(refinement);
        refined.u <= MAX_H_LEVEL && refined.v <= MAX_H_LEVEL
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HRefError {
    ElemDoesntExist(usize),
    ElemHasChildren(usize),
    DoubleRefinement(usize),
    MinEdgeLength(usize),
}

impl std::error::Error for HRefError {}

impl fmt::Display for HRefError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ElemDoesntExist(elem_id) => write!(f, "Elem {} does not exist; Cannot apply h-Refinement!", elem_id),
            Self::ElemHasChildren(elem_id) => write!(f, "Elem {} has already been h-refined; Cannot apply h-Refinement!", elem_id),
            Self::DoubleRefinement(elem_id) => write!(f, "Multiple h-refinements were specified for Elem {}; Cannot apply h-Refinements!", elem_id),
            Self::MinEdgeLength(elem_id) => write!(f, "Elem {} has reached the maximum h-Refinement depth; Cannot apply h-Refinement!", elem_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_ranges_tile_parent() {
        let parent = [[0.0, 1.0], [-1.0, 1.0]];

        for refinement in [HRef::T, HRef::U, HRef::V] {
            let area: f64 = refinement
                .locs()
                .map(|loc| {
                    let [[x0, x1], [y0, y1]] = loc.sub_range(parent);
                    (x1 - x0) * (y1 - y0)
                })
                .sum();
            assert!((area - 2.0).abs() < 1e-15);
        }

        assert_eq!(
            HRefLoc::T(Quadrant::NE).sub_range(parent),
            [[0.5, 1.0], [0.0, 1.0]]
        );
        assert_eq!(
            HRefLoc::V(Bisection::BL).sub_range(parent),
            [[0.0, 1.0], [-1.0, 0.0]]
        );
    }

    #[test]
    fn h_levels_track_directions() {
        let levels = HLevels::default().refined(HRef::U).refined(HRef::T);
        assert_eq!(levels, HLevels::from(2, 1));

        let deep = HLevels::from(MAX_H_LEVEL, 0);
        assert!(!deep.can_refine(HRef::U));
        assert!(deep.can_refine(HRef::V));
    }
}

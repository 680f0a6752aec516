use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// How the solution is constrained along a boundary marker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BcType {
    /// The solution value is prescribed (Dirichlet)
    Essential,
    /// The normal flux is prescribed (Neumann)
    Natural,
}

/// Boundary conditions keyed by the boundary markers of a Mesh
///
/// `value` is the prescribed solution value on essential markers and the prescribed outward flux on natural markers.
pub trait BoundaryConditions: Send + Sync + fmt::Debug {
    fn classify(&self, marker: u32) -> BcType;
    fn value(&self, marker: u32, x: f64, y: f64) -> f64;
}

/// Shareable boundary value function
pub type BoundaryFn = Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>;

/// Every marker is essential, with values given by a single function
#[derive(Clone)]
pub struct EssentialBcs {
    values: BoundaryFn,
}

impl EssentialBcs {
    pub fn new<F>(values: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self {
            values: Arc::new(values),
        }
    }

    /// Homogeneous essential conditions on every marker
    pub fn zero() -> Self {
        Self::new(|_, _| 0.0)
    }
}

impl fmt::Debug for EssentialBcs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EssentialBcs")
    }
}

impl BoundaryConditions for EssentialBcs {
    fn classify(&self, _marker: u32) -> BcType {
        BcType::Essential
    }

    fn value(&self, _marker: u32, x: f64, y: f64) -> f64 {
        (self.values)(x, y)
    }
}

/// An explicit table of conditions per marker. Markers which are not listed are natural with zero flux.
#[derive(Clone, Default)]
pub struct MarkerBcs {
    table: BTreeMap<u32, (BcType, BoundaryFn)>,
}

impl MarkerBcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn essential<F>(mut self, marker: u32, values: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.table.insert(marker, (BcType::Essential, Arc::new(values)));
        self
    }

    pub fn natural<F>(mut self, marker: u32, flux: F) -> Self
    where
        F: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        self.table.insert(marker, (BcType::Natural, Arc::new(flux)));
        self
    }
}

impl fmt::Debug for MarkerBcs {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.table.iter().map(|(marker, (bc_type, _))| (marker, bc_type)))
            .finish()
    }
}

impl BoundaryConditions for MarkerBcs {
    fn classify(&self, marker: u32) -> BcType {
        self.table
            .get(&marker)
            .map(|(bc_type, _)| *bc_type)
            .unwrap_or(BcType::Natural)
    }

    fn value(&self, marker: u32, x: f64, y: f64) -> f64 {
        self.table
            .get(&marker)
            .map(|(_, f)| f(x, y))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_table_lookup() {
        let bcs = MarkerBcs::new()
            .essential(1, |x, y| x + y)
            .natural(2, |_, _| -3.0);

        assert_eq!(bcs.classify(1), BcType::Essential);
        assert_eq!(bcs.classify(2), BcType::Natural);
        assert_eq!(bcs.classify(9), BcType::Natural);

        assert!((bcs.value(1, 0.5, 0.25) - 0.75).abs() < 1e-15);
        assert!((bcs.value(2, 0.5, 0.25) + 3.0).abs() < 1e-15);
        assert_eq!(bcs.value(9, 0.5, 0.25), 0.0);
    }

    #[test]
    fn essential_everywhere() {
        let bcs = EssentialBcs::new(|x, _| 2.0 * x);
        assert_eq!(bcs.classify(0), BcType::Essential);
        assert_eq!(bcs.classify(17), BcType::Essential);
        assert!((bcs.value(17, 1.5, 0.0) - 3.0).abs() < 1e-15);
    }
}

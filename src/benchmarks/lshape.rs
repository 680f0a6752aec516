use crate::domain::bc::{BoundaryConditions, EssentialBcs};
use crate::domain::mesh::elem::Point;
use crate::domain::mesh::{Mesh, MeshLoadError};
use crate::estimation::ExactSolution;

use std::f64::consts::PI;
use std::sync::Arc;

/// Boundary marker shared by every edge of the domain
pub const BOUNDARY_MARKER: u32 = 1;

/// `u = r^(2/3) sin(2a/3 + pi/3)` where `a = atan2(x, y)`
///
/// Harmonic on `[-1, 1]^2 \ [-1, 0]^2`, vanishing along both edges of the re-entrant corner.
#[derive(Clone, Copy, Debug, Default)]
pub struct LShapeExact;

impl LShapeExact {
    fn phase(x: f64, y: f64) -> f64 {
        2.0 * x.atan2(y) / 3.0 + PI / 3.0
    }
}

impl ExactSolution for LShapeExact {
    fn value(&self, x: f64, y: f64) -> f64 {
        let r = x.hypot(y);
        r.powf(2.0 / 3.0) * Self::phase(x, y).sin()
    }

    fn gradient(&self, x: f64, y: f64) -> [f64; 2] {
        let r_sq = x * x + y * y;
        let (sin, cos) = Self::phase(x, y).sin_cos();
        let scale = 2.0 / (3.0 * r_sq.powf(2.0 / 3.0));

        [scale * (x * sin + y * cos), scale * (y * sin - x * cos)]
    }
}

/// The L-shaped domain as three unit squares
pub fn mesh() -> Result<Mesh, MeshLoadError> {
    let points = vec![
        Point::new(0.0, -1.0),
        Point::new(1.0, -1.0),
        Point::new(-1.0, 0.0),
        Point::new(0.0, 0.0),
        Point::new(1.0, 0.0),
        Point::new(-1.0, 1.0),
        Point::new(0.0, 1.0),
        Point::new(1.0, 1.0),
    ];
    let elements = vec![[0, 1, 3, 4], [3, 4, 6, 7], [2, 3, 5, 6]];
    let boundaries = [[0, 1], [1, 4], [4, 7], [6, 7], [5, 6], [2, 5], [2, 3], [0, 3]]
        .into_iter()
        .map(|edge| (edge, BOUNDARY_MARKER))
        .collect();

    Mesh::from_parts(points, elements, boundaries)
}

/// Essential conditions given by the exact solution on every boundary
pub fn boundary_conditions() -> Arc<dyn BoundaryConditions> {
    Arc::new(EssentialBcs::new(|x, y| LShapeExact.value(x, y)))
}

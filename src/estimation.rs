use crate::domain::mesh::elem::Rect;
use crate::integration::glq::MAX_TABULATED_GLQ_POINTS;
use crate::integration::{num_glq_points, RectQuadrature};
use crate::solution::Solution;

use log::trace;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Extra quadrature points (beyond the element order) used when integrating against an exact solution
const EXACT_QUADRATURE_OVERHEAD: usize = 6;

/// An analytic solution used to report true errors
pub trait ExactSolution: Send + Sync {
    fn value(&self, x: f64, y: f64) -> f64;
    fn gradient(&self, x: f64, y: f64) -> [f64; 2];
}

/// Element-wise H1 errors of a coarse solution, along with the H1 norm used to normalize them
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorEstimate {
    pub elem_errors: BTreeMap<usize, f64>,
    pub reference_norm: f64,
}

impl ErrorEstimate {
    /// Global error: the root of the sum of squared element errors
    pub fn total(&self) -> f64 {
        self.elem_errors.values().map(|e| e * e).sum::<f64>().sqrt()
    }

    /// Global error relative to the reference norm, in percent
    pub fn global_error_percent(&self) -> f64 {
        if self.reference_norm > 0.0 {
            100.0 * self.total() / self.reference_norm
        } else {
            0.0
        }
    }

    /// Error on a single element relative to the reference norm
    pub fn relative(&self, elem_id: usize) -> Option<f64> {
        self.elem_errors.get(&elem_id).map(|e| {
            if self.reference_norm > 0.0 {
                e / self.reference_norm
            } else {
                0.0
            }
        })
    }

    /// Elements by descending error (ascending id among equal errors)
    pub fn sorted(&self) -> Vec<(usize, f64)> {
        let mut sorted: Vec<(usize, f64)> = self.elem_errors.iter().map(|(id, e)| (*id, *e)).collect();
        sorted.sort_by(|(id_a, e_a), (id_b, e_b)| {
            e_b.partial_cmp(e_a).unwrap_or(Ordering::Equal).then(id_a.cmp(id_b))
        });
        sorted
    }

    pub fn num_elems(&self) -> usize {
        self.elem_errors.len()
    }

    fn from_squares(squares: Vec<(usize, f64, f64)>) -> Result<Self, EstimatorError> {
        let mut elem_errors = BTreeMap::new();
        let mut norm_sq = 0.0;
        for (elem_id, err_sq, ref_sq) in squares {
            if !err_sq.is_finite() || !ref_sq.is_finite() {
                return Err(EstimatorError::Divergence { elem_id });
            }
            elem_errors.insert(elem_id, err_sq.max(0.0).sqrt());
            norm_sq += ref_sq;
        }

        let estimate = Self {
            elem_errors,
            reference_norm: norm_sq.max(0.0).sqrt(),
        };
        if estimate.reference_norm == 0.0 && estimate.total() > 0.0 {
            Err(EstimatorError::ZeroReferenceNorm)
        } else {
            Ok(estimate)
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimatorError {
    #[error("error contribution of elem {elem_id} is not finite")]
    Divergence { elem_id: usize },
    #[error("incompatible spaces: {0}")]
    IncompatibleSpace(String),
    #[error("reference norm is zero while the error is not")]
    ZeroReferenceNorm,
}

// squared H1 norms of (a - b) and of a over a tensor grid
fn h1_squares(quad: &RectQuadrature, a: [&Vec<Vec<f64>>; 3], b: [&Vec<Vec<f64>>; 3]) -> (f64, f64) {
    let diff = quad.integrate(|m, n| {
        (0..3)
            .map(|k| (a[k][m][n] - b[k][m][n]).powi(2))
            .sum::<f64>()
    });
    let norm = quad.integrate(|m, n| (0..3).map(|k| a[k][m][n].powi(2)).sum::<f64>());
    (diff, norm)
}

/// Estimate the error of `coarse` by its H1 distance to `fine` on each coarse leaf
///
/// The difference is integrated over the fine leaves covering each coarse leaf, and errors are normalized by the
/// H1 norm of the fine solution.
pub fn estimate(coarse: &Solution, fine: &Solution) -> Result<ErrorEstimate, EstimatorError> {
    if !fine.space().is_refinement_of(coarse.space()) {
        return Err(EstimatorError::IncompatibleSpace(String::from(
            "the fine solution's space is not a refinement of the coarse solution's space",
        )));
    }

    let coarse_mesh = coarse.space().mesh();
    let fine_mesh = fine.space().mesh();

    let squares = coarse_mesh
        .leaf_ids()
        .into_par_iter()
        .map(|coarse_id| {
            let p_coarse = coarse_mesh.elems[coarse_id].order;
            let (mut err_sq, mut ref_sq) = (0.0, 0.0);

            let fine_ids = fine_mesh
                .leaf_descendants(coarse_id)
                .map_err(EstimatorError::IncompatibleSpace)?;
            for fine_id in fine_ids {
                let fine_elem = &fine_mesh.elems[fine_id];
                let order = p_coarse.max(fine_elem.order);
                let quad = RectQuadrature::new(&fine_elem.rect, num_glq_points(order, order));

                let (u_f, u_c) = match (
                    fine.sample_leaf(fine_id, &quad.x, &quad.y),
                    coarse.sample_leaf(coarse_id, &quad.x, &quad.y),
                ) {
                    (Some(u_f), Some(u_c)) => (u_f, u_c),
                    _ => {
                        return Err(EstimatorError::IncompatibleSpace(format!(
                            "missing values on coarse leaf {} or fine leaf {}",
                            coarse_id, fine_id
                        )))
                    }
                };

                let (diff, norm) = h1_squares(
                    &quad,
                    [&u_f.values, &u_f.dx, &u_f.dy],
                    [&u_c.values, &u_c.dx, &u_c.dy],
                );
                err_sq += diff;
                ref_sq += norm;
            }

            trace!("elem {}: squared error {:.6e}", coarse_id, err_sq);
            Ok((coarse_id, err_sq, ref_sq))
        })
        .collect::<Result<Vec<_>, EstimatorError>>()?;

    ErrorEstimate::from_squares(squares)
}

/// Compute the true H1 error of `coarse` on each of its leaves, normalized by the H1 norm of the exact solution
pub fn exact_error(coarse: &Solution, exact: &dyn ExactSolution) -> Result<ErrorEstimate, EstimatorError> {
    let mesh = coarse.space().mesh();

    let squares = mesh
        .leaf_ids()
        .into_par_iter()
        .map(|elem_id| {
            let elem = &mesh.elems[elem_id];
            let num_points =
                (elem.order as usize + EXACT_QUADRATURE_OVERHEAD).min(MAX_TABULATED_GLQ_POINTS);
            let quad = RectQuadrature::new(&elem.rect, num_points);

            let u_c = coarse
                .sample_leaf(elem_id, &quad.x, &quad.y)
                .ok_or_else(|| EstimatorError::IncompatibleSpace(format!("no values on leaf {}", elem_id)))?;
            let u = sample_exact(exact, &quad);

            let (diff, norm) = h1_squares(
                &quad,
                [&u[0], &u[1], &u[2]],
                [&u_c.values, &u_c.dx, &u_c.dy],
            );
            Ok((elem_id, diff, norm))
        })
        .collect::<Result<Vec<_>, EstimatorError>>()?;

    ErrorEstimate::from_squares(squares)
}

// [values, dx, dy] of the exact solution over a quadrature grid
fn sample_exact(exact: &dyn ExactSolution, quad: &RectQuadrature) -> [Vec<Vec<f64>>; 3] {
    let mut samples = [
        vec![vec![0.0; quad.y.len()]; quad.x.len()],
        vec![vec![0.0; quad.y.len()]; quad.x.len()],
        vec![vec![0.0; quad.y.len()]; quad.x.len()],
    ];
    for (m, x) in quad.x.iter().enumerate() {
        for (n, y) in quad.y.iter().enumerate() {
            let [gx, gy] = exact.gradient(*x, *y);
            samples[0][m][n] = exact.value(*x, *y);
            samples[1][m][n] = gx;
            samples[2][m][n] = gy;
        }
    }
    samples
}

/// H1 norm of an exact solution over a set of rectangles
pub fn exact_norm(exact: &dyn ExactSolution, rects: &[Rect], num_points: usize) -> f64 {
    rects
        .iter()
        .map(|rect| {
            let quad = RectQuadrature::new(rect, num_points);
            let [u, ux, uy] = sample_exact(exact, &quad);
            quad.integrate(|m, n| u[m][n].powi(2) + ux[m][n].powi(2) + uy[m][n].powi(2))
        })
        .sum::<f64>()
        .sqrt()
}

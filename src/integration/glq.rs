use nalgebra::{DMatrix, SymmetricEigen};
use std::sync::OnceLock;

/// Largest GLQ rule kept in the shared table. Larger requests are computed on the fly
pub const MAX_TABULATED_GLQ_POINTS: usize = 32;

/// A set of Gauss-Legendre-Quadrature points and weights over `(-1, 1)`
#[derive(Clone, Debug)]
pub struct GaussRule {
    pub points: Vec<f64>,
    pub weights: Vec<f64>,
}

impl GaussRule {
    pub fn new(n: usize) -> Self {
        let (points, weights) = gauss_quadrature_points(n);
        Self { points, weights }
    }
}

static GLQ_TABLE: OnceLock<Vec<GaussRule>> = OnceLock::new();

/// Get an `n` point GLQ rule from the shared table
///
/// ```
/// use hp_adapt::integration::gauss_rule;
///
/// let rule = gauss_rule(4);
/// assert_eq!(rule.points.len(), 4);
/// assert!((rule.weights.iter().sum::<f64>() - 2.0).abs() < 1e-12);
/// ```
pub fn gauss_rule(n: usize) -> &'static GaussRule {
    assert!(
        (1..=MAX_TABULATED_GLQ_POINTS).contains(&n),
        "GLQ rules are only tabulated for 1..={} points; cannot get {} point rule!",
        MAX_TABULATED_GLQ_POINTS,
        n
    );

    let table = GLQ_TABLE.get_or_init(|| (1..=MAX_TABULATED_GLQ_POINTS).map(GaussRule::new).collect());
    &table[n - 1]
}

/// 2D Gauss Legendre Quadrature integral of some function F defined over an m by n rectangular region.
/// ```
/// use hp_adapt::integration::glq::*;
///
/// // define glq points over `(-1, 1)` in both directions
/// let (u_points, u_weights) = gauss_quadrature_points(10);
/// let (v_points, v_weights) = gauss_quadrature_points(10);
///
/// // compute the integral of (u^2 * v^2)
/// let solution = real_gauss_quad(&u_weights, &v_weights, |m, n| {
///    u_points[m].powi(2) * v_points[n].powi(2)
/// });
///
/// assert!((solution - 4.0 / 9.0).abs() < 1e-12);
///
/// ```
pub fn real_gauss_quad<F>(u_weights: &[f64], v_weights: &[f64], integrand: F) -> f64
where
    F: Fn(usize, usize) -> f64,
{
    let mut solution = 0.0;
    for (m, u_w) in u_weights.iter().enumerate() {
        let mut inner_solution = 0.0;
        for (n, v_w) in v_weights.iter().enumerate() {
            inner_solution += integrand(m, n) * v_w;
        }
        solution += inner_solution * u_w;
    }
    solution
}

/// Get a set of n Gauss-Legendre-Quadrature Integration points and weights over `(-1, 1)` (Golub-Welsch)
///
/// ```
/// use hp_adapt::integration::glq::*;
///
/// let (points, weights) = gauss_quadrature_points(10);
/// assert_eq!(points.len(), 10);
/// assert_eq!(weights.len(), 10);
/// assert!(points.iter().sum::<f64>().abs() < 1e-12);
/// ```
// https://en.wikipedia.org/wiki/Gaussian_quadrature#Gauss%E2%80%93Legendre_quadrature
pub fn gauss_quadrature_points(n: usize) -> (Vec<f64>, Vec<f64>) {
    if n == 1 {
        return (vec![0.0], vec![2.0]);
    }

    let betas: Vec<f64> = (1..n)
        .map(|i| 0.5 / (1.0 - (2.0 * i as f64).powi(-2)).sqrt())
        .collect();

    let polymat: DMatrix<f64> = DMatrix::from_fn(n, n, |r, c| {
        if r == c + 1 {
            betas[r - 1]
        } else if c == r + 1 {
            betas[c - 1]
        } else {
            0.0
        }
    });

    let eigen_decomp = SymmetricEigen::new(polymat);

    let mut xw: Vec<(f64, f64)> = eigen_decomp
        .eigenvalues
        .iter()
        .cloned()
        .zip(
            eigen_decomp
                .eigenvectors
                .row(0)
                .iter()
                .map(|weight| (*weight).powi(2) * 2.0),
        )
        .collect();

    xw.sort_by(|a, b| a.0.total_cmp(&b.0));

    xw.drain(0..).unzip()
}

/// Scale a set of Gauss-Legendre-Quadrature Integration points to fall within a specific range
///
/// ```
/// use hp_adapt::integration::glq::*;
/// let (points, weights) = gauss_quadrature_points(10);
///
/// // scale the points to the range `(-0.75, 0.25)`
/// let (scale, points_scaled) = scale_gauss_quad_points(&points, -0.75, 0.25);
///
/// assert!(points_scaled.iter().all(|p| *p > -0.75 && *p < 0.25));
/// assert!((0.5 - scale).abs() < 1e-12);
/// ```
pub fn scale_gauss_quad_points(points: &[f64], min: f64, max: f64) -> (f64, Vec<f64>) {
    let scale_factor = (max - min) / 2.0;
    let offset = (max + min) / 2.0;

    (
        scale_factor,
        points
            .iter()
            .map(|x| x * scale_factor + offset)
            .collect::<Vec<f64>>(),
    )
}

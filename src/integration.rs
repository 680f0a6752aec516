/// Methods to assist in Gauss-Legendre-Quadrature integration
pub mod glq;

pub use glq::{gauss_rule, GaussRule};

use crate::domain::mesh::elem::Rect;

/// Number of GLQ points used along each direction when integrating products of two polynomials of the given orders
pub fn num_glq_points(order_a: u8, order_b: u8) -> usize {
    (order_a as usize + order_b as usize) / 2 + 2
}

/// A tensor-product GLQ grid mapped onto a rectangle in real space
///
/// Weights already include the Jacobian of the `(-1, 1)^2 -> rect` mapping.
pub struct RectQuadrature {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub wx: Vec<f64>,
    pub wy: Vec<f64>,
}

impl RectQuadrature {
    pub fn new(rect: &Rect, num_points: usize) -> Self {
        let rule = gauss_rule(num_points);
        let (sx, x) = glq::scale_gauss_quad_points(&rule.points, rect.x[0], rect.x[1]);
        let (sy, y) = glq::scale_gauss_quad_points(&rule.points, rect.y[0], rect.y[1]);

        Self {
            x,
            y,
            wx: rule.weights.iter().map(|w| w * sx).collect(),
            wy: rule.weights.iter().map(|w| w * sy).collect(),
        }
    }

    /// Integrate some function over the grid. The integrand receives the `x` and `y` point indices
    pub fn integrate<F>(&self, integrand: F) -> f64
    where
        F: Fn(usize, usize) -> f64,
    {
        glq::real_gauss_quad(&self.wx, &self.wy, integrand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_quadrature_integrates_polynomials() {
        let rect = Rect::new([0.0, 2.0], [-1.0, 0.5]);
        let q = RectQuadrature::new(&rect, num_glq_points(3, 3));

        // ∫∫ x^3 y^2 dx dy = [x^4/4]_0^2 * [y^3/3]_-1^0.5 = 4 * (0.125 + 1) / 3
        let expected = 4.0 * (0.125 + 1.0) / 3.0;
        let computed = q.integrate(|m, n| q.x[m].powi(3) * q.y[n].powi(2));

        assert!((computed - expected).abs() < 1e-12);
    }
}

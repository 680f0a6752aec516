use crate::domain::mesh::MAX_POLYNOMIAL_ORDER;
use std::f64::consts::PI;
use std::sync::OnceLock;

/// Tolerance used when iterating the Gauss-Lobatto node positions
const GLL_TOLERANCE: f64 = 1e-15;
const GLL_MAX_ITERATIONS: usize = 100;

/// Get the `order + 1` Gauss-Lobatto-Legendre points over `[-1, 1]` in ascending order
///
/// The interior points are the roots of `P'_order`, found with a Newton iteration started from the Chebyshev-Gauss-Lobatto points.
///
/// ```
/// use hp_adapt::basis::gll_points;
///
/// let points = gll_points(2);
/// assert_eq!(points.len(), 3);
/// assert!((points[0] + 1.0).abs() < 1e-15);
/// assert!(points[1].abs() < 1e-15);
/// assert!((points[2] - 1.0).abs() < 1e-15);
/// ```
pub fn gll_points(order: u8) -> Vec<f64> {
    assert!(order >= 1, "GLL points are only defined for orders >= 1!");
    let n = order as usize;

    let mut x: Vec<f64> = (0..=n)
        .map(|i| -(PI * i as f64 / n as f64).cos())
        .collect();

    for _ in 0..GLL_MAX_ITERATIONS {
        let mut max_delta: f64 = 0.0;

        for xi in x.iter_mut() {
            // legendre recurrence up to P_n
            let mut p_prev = 1.0;
            let mut p_curr = *xi;
            for k in 2..=n {
                let k_ = k as f64;
                let p_next = ((2.0 * k_ - 1.0) * *xi * p_curr - (k_ - 1.0) * p_prev) / k_;
                p_prev = p_curr;
                p_curr = p_next;
            }

            let delta = (*xi * p_curr - p_prev) / ((n as f64 + 1.0) * p_curr);
            *xi -= delta;
            max_delta = max_delta.max(delta.abs());
        }

        if max_delta < GLL_TOLERANCE {
            break;
        }
    }

    // the endpoints are fixed points of the iteration, but pin them to avoid roundoff
    x[0] = -1.0;
    x[n] = 1.0;
    x
}

/// One dimensional Lagrange polynomials of some order, interpolating at the GLL points
#[derive(Clone, Debug)]
pub struct LagrangeBasis {
    pub order: u8,
    pub nodes: Vec<f64>,
    denominators: Vec<f64>,
}

impl LagrangeBasis {
    pub fn new(order: u8) -> Self {
        let nodes = gll_points(order);
        let denominators = (0..nodes.len())
            .map(|i| {
                nodes
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, x_j)| nodes[i] - x_j)
                    .product()
            })
            .collect();

        Self {
            order,
            nodes,
            denominators,
        }
    }

    /// Number of basis functions (`order + 1`)
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Evaluate all basis functions at `x`
    pub fn values(&self, x: f64) -> Vec<f64> {
        (0..self.len())
            .map(|i| {
                self.nodes
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, x_j)| x - x_j)
                    .product::<f64>()
                    / self.denominators[i]
            })
            .collect()
    }

    /// Evaluate the first derivative of all basis functions at `x`
    pub fn derivatives(&self, x: f64) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .map(|i| {
                let mut sum = 0.0;
                for k in (0..n).filter(|k| *k != i) {
                    sum += (0..n)
                        .filter(|j| *j != i && *j != k)
                        .map(|j| x - self.nodes[j])
                        .product::<f64>();
                }
                sum / self.denominators[i]
            })
            .collect()
    }

    /// Tabulate values and derivatives over a set of points in `[-1, 1]`
    pub fn sample(&self, points: &[f64]) -> ShapeSamples {
        let mut values = vec![vec![0.0; points.len()]; self.len()];
        let mut derivatives = vec![vec![0.0; points.len()]; self.len()];

        for (m, x) in points.iter().enumerate() {
            for (i, (v, d)) in self
                .values(*x)
                .into_iter()
                .zip(self.derivatives(*x))
                .enumerate()
            {
                values[i][m] = v;
                derivatives[i][m] = d;
            }
        }

        ShapeSamples {
            values,
            derivatives,
        }
    }
}

/// Values and derivatives of a [LagrangeBasis] over some set of points, indexed as `[basis_fn][point]`
#[derive(Clone, Debug)]
pub struct ShapeSamples {
    pub values: Vec<Vec<f64>>,
    pub derivatives: Vec<Vec<f64>>,
}

static BASIS_TABLE: OnceLock<Vec<LagrangeBasis>> = OnceLock::new();

/// Get the shared [LagrangeBasis] of some order
pub fn lagrange_basis(order: u8) -> &'static LagrangeBasis {
    assert!(
        order >= 1 && order <= MAX_POLYNOMIAL_ORDER,
        "Lagrange bases are only available for orders 1..={}; cannot get order {}!",
        MAX_POLYNOMIAL_ORDER,
        order
    );

    let table = BASIS_TABLE.get_or_init(|| (1..=MAX_POLYNOMIAL_ORDER).map(LagrangeBasis::new).collect());
    &table[order as usize - 1]
}

/// Evaluate a tensor-product nodal expansion and its parametric gradient at `(xi, eta)`
///
/// Coefficients are indexed as `[j * (order + 1) + i]` where `i` runs along `xi` and `j` along `eta`.
pub fn eval_tensor(order: u8, coefficients: &[f64], xi: f64, eta: f64) -> (f64, [f64; 2]) {
    let basis = lagrange_basis(order);
    let n = basis.len();
    debug_assert_eq!(coefficients.len(), n * n);

    let [u_vals, u_ders] = [basis.values(xi), basis.derivatives(xi)];
    let [v_vals, v_ders] = [basis.values(eta), basis.derivatives(eta)];

    let mut value = 0.0;
    let mut gradient = [0.0; 2];
    for j in 0..n {
        for i in 0..n {
            let c = coefficients[j * n + i];
            value += c * u_vals[i] * v_vals[j];
            gradient[0] += c * u_ders[i] * v_vals[j];
            gradient[1] += c * u_vals[i] * v_ders[j];
        }
    }

    (value, gradient)
}

/// Map a real coordinate into the `[-1, 1]` parametric range of `[min, max]`
#[inline]
pub fn to_parametric(x: f64, [min, max]: [f64; 2]) -> f64 {
    2.0 * (x - min) / (max - min) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gll_points_are_symmetric_and_sorted() {
        for order in 1..=MAX_POLYNOMIAL_ORDER {
            let points = gll_points(order);
            assert_eq!(points.len(), order as usize + 1);

            for w in points.windows(2) {
                assert!(w[0] < w[1]);
            }
            for (a, b) in points.iter().zip(points.iter().rev()) {
                assert!((a + b).abs() < 1e-13);
            }
        }
    }

    #[test]
    fn gll_order_four_reference() {
        // ±1, ±sqrt(3/7), 0
        let points = gll_points(4);
        let s = (3.0_f64 / 7.0).sqrt();
        for (p, r) in points.iter().zip([-1.0, -s, 0.0, s, 1.0]) {
            assert!((p - r).abs() < 1e-14);
        }
    }

    #[test]
    fn lagrange_basis_is_nodal_and_partitions_unity() {
        let basis = lagrange_basis(6);

        for (i, x_i) in basis.nodes.iter().enumerate() {
            for (j, v) in basis.values(*x_i).iter().enumerate() {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((v - expected).abs() < 1e-12);
            }
        }

        for x in [-0.93, -0.1, 0.37, 0.8] {
            assert!((basis.values(x).iter().sum::<f64>() - 1.0).abs() < 1e-12);
            assert!(basis.derivatives(x).iter().sum::<f64>().abs() < 1e-10);
        }
    }

    #[test]
    fn lagrange_basis_reproduces_polynomial_derivatives() {
        // interpolate f(x) = x^3 - 2x with a 4th order basis; interpolation is exact
        let basis = lagrange_basis(4);
        let coeffs: Vec<f64> = basis.nodes.iter().map(|x| x.powi(3) - 2.0 * x).collect();

        for x in [-0.7, 0.05, 0.66] {
            let df: f64 = basis
                .derivatives(x)
                .iter()
                .zip(coeffs.iter())
                .map(|(d, c)| d * c)
                .sum();
            assert!((df - (3.0 * x * x - 2.0)).abs() < 1e-11);
        }
    }

    #[test]
    fn tensor_expansion_of_bilinear_function() {
        // f(u, v) = 1 + u - 2uv sampled at the nodes of a 3rd order basis
        let basis = lagrange_basis(3);
        let n = basis.len();
        let mut coeffs = vec![0.0; n * n];
        for j in 0..n {
            for i in 0..n {
                let (u, v) = (basis.nodes[i], basis.nodes[j]);
                coeffs[j * n + i] = 1.0 + u - 2.0 * u * v;
            }
        }

        let (value, [du, dv]) = eval_tensor(3, &coeffs, 0.3, -0.6);
        assert!((value - (1.0 + 0.3 + 2.0 * 0.3 * 0.6)).abs() < 1e-12);
        assert!((du - (1.0 + 1.2)).abs() < 1e-12);
        assert!((dv + 0.6).abs() < 1e-12);
    }

    #[test]
    fn parametric_mapping() {
        assert!((to_parametric(0.25, [0.0, 0.5])).abs() < 1e-15);
        assert!((to_parametric(-1.0, [-1.0, 0.0]) + 1.0).abs() < 1e-15);
    }
}

use crate::basis::{lagrange_basis, to_parametric};
use crate::domain::mesh::elem::{Point, Rect};
use crate::domain::space::Space;

use std::collections::BTreeMap;
use std::sync::Arc;

/// A discrete field over an [Space]
///
/// Holds the values of the free degrees of freedom along with the resulting nodal values on every leaf.
/// Immutable once created, and tied to the exact Space it was computed on.
#[derive(Clone, Debug)]
pub struct Solution {
    space: Arc<Space>,
    coefficients: Vec<f64>,
    local_values: BTreeMap<usize, Vec<f64>>,
}

/// Values and real-space derivatives of a field over a tensor grid of points, indexed `[x_idx][y_idx]`
#[derive(Clone, Debug)]
pub struct FieldSamples {
    pub values: Vec<Vec<f64>>,
    pub dx: Vec<Vec<f64>>,
    pub dy: Vec<Vec<f64>>,
}

impl Solution {
    pub fn new(space: Arc<Space>, coefficients: Vec<f64>) -> Self {
        assert_eq!(
            coefficients.len(),
            space.num_dofs(),
            "Number of coefficients does not match the Space; cannot build Solution!"
        );

        let local_values = space
            .local_maps()
            .map(|(elem_id, map)| (elem_id, map.local_values(&coefficients)))
            .collect();

        Self {
            space,
            coefficients,
            local_values,
        }
    }

    pub fn space(&self) -> &Arc<Space> {
        &self.space
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn num_dofs(&self) -> usize {
        self.coefficients.len()
    }

    /// Nodal values on a leaf (see [LocalMap](crate::domain::space::LocalMap) for the layout)
    pub fn local_values(&self, elem_id: usize) -> Option<&[f64]> {
        self.local_values.get(&elem_id).map(|v| v.as_slice())
    }

    /// Value and gradient on a particular leaf
    pub fn eval_on_leaf(&self, elem_id: usize, point: &Point) -> Option<(f64, [f64; 2])> {
        let values = self.local_values.get(&elem_id)?;
        let elem = &self.space.mesh().elems[elem_id];
        let (value, [du, dv]) = crate::basis::eval_tensor(
            elem.order,
            values,
            to_parametric(point.x, elem.rect.x),
            to_parametric(point.y, elem.rect.y),
        );
        Some((
            value,
            [2.0 * du / elem.rect.width(), 2.0 * dv / elem.rect.height()],
        ))
    }

    /// Value at a point in the domain. Returns `None` outside of the mesh.
    pub fn value(&self, x: f64, y: f64) -> Option<f64> {
        let point = Point::new(x, y);
        let elem_id = self.space.leaf_containing(&point)?;
        self.eval_on_leaf(elem_id, &point).map(|(v, _)| v)
    }

    /// Gradient at a point in the domain. Returns `None` outside of the mesh.
    pub fn gradient(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        let point = Point::new(x, y);
        let elem_id = self.space.leaf_containing(&point)?;
        self.eval_on_leaf(elem_id, &point).map(|(_, g)| g)
    }

    /// Sample the field on leaf `elem_id` over the tensor grid `xs` by `ys` (real coordinates inside the leaf)
    pub fn sample_leaf(&self, elem_id: usize, xs: &[f64], ys: &[f64]) -> Option<FieldSamples> {
        let values = self.local_values.get(&elem_id)?;
        let elem = &self.space.mesh().elems[elem_id];
        Some(sample_expansion(elem.order, &elem.rect, values, xs, ys))
    }
}

/// Sample a nodal tensor expansion on `rect` over a tensor grid of real points
pub fn sample_expansion(order: u8, rect: &Rect, coefficients: &[f64], xs: &[f64], ys: &[f64]) -> FieldSamples {
    let basis = lagrange_basis(order);
    let np = basis.len();

    let u = basis.sample(&xs.iter().map(|x| to_parametric(*x, rect.x)).collect::<Vec<_>>());
    let v = basis.sample(&ys.iter().map(|y| to_parametric(*y, rect.y)).collect::<Vec<_>>());
    let [sx, sy] = [2.0 / rect.width(), 2.0 / rect.height()];

    // contract over the x-direction first: t[j][m] = sum_i c_ij u_i(x_m)
    let mut t = vec![vec![0.0; xs.len()]; np];
    let mut t_dx = vec![vec![0.0; xs.len()]; np];
    for j in 0..np {
        for i in 0..np {
            let c = coefficients[j * np + i];
            if c == 0.0 {
                continue;
            }
            for m in 0..xs.len() {
                t[j][m] += c * u.values[i][m];
                t_dx[j][m] += c * u.derivatives[i][m];
            }
        }
    }

    let mut samples = FieldSamples {
        values: vec![vec![0.0; ys.len()]; xs.len()],
        dx: vec![vec![0.0; ys.len()]; xs.len()],
        dy: vec![vec![0.0; ys.len()]; xs.len()],
    };
    for m in 0..xs.len() {
        for n in 0..ys.len() {
            for j in 0..np {
                samples.values[m][n] += t[j][m] * v.values[j][n];
                samples.dx[m][n] += t_dx[j][m] * v.values[j][n] * sx;
                samples.dy[m][n] += t[j][m] * v.derivatives[j][n] * sy;
            }
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bc::EssentialBcs;
    use crate::domain::mesh::Mesh;

    fn interpolated(g: fn(f64, f64) -> f64) -> Solution {
        // every node is fixed, so the solution is the interpolant of g
        let mut mesh = Mesh::from_file("./test_input/square_2x2.json").unwrap();
        mesh.set_global_expansion_orders(1).unwrap();
        let space = Space::new(mesh, Arc::new(EssentialBcs::new(g))).unwrap();
        let n = space.num_dofs();
        // the single interior vertex sits at (0.5, 0.5)
        Solution::new(Arc::new(space), vec![g(0.5, 0.5); n])
    }

    #[test]
    fn point_evaluation() {
        let sol = interpolated(|x, y| 2.0 * x - y + 0.5);

        assert!((sol.value(0.3, 0.8).unwrap() - (0.6 - 0.8 + 0.5)).abs() < 1e-13);
        let [gx, gy] = sol.gradient(0.9, 0.1).unwrap();
        assert!((gx - 2.0).abs() < 1e-12);
        assert!((gy + 1.0).abs() < 1e-12);

        assert!(sol.value(1.5, 0.5).is_none());
    }

    #[test]
    fn grid_sampling_matches_point_evaluation() {
        let sol = interpolated(|x, y| x * y);
        let xs = [0.55, 0.7, 0.95];
        let ys = [0.01, 0.25, 0.4];
        let samples = sol.sample_leaf(1, &xs, &ys).unwrap();

        for (m, x) in xs.iter().enumerate() {
            for (n, y) in ys.iter().enumerate() {
                let (v, [gx, gy]) = sol.eval_on_leaf(1, &Point::new(*x, *y)).unwrap();
                assert!((samples.values[m][n] - v).abs() < 1e-13);
                assert!((samples.dx[m][n] - gx).abs() < 1e-12);
                assert!((samples.dy[m][n] - gy).abs() < 1e-12);
            }
        }
    }
}

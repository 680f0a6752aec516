use super::{sparse_matrix::SparseMatrix, LinalgError};
use nalgebra::{DMatrix, DVector};

/// Largest system that is factorized densely
pub const MAX_DENSE_SIZE: usize = 400;

/// Smallest acceptable ratio between the smallest and largest squared pivots of the Cholesky factor
const MIN_PIVOT_RATIO: f64 = 1e-12;

/// Solve a small symmetric positive definite system with Nalgebra's dense Cholesky Decomposition
///
/// The sparse matrix is cast as a dense matrix, so this is only suitable while the system is small.
/// Fails if the matrix is not positive definite or if the factor is numerically singular.
pub fn nalgebra_solve_spd(a: &SparseMatrix, b: &[f64]) -> Result<Vec<f64>, LinalgError> {
    if a.dimension > MAX_DENSE_SIZE {
        return Err(LinalgError::ProblemTooLarge(a.dimension));
    }
    let a_mat = DMatrix::from(a);

    let cholesky_decomp = a_mat.cholesky().ok_or(LinalgError::NotPositiveDefinite)?;

    let pivots: Vec<f64> = cholesky_decomp.l_dirty().diagonal().iter().map(|d| d * d).collect();
    let max_pivot = pivots.iter().cloned().fold(0.0, f64::max);
    let min_pivot = pivots.iter().cloned().fold(f64::INFINITY, f64::min);
    if !(min_pivot / max_pivot >= MIN_PIVOT_RATIO) {
        return Err(LinalgError::IllConditioned(min_pivot / max_pivot));
    }

    let x = cholesky_decomp.solve(&DVector::from_column_slice(b));
    if x.iter().all(|x_i| x_i.is_finite()) {
        Ok(x.iter().cloned().collect())
    } else {
        Err(LinalgError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_small_spd_system() {
        // 1D Laplacian
        let n = 6;
        let mut a = SparseMatrix::new(n);
        for i in 0..n {
            a.insert([i, i], 2.0);
            if i + 1 < n {
                a.insert([i, i + 1], -1.0);
            }
        }
        let x_exact: Vec<f64> = (0..n).map(|i| (i as f64).sin()).collect();
        let mut b = vec![0.0; n];
        for i in 0..n {
            b[i] = 2.0 * x_exact[i]
                - if i > 0 { x_exact[i - 1] } else { 0.0 }
                - if i + 1 < n { x_exact[i + 1] } else { 0.0 };
        }

        let x = nalgebra_solve_spd(&a, &b).unwrap();
        for (x_i, e_i) in x.iter().zip(x_exact.iter()) {
            assert!((x_i - e_i).abs() < 1e-12);
        }
    }

    #[test]
    fn singular_system_is_rejected() {
        // pure Neumann 1D Laplacian: constant null space
        let mut a = SparseMatrix::new(3);
        a.insert_group(vec![
            ([0, 0], 1.0),
            ([1, 1], 2.0),
            ([2, 2], 1.0),
            ([0, 1], -1.0),
            ([1, 2], -1.0),
        ]);

        assert!(nalgebra_solve_spd(&a, &[1.0, 0.0, -1.0]).is_err());
    }
}

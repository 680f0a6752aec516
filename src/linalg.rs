/// Sparse Cholesky solves of large systems via faer
pub mod faer_solve;
/// Dense Cholesky solves of small systems via Nalgebra
pub mod nalgebra_solve;
/// Sparsely Packed Matrix
pub mod sparse_matrix;

use faer_solve::faer_cholesky_solve;
use log::debug;
use nalgebra_solve::{nalgebra_solve_spd, MAX_DENSE_SIZE};
use nalgebra_sparse::CscMatrix;
use rayon::prelude::*;
use sparse_matrix::SparseMatrix;
use std::sync::mpsc::channel;

/// Symmetric Linear System
///
/// Au = b
#[derive(Clone, Debug)]
pub struct LinearSystem {
    /// A Matrix
    pub a: SparseMatrix,
    /// Right hand side
    pub b: Vec<f64>,
}

/// The contribution of a single element to a [LinearSystem]
pub struct ElemContribution {
    pub matrix_entries: Vec<([usize; 2], f64)>,
    pub rhs_entries: Vec<(usize, f64)>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            a: SparseMatrix::new(num_dofs),
            b: vec![0.0; num_dofs],
        }
    }

    pub fn dimension(&self) -> usize {
        self.a.dimension
    }

    pub fn add_contribution(&mut self, contribution: ElemContribution) {
        self.a.insert_group(contribution.matrix_entries);
        for (idx, value) in contribution.rhs_entries {
            self.b[idx] += value;
        }
    }

    /// Solve the system with a Cholesky factorization: dense while it is small, sparse otherwise
    pub fn solve(&self) -> Result<Vec<f64>, LinalgError> {
        let n = self.dimension();
        if n == 0 {
            return Ok(Vec::new());
        }

        if n <= MAX_DENSE_SIZE {
            debug!("Solving {}x{} system with dense Cholesky", n, n);
            nalgebra_solve_spd(&self.a, &self.b)
        } else {
            let csc = CscMatrix::from(&self.a);
            let (x, relative_residual) = faer_cholesky_solve(&csc, &self.b)?;
            debug!(
                "Solved {}x{} system ({} non-zeros) with sparse Cholesky, relative residual {:.3e}",
                n,
                n,
                csc.nnz(),
                relative_residual
            );
            Ok(x)
        }
    }
}

impl ParallelExtend<ElemContribution> for LinearSystem {
    fn par_extend<I>(&mut self, elem_contributions: I)
    where
        I: IntoParallelIterator<Item = ElemContribution>,
    {
        let (sender, receiver) = channel();

        elem_contributions
            .into_par_iter()
            .for_each_with(sender, |s, contribution| {
                s.send(contribution).expect(
                    "Failed to send element contributions over MSPC channel; cannot construct System!",
                )
            });

        receiver
            .iter()
            .for_each(|contribution| self.add_contribution(contribution));
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinalgError {
    #[error("system matrix is not positive definite")]
    NotPositiveDefinite,
    #[error("system matrix is numerically singular ({0:.3e})")]
    IllConditioned(f64),
    #[error("system of size {0} is too large for a dense solve (max {max})", max = MAX_DENSE_SIZE)]
    ProblemTooLarge(usize),
    #[error("non-positive pivot {0} in sparse Cholesky factorization")]
    NonPositivePivot(usize),
    #[error("sparse Cholesky factorization failed: {0}")]
    Factorization(String),
    #[error("non-finite values in solution")]
    NonFinite,
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2D five point Laplacian on an m x m grid
    fn grid_system(m: usize) -> LinearSystem {
        let n = m * m;
        let mut system = LinearSystem::new(n);
        system.par_extend((0..n).into_par_iter().map(|k| {
            let (i, j) = (k % m, k / m);
            let mut matrix_entries = vec![([k, k], 4.0)];
            if i + 1 < m {
                matrix_entries.push(([k, k + 1], -1.0));
            }
            if j + 1 < m {
                matrix_entries.push(([k, k + m], -1.0));
            }
            ElemContribution {
                matrix_entries,
                rhs_entries: vec![(k, 1.0)],
            }
        }));
        system
    }

    #[test]
    fn dense_and_sparse_solves_agree() {
        // 21 x 21 = 441 unknowns is above the dense limit
        let large = grid_system(21);
        assert!(large.dimension() > MAX_DENSE_SIZE);
        let x_sparse = large.solve().unwrap();

        let a = nalgebra::DMatrix::from(&large.a);
        let b = nalgebra::DVector::from_column_slice(&large.b);
        let x_dense = a.cholesky().unwrap().solve(&b);

        for (a, b) in x_sparse.iter().zip(x_dense.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn small_systems_use_dense_solve() {
        let system = grid_system(5);
        let x = system.solve().unwrap();

        // residual check
        let csc = CscMatrix::from(&system.a);
        let ax = &csc * &nalgebra::DMatrix::from_column_slice(x.len(), 1, &x);
        for (a, b) in ax.iter().zip(system.b.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_system() {
        assert!(LinearSystem::new(0).solve().unwrap().is_empty());
    }
}

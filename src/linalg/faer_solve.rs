use super::LinalgError;
use faer::linalg::cholesky::llt::factor::LltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Llt, SymbolicLlt};
use faer::sparse::linalg::LltError as SparseLltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;

/// Largest acceptable relative residual `|b - Ax| / |b|` of a factorized solve
const MAX_RELATIVE_RESIDUAL: f64 = 1e-8;

// faer takes ownership of a copy of the column structure
fn to_faer(a: &CscMatrix<f64>) -> SparseColMat<usize, f64> {
    // SAFETY: CscMatrix keeps monotone column offsets and sorted, unique, in-bounds row indices
    unsafe {
        SparseColMat::new(
            SymbolicSparseColMat::new_unchecked(
                a.nrows(),
                a.ncols(),
                a.col_offsets().to_vec(),
                None,
                a.row_indices().to_vec(),
            ),
            a.values().to_vec(),
        )
    }
}

/// Solve a sparse symmetric positive definite system with faer's sparse Cholesky (LLᵀ) factorization
///
/// The symbolic analysis picks a fill-reducing ordering, so this scales to the systems of large reference spaces.
/// Returns the solution along with its relative residual.
pub fn faer_cholesky_solve(a: &CscMatrix<f64>, b: &[f64]) -> Result<(Vec<f64>, f64), LinalgError> {
    let n = a.nrows();
    assert_eq!(n, b.len(), "Right hand side does not match the matrix dimension!");

    let csc = to_faer(a);
    let symbolic = SymbolicLlt::try_new(csc.as_ref().symbolic(), faer::Side::Lower)
        .map_err(|err| LinalgError::Factorization(format!("{:?}", err)))?;
    let llt = Llt::try_new_with_symbolic(symbolic, csc.as_ref(), faer::Side::Lower).map_err(|err| match err {
        SparseLltError::Generic(err) => LinalgError::Factorization(format!("{:?}", err)),
        SparseLltError::Numeric(LltError::NonPositivePivot { index }) => LinalgError::NonPositivePivot(index),
    })?;

    let mut rhs = faer::Mat::from_fn(n, 1, |i, _| b[i]);
    llt.solve_in_place(rhs.as_mut());
    let x: Vec<f64> = (0..n).map(|i| rhs[(i, 0)]).collect();

    if !x.iter().all(|x_i| x_i.is_finite()) {
        return Err(LinalgError::NonFinite);
    }

    let ax = a * &DMatrix::from_column_slice(n, 1, &x);
    let b_norm = b.iter().map(|b_i| b_i * b_i).sum::<f64>().sqrt();
    let r_norm = ax
        .iter()
        .zip(b.iter())
        .map(|(ax_i, b_i)| (b_i - ax_i).powi(2))
        .sum::<f64>()
        .sqrt();
    let relative_residual = if b_norm > 0.0 { r_norm / b_norm } else { r_norm };

    if relative_residual <= MAX_RELATIVE_RESIDUAL {
        Ok((x, relative_residual))
    } else {
        Err(LinalgError::IllConditioned(relative_residual))
    }
}

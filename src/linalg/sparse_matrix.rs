use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use std::collections::BTreeMap;

/// Wrapper around a BTreeMap to store square-symmetric matrices in a sparse data structure
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    /// Matrix Entries (upper triangle only)
    entries: BTreeMap<[u32; 2], f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        assert!(
            dimension <= (u32::MAX as usize),
            "Matrix Dimension cannot exceed the size of a u32!"
        );

        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    /// Number of non-zero entries in the full (symmetric) matrix
    pub fn num_entries(&self) -> usize {
        let num_diag = self.entries.keys().filter(|[i, j]| i == j).count();
        2 * self.entries.len() - num_diag
    }

    fn coordinates(&self, [row_idx, col_idx]: [usize; 2]) -> [u32; 2] {
        assert!(
            row_idx < self.dimension,
            "row_idx exceeded matrix dimension; cannot insert value!"
        );
        assert!(
            col_idx < self.dimension,
            "col_idx exceeded matrix dimension; cannot insert value!"
        );

        // dimension is bounded by u32::MAX in the constructor
        if row_idx <= col_idx {
            [row_idx as u32, col_idx as u32]
        } else {
            [col_idx as u32, row_idx as u32]
        }
    }

    /// Add a value into the matrix. Assumes symmetry: row/col order does not matter.
    pub fn insert(&mut self, rc: [usize; 2], value: f64) {
        let coordinates = self.coordinates(rc);
        *self.entries.entry(coordinates).or_insert(0.0) += value;
    }

    /// Insert a group of entries
    pub fn insert_group(&mut self, entry_group: Vec<([usize; 2], f64)>) {
        for (rc, value) in entry_group {
            self.insert(rc, value);
        }
    }

    // Remove the entries from the matrix, replacing them with an empty BTreeMap.
    fn take_entries(&mut self) -> BTreeMap<[u32; 2], f64> {
        std::mem::take(&mut self.entries)
    }

    /// Consume the entries from another sparse matrix leaving it empty.
    pub fn consume_matrix(&mut self, other: &mut Self) {
        assert!(
            self.dimension == other.dimension,
            "Sparse Matrices have different dimensions; cannot consume matrix!"
        );

        for (coordinates, value) in other.take_entries() {
            *self.entries.entry(coordinates).or_insert(0.0) += value;
        }
    }

    /// Iterate over the upper triangle of the matrix.
    pub fn iter_upper_tri(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries
            .iter()
            .map(|(coords, value)| ([coords[0] as usize, coords[1] as usize], *value))
    }

    /// Diagonal entries (zero where nothing was inserted)
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.dimension];
        for ([r, c], v) in self.iter_upper_tri() {
            if r == c {
                diag[r] = v;
            }
        }
        diag
    }
}

impl From<&SparseMatrix> for DMatrix<f64> {
    fn from(sm: &SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(sm.dimension, sm.dimension);

        for ([r, c], v) in sm.iter_upper_tri() {
            dense[(r, c)] = v;
            dense[(c, r)] = v;
        }

        dense
    }
}

impl From<&SparseMatrix> for CscMatrix<f64> {
    fn from(sm: &SparseMatrix) -> Self {
        let mut coo = CooMatrix::new(sm.dimension, sm.dimension);
        for ([r, c], v) in sm.iter_upper_tri() {
            coo.push(r, c, v);
            if r != c {
                coo.push(c, r, v);
            }
        }
        CscMatrix::from(&coo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_insertion() {
        let mut sm = SparseMatrix::new(10);

        sm.insert([0, 0], 1.0);
        sm.insert([0, 0], 1.0);
        sm.insert([9, 9], 10.0);
        sm.insert([4, 3], 0.25);
        sm.insert([0, 8], 0.125);
        sm.insert([8, 0], 0.125);

        let raw_entries = sm.take_entries();

        assert!((raw_entries.get(&[0, 0]).unwrap() - 2.0).abs() < 1e-15);
        assert!((raw_entries.get(&[9, 9]).unwrap() - 10.0).abs() < 1e-15);
        assert!((raw_entries.get(&[3, 4]).unwrap() - 0.25).abs() < 1e-15);
        assert!((raw_entries.get(&[0, 8]).unwrap() - 0.25).abs() < 1e-15);

        assert!(raw_entries.get(&[4, 3]).is_none());
        assert!(raw_entries.get(&[8, 0]).is_none());
    }

    #[test]
    fn consume_another_matrix() {
        let mut sm_a = SparseMatrix::new(5);
        let mut sm_b = SparseMatrix::new(5);

        for i in 0..5 {
            sm_a.insert([i, i], (i + 1) as f64);
            sm_b.insert([i, i], (5 - i) as f64);
        }
        sm_a.insert([0, 4], 0.5);
        sm_a.insert([3, 1], 0.5);
        sm_b.insert([4, 0], -0.5);
        sm_b.insert([2, 3], -0.5);

        sm_a.consume_matrix(&mut sm_b);

        assert_eq!(sm_b.num_entries(), 0);
        assert!(sm_a.diagonal().iter().all(|d| (d - 6.0).abs() < 1e-15));

        let sm_a_entries = sm_a.take_entries();
        assert!((sm_a_entries.get(&[0, 4]).unwrap()).abs() < 1e-15);
        assert!((sm_a_entries.get(&[1, 3]).unwrap() - 0.5).abs() < 1e-15);
        assert!((sm_a_entries.get(&[2, 3]).unwrap() + 0.5).abs() < 1e-15);
        assert!(sm_a_entries.get(&[3, 1]).is_none());
    }

    #[test]
    fn csc_holds_the_full_symmetric_matrix() {
        let mut sm = SparseMatrix::new(4);
        sm.insert_group(vec![
            ([0, 0], 4.0),
            ([1, 1], 3.0),
            ([2, 2], 2.0),
            ([3, 3], 1.0),
            ([0, 2], -1.0),
            ([3, 1], 0.5),
            ([1, 3], 0.25),
        ]);

        let csc = CscMatrix::from(&sm);
        assert_eq!(csc.nnz(), sm.num_entries());

        let x = DMatrix::from_column_slice(4, 1, &[1.0, -2.0, 0.5, 3.0]);
        let y = &csc * &x;
        let expected = DMatrix::from(&sm) * &x;
        for (a, b) in y.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-14);
        }
    }

    #[test]
    #[should_panic]
    fn consume_matrix_of_different_dim() {
        let mut sm_a = SparseMatrix::new(5);
        let mut sm_b = SparseMatrix::new(6);

        sm_a.consume_matrix(&mut sm_b);
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_insertion() {
        let mut sm = SparseMatrix::new(10);
        sm.insert([10, 2], 1.0);
    }
}

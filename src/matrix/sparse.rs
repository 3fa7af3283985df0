//! Compressed sparse row storage for the local (Neumann) matrix of a subdomain.

use crate::core::traits::RowPattern;
use crate::error::BddcError;
use faer::Mat;
use faer::sparse::{SparseRowMat, SymbolicSparseRowMat};
use num_traits::Float;

/// A read-only sparse matrix supporting y = A * x.
pub trait SparseMatrix<T> {
    /// Number of rows.
    fn nrows(&self) -> usize;
    /// Number of columns.
    fn ncols(&self) -> usize;
    /// Compute y = A * x.  `x.len() == ncols()`, `y.len() == nrows()`.
    fn spmv(&self, x: &[T], y: &mut [T]);
}

/// CSR matrix with sorted, duplicate-free column indices in every row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    nrows: usize,
    ncols: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<T>,
}

impl<T: Float> CsrMatrix<T> {
    /// Build a CSR from raw row-ptr, col-idx, and values. Rows are sorted by column; a column
    /// repeated within a row is an error.
    pub fn from_csr(
        nrows: usize,
        ncols: usize,
        row_ptr: Vec<usize>,
        col_idx: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self, BddcError> {
        if row_ptr.len() != nrows + 1 || row_ptr[0] != 0 {
            return Err(BddcError::InvalidInput(format!(
                "row_ptr of length {} for {nrows} rows",
                row_ptr.len()
            )));
        }
        if row_ptr.windows(2).any(|w| w[0] > w[1]) || row_ptr[nrows] != col_idx.len() {
            return Err(BddcError::InvalidInput("row_ptr is not a valid prefix sum".into()));
        }
        if col_idx.len() != values.len() {
            return Err(BddcError::InvalidInput(format!(
                "{} column indices but {} values",
                col_idx.len(),
                values.len()
            )));
        }
        if let Some(&j) = col_idx.iter().find(|&&j| j >= ncols) {
            return Err(BddcError::InvalidInput(format!("column {j} out of range ({ncols})")));
        }
        let mut sorted_cols = Vec::with_capacity(col_idx.len());
        let mut sorted_vals = Vec::with_capacity(values.len());
        for i in 0..nrows {
            let mut row: Vec<(usize, T)> = (row_ptr[i]..row_ptr[i + 1])
                .map(|k| (col_idx[k], values[k]))
                .collect();
            row.sort_by_key(|&(j, _)| j);
            if row.windows(2).any(|w| w[0].0 == w[1].0) {
                return Err(BddcError::InvalidInput(format!("duplicate column in row {i}")));
            }
            for (j, v) in row {
                sorted_cols.push(j);
                sorted_vals.push(v);
            }
        }
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx: sorted_cols,
            values: sorted_vals,
        })
    }

    /// Assemble from `(row, col, value)` triplets, summing duplicates.
    pub fn from_triplets(
        nrows: usize,
        ncols: usize,
        triplets: &[(usize, usize, T)],
    ) -> Result<Self, BddcError> {
        let mut rows: Vec<Vec<(usize, T)>> = vec![Vec::new(); nrows];
        for &(i, j, v) in triplets {
            if i >= nrows || j >= ncols {
                return Err(BddcError::InvalidInput(format!(
                    "entry ({i}, {j}) outside a {nrows}x{ncols} matrix"
                )));
            }
            rows[i].push((j, v));
        }
        let mut row_ptr = Vec::with_capacity(nrows + 1);
        let mut col_idx = Vec::new();
        let mut values = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_by_key(|&(j, _)| j);
            let start = col_idx.len();
            for (j, v) in row {
                if col_idx.len() > start && col_idx[col_idx.len() - 1] == j {
                    let last = values.len() - 1;
                    values[last] = values[last] + v;
                } else {
                    col_idx.push(j);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }
        Ok(Self {
            nrows,
            ncols,
            row_ptr,
            col_idx,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let r = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[r.clone()], &self.values[r])
    }

    /// Entry `(i, j)`, zero when not stored.
    pub fn get(&self, i: usize, j: usize) -> T {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map_or(T::zero(), |k| vals[k])
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Values in storage order; the pattern cannot change.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn diagonal(&self) -> Vec<T> {
        (0..self.nrows.min(self.ncols)).map(|i| self.get(i, i)).collect()
    }

    /// Largest absolute entry.
    pub fn max_abs(&self) -> T {
        self.values.iter().fold(T::zero(), |m, v| m.max(v.abs()))
    }
}

impl CsrMatrix<f64> {
    /// Dense copy of the block `rows × cols`.
    pub fn submatrix_dense(&self, rows: &[usize], cols: &[usize]) -> Mat<f64> {
        let mut position = vec![usize::MAX; self.ncols];
        for (jj, &j) in cols.iter().enumerate() {
            position[j] = jj;
        }
        let mut sub = Mat::zeros(rows.len(), cols.len());
        for (ii, &i) in rows.iter().enumerate() {
            let (cs, vs) = self.row(i);
            for (&j, &v) in cs.iter().zip(vs) {
                let jj = position[j];
                if jj != usize::MAX {
                    sub[(ii, jj)] = v;
                }
            }
        }
        sub
    }

    /// The same matrix in faer's sparse row format.
    pub fn to_faer(&self) -> SparseRowMat<usize, f64> {
        let symbolic = SymbolicSparseRowMat::new_checked(
            self.nrows,
            self.ncols,
            self.row_ptr.clone(),
            None,
            self.col_idx.clone(),
        );
        SparseRowMat::new(symbolic, self.values.clone())
    }

    pub fn to_dense(&self) -> Mat<f64> {
        self.to_faer().to_dense()
    }
}

impl<T: Float> SparseMatrix<T> for CsrMatrix<T> {
    fn nrows(&self) -> usize {
        self.nrows
    }
    fn ncols(&self) -> usize {
        self.ncols
    }
    fn spmv(&self, x: &[T], y: &mut [T]) {
        assert_eq!(x.len(), self.ncols);
        assert_eq!(y.len(), self.nrows);
        for (i, yi) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(i);
            *yi = cols
                .iter()
                .zip(vals)
                .fold(T::zero(), |acc, (&j, &v)| acc + v * x[j]);
        }
    }
}

impl<T: Float> RowPattern for CsrMatrix<T> {
    fn row_indices(&self, i: usize) -> &[usize] {
        self.row(i).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triplets_sum_duplicates_and_sort() {
        let a = CsrMatrix::from_triplets(2, 3, &[(0, 2, 1.0), (0, 0, 2.0), (0, 2, 0.5), (1, 1, 4.0)])
            .unwrap();
        assert_eq!(a.row(0), (&[0usize, 2][..], &[2.0, 1.5][..]));
        assert_eq!(a.get(1, 1), 4.0);
        assert_eq!(a.get(1, 0), 0.0);
        let mut y = vec![0.0; 2];
        a.spmv(&[1.0, 1.0, 2.0], &mut y);
        assert_eq!(y, vec![5.0, 4.0]);
    }

    #[test]
    fn from_csr_rejects_repeated_column() {
        assert!(CsrMatrix::from_csr(1, 2, vec![0, 2], vec![1, 1], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn dense_block_extraction() {
        let a = CsrMatrix::from_triplets(3, 3, &[(0, 0, 1.0), (1, 2, 3.0), (2, 1, 5.0), (2, 2, 6.0)])
            .unwrap();
        let sub = a.submatrix_dense(&[2, 1], &[2, 1]);
        assert_eq!(sub[(0, 0)], 6.0);
        assert_eq!(sub[(0, 1)], 5.0);
        assert_eq!(sub[(1, 0)], 3.0);
        assert_eq!(sub[(1, 1)], 0.0);
        let dense = a.to_dense();
        assert_eq!(dense[(2, 1)], 5.0);
    }
}

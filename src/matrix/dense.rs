//! Dense helpers on top of Faer.
//!
//! Local interface blocks are small, so everything here works on `faer::Mat<f64>` directly:
//! block extraction, matrix-vector products on slices, the lower Cholesky factor with its
//! triangular solves, the symmetric eigen-decomposition, and Gram-Schmidt through Faer
//! products.

use crate::error::BddcError;
use faer::linalg::matmul::matmul;
use faer::linalg::solvers::LltError;
use faer::linalg::triangular_solve::{solve_lower_triangular_in_place, solve_upper_triangular_in_place};
use faer::{Accum, Mat, MatMut, MatRef, Par, Side};

/// Copy of `a[rows, cols]`.
pub fn submatrix(a: &Mat<f64>, rows: &[usize], cols: &[usize]) -> Mat<f64> {
    Mat::from_fn(rows.len(), cols.len(), |i, j| a[(rows[i], cols[j])])
}

/// Construct from raw column-major storage.
pub fn from_column_major(nrows: usize, ncols: usize, data: &[f64]) -> Mat<f64> {
    MatRef::from_column_major_slice(data, nrows, ncols).to_owned()
}

fn col_view(x: &[f64]) -> MatRef<'_, f64> {
    MatRef::from_column_major_slice(x, x.len(), 1)
}

fn col_view_mut(x: &mut [f64]) -> MatMut<'_, f64> {
    let n = x.len();
    MatMut::from_column_major_slice_mut(x, n, 1)
}

/// y = A x
pub fn gemv(a: &Mat<f64>, x: &[f64], y: &mut [f64]) {
    assert_eq!(a.ncols(), x.len());
    assert_eq!(a.nrows(), y.len());
    matmul(col_view_mut(y), Accum::Replace, a.as_ref(), col_view(x), 1.0, Par::Seq);
}

/// y = Aᵀ x
pub fn gemv_t(a: &Mat<f64>, x: &[f64], y: &mut [f64]) {
    assert_eq!(a.nrows(), x.len());
    assert_eq!(a.ncols(), y.len());
    matmul(col_view_mut(y), Accum::Replace, a.transpose(), col_view(x), 1.0, Par::Seq);
}

pub fn column(a: &Mat<f64>, j: usize) -> Vec<f64> {
    a.col(j).iter().copied().collect()
}

pub fn max_abs(a: &Mat<f64>) -> f64 {
    if a.nrows() == 0 || a.ncols() == 0 {
        return 0.0;
    }
    a.as_ref().norm_max()
}

/// Lower Cholesky factor `L` with `A = L Lᵀ`.
///
/// Fails with [`BddcError::ZeroPivot`] when Faer meets a non-positive pivot or a pivot
/// `L_jj²` drops to `tol · max diag(A)` or below.
pub fn cholesky(a: &Mat<f64>, tol: f64) -> Result<Mat<f64>, BddcError> {
    let n = a.nrows();
    assert_eq!(n, a.ncols(), "cholesky needs a square matrix");
    let scale = (0..n).fold(0.0f64, |m, i| m.max(a[(i, i)].abs()));
    let llt = a.llt(Side::Lower).map_err(|e| match e {
        LltError::NonPositivePivot { index } => BddcError::ZeroPivot(index),
    })?;
    let l = llt.L().to_owned();
    if let Some(j) = (0..n).find(|&j| !(l[(j, j)] * l[(j, j)] > tol * scale)) {
        return Err(BddcError::ZeroPivot(j));
    }
    Ok(l)
}

/// Solve `L x = b` in place.
pub fn solve_lower(l: &Mat<f64>, b: &mut [f64]) {
    solve_lower_triangular_in_place(l.as_ref(), col_view_mut(b), Par::Seq);
}

/// Solve `L X = B` in place, column by column of `B`.
pub fn solve_lower_mat(l: &Mat<f64>, b: &mut Mat<f64>) {
    solve_lower_triangular_in_place(l.as_ref(), b.as_mut(), Par::Seq);
}

/// Solve `Lᵀ x = b` in place.
pub fn solve_lower_transpose(l: &Mat<f64>, b: &mut [f64]) {
    solve_upper_triangular_in_place(l.transpose(), col_view_mut(b), Par::Seq);
}

/// Eigen-decomposition of a symmetric matrix.
///
/// Returns the eigenvalues in ascending order and the matching orthonormal eigenvectors as
/// columns. The input is symmetrized first.
pub fn symmetric_eigen(a: &Mat<f64>) -> Result<(Vec<f64>, Mat<f64>), BddcError> {
    let n = a.nrows();
    assert_eq!(n, a.ncols(), "eigen-decomposition needs a square matrix");
    let sym = Mat::from_fn(n, n, |i, j| 0.5 * (a[(i, j)] + a[(j, i)]));
    let evd = sym
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| BddcError::Check(format!("symmetric eigensolver failed on order {n}: {e:?}")))?;
    let values = evd.S().column_vector().iter().copied().collect();
    Ok((values, evd.U().to_owned()))
}

/// Gram-Schmidt with one re-orthogonalization pass, projecting each vector against the
/// accepted basis with Faer products. Vectors whose remaining norm falls below `tol` times
/// their original norm are dropped.
pub fn orthonormalize(vectors: Vec<Vec<f64>>, tol: f64) -> Vec<Vec<f64>> {
    let mut basis: Vec<Vec<f64>> = Vec::with_capacity(vectors.len());
    for mut v in vectors {
        let norm0 = col_view(&v).norm_l2();
        if norm0 == 0.0 {
            continue;
        }
        if !basis.is_empty() {
            let q = Mat::from_fn(v.len(), basis.len(), |i, j| basis[j][i]);
            let mut h = vec![0.0; basis.len()];
            for _ in 0..2 {
                gemv_t(&q, &v, &mut h);
                matmul(col_view_mut(&mut v), Accum::Add, q.as_ref(), col_view(&h), -1.0, Par::Seq);
            }
        }
        let norm = col_view(&v).norm_l2();
        if norm <= tol * norm0 {
            continue;
        }
        for vi in &mut v {
            *vi /= norm;
        }
        basis.push(v);
    }
    basis
}

pub(crate) fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spd(n: usize) -> Mat<f64> {
        Mat::from_fn(n, n, |i, j| {
            if i == j {
                4.0 + i as f64
            } else {
                1.0 / (1.0 + (i + j) as f64)
            }
        })
    }

    #[test]
    fn products_match_indexing() {
        let a = Mat::from_fn(3, 2, |i, j| (i * 2 + j) as f64);
        let mut y = vec![0.0; 3];
        gemv(&a, &[1.0, -1.0], &mut y);
        assert_eq!(y, vec![-1.0, -1.0, -1.0]);
        let mut z = vec![0.0; 2];
        gemv_t(&a, &[1.0, 0.0, 1.0], &mut z);
        assert_eq!(z, vec![4.0, 6.0]);
        assert_eq!(max_abs(&a), 5.0);
        assert_eq!(max_abs(&Mat::zeros(0, 0)), 0.0);
    }

    #[test]
    fn cholesky_reproduces_matrix() {
        let a = spd(5);
        let l = cholesky(&a, 1e-14).unwrap();
        let lt = l.transpose().to_owned();
        let llt = &l * &lt;
        for i in 0..5 {
            for j in 0..5 {
                assert_abs_diff_eq!(llt[(i, j)], a[(i, j)], epsilon = 1e-12);
            }
        }
        let mut x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let b = x.clone();
        solve_lower(&l, &mut x);
        solve_lower_transpose(&l, &mut x);
        let mut ax = vec![0.0; 5];
        gemv(&a, &x, &mut ax);
        for (u, v) in ax.iter().zip(&b) {
            assert_abs_diff_eq!(u, v, epsilon = 1e-12);
        }
    }

    #[test]
    fn cholesky_reports_semidefinite_pivot() {
        let a = Mat::from_fn(2, 2, |_, _| 1.0);
        assert_eq!(cholesky(&a, 1e-12), Err(BddcError::ZeroPivot(1)));
    }

    #[test]
    fn symmetric_eigenpairs() {
        let a = spd(6);
        let (vals, vecs) = symmetric_eigen(&a).unwrap();
        for w in vals.windows(2) {
            assert!(w[0] <= w[1]);
        }
        for k in 0..6 {
            let x = column(&vecs, k);
            let mut ax = vec![0.0; 6];
            gemv(&a, &x, &mut ax);
            for i in 0..6 {
                assert_abs_diff_eq!(ax[i], vals[k] * x[i], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn gram_schmidt_drops_dependent_vectors() {
        let basis = orthonormalize(
            vec![vec![1.0, 1.0, 0.0], vec![2.0, 2.0, 0.0], vec![0.0, 1.0, 1.0]],
            1e-10,
        );
        assert_eq!(basis.len(), 2);
        assert_abs_diff_eq!(dot(&basis[0], &basis[1]), 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(dot(&basis[1], &basis[1]), 1.0, epsilon = 1e-14);
    }
}

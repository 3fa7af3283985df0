//! Model problems split into subdomains, and dense reference solves.

#![allow(dead_code)]

use bddc::parallel::{Comm, LocalComm, LocalToGlobalMapping};
use bddc::{CsrMatrix, SubdomainMatrix};
use faer::Mat;
use faer::prelude::Solve;

/// One subdomain: local-to-global numbering and local matrix triplets.
#[derive(Debug, Clone)]
pub struct Subdomain {
    pub l2g: Vec<usize>,
    pub triplets: Vec<(usize, usize, f64)>,
}

#[derive(Debug, Clone)]
pub struct Problem {
    pub n_global: usize,
    pub subdomains: Vec<Subdomain>,
}

impl Problem {
    pub fn operator(&self, comm: LocalComm) -> SubdomainMatrix<LocalComm> {
        let sub = &self.subdomains[comm.rank()];
        let n = sub.l2g.len();
        let local = CsrMatrix::from_triplets(n, n, &sub.triplets).unwrap();
        let mapping = LocalToGlobalMapping::new(sub.l2g.clone()).unwrap();
        SubdomainMatrix::new(comm, mapping, local, self.n_global).unwrap()
    }

    /// `A = Σ_i R_iᵀ K_i R_i`
    pub fn assemble(&self) -> Mat<f64> {
        let mut a = Mat::<f64>::zeros(self.n_global, self.n_global);
        for sub in &self.subdomains {
            for &(i, j, v) in &sub.triplets {
                a[(sub.l2g[i], sub.l2g[j])] += v;
            }
        }
        a
    }
}

fn add_spring(t: &mut Vec<(usize, usize, f64)>, i: usize, j: usize, w: f64) {
    t.push((i, i, w));
    t.push((j, j, w));
    t.push((i, j, -w));
    t.push((j, i, -w));
}

/// 1D Laplacian on `ranks * elems + 1` nodes, `elems` elements per rank, with a unit penalty
/// on both ends of the line.
pub fn laplace_1d(ranks: usize, elems: usize) -> Problem {
    let n_global = ranks * elems + 1;
    let subdomains = (0..ranks)
        .map(|r| {
            let l2g: Vec<usize> = (r * elems..=(r + 1) * elems).collect();
            let mut triplets = Vec::new();
            for e in 0..elems {
                add_spring(&mut triplets, e, e + 1, 1.0);
            }
            if r == 0 {
                triplets.push((0, 0, 1.0));
            }
            if r == ranks - 1 {
                triplets.push((elems, elems, 1.0));
            }
            Subdomain { l2g, triplets }
        })
        .collect();
    Problem { n_global, subdomains }
}

/// Five-point Laplacian on a `(px·m + 1) × (py·m + 1)` node grid, `px × py` subdomains of
/// `m × m` cells. Each cell contributes springs of weight `coeff(rank) / 2` on its four
/// edges; outer edges also pin their end nodes with the same weight.
pub fn grid_2d(px: usize, py: usize, m: usize, coeff: impl Fn(usize) -> f64) -> Problem {
    let nx = px * m + 1;
    let ny = py * m + 1;
    let mut subdomains = Vec::new();
    for ry in 0..py {
        for rx in 0..px {
            let rank = ry * px + rx;
            let w = 0.5 * coeff(rank);
            let local = |x: usize, y: usize| y * (m + 1) + x;
            let mut l2g = Vec::with_capacity((m + 1) * (m + 1));
            for y in 0..=m {
                for x in 0..=m {
                    l2g.push((ry * m + y) * nx + rx * m + x);
                }
            }
            let mut triplets = Vec::new();
            for cy in 0..m {
                for cx in 0..m {
                    let edges = [
                        ((cx, cy), (cx + 1, cy)),
                        ((cx, cy + 1), (cx + 1, cy + 1)),
                        ((cx, cy), (cx, cy + 1)),
                        ((cx + 1, cy), (cx + 1, cy + 1)),
                    ];
                    for ((x0, y0), (x1, y1)) in edges {
                        let (i, j) = (local(x0, y0), local(x1, y1));
                        add_spring(&mut triplets, i, j, w);
                        let gx = |x: usize| rx * m + x;
                        let gy = |y: usize| ry * m + y;
                        let on_boundary = (y0 == y1 && (gy(y0) == 0 || gy(y0) == ny - 1))
                            || (x0 == x1 && (gx(x0) == 0 || gx(x0) == nx - 1));
                        if on_boundary {
                            triplets.push((i, i, w));
                            triplets.push((j, j, w));
                        }
                    }
                }
            }
            subdomains.push(Subdomain { l2g, triplets });
        }
    }
    Problem { n_global: nx * ny, subdomains }
}

/// Dense reference solve with faer's partial-pivot LU.
pub fn dense_solve(a: &Mat<f64>, b: &[f64]) -> Vec<f64> {
    let rhs = Mat::from_fn(b.len(), 1, |i, _| b[i]);
    let x = a.partial_piv_lu().solve(&rhs);
    let x: Vec<f64> = (0..b.len()).map(|i| x[(i, 0)]).collect();
    assert!(x.iter().all(|v| v.is_finite()), "reference solve produced non-finite values");
    x
}

/// `y = A x`
pub fn dense_mul(a: &Mat<f64>, x: &[f64]) -> Vec<f64> {
    (0..a.nrows())
        .map(|i| (0..a.ncols()).map(|j| a[(i, j)] * x[j]).sum())
        .collect()
}

/// Local part of a global vector.
pub fn restrict(l2g: &[usize], global: &[f64]) -> Vec<f64> {
    l2g.iter().map(|&g| global[g]).collect()
}

//! Local interface Schur complements.
//!
//! `S = K_BB − K_BI K_II⁻¹ K_IB` is formed densely for the subdomain, then cut into one block
//! per interface component. Deluxe scaling and adaptive selection also need the blocks of the
//! other sharers and their sum, which are exchanged here.

use super::benign::{BenignSpace, Direction};
use super::graph::InterfaceGraph;
use crate::error::BddcError;
use crate::matrix::CsrMatrix;
use crate::matrix::dense::submatrix;
use crate::parallel::{Comm, SharingInfo, expect_len, tags};
use crate::solver::LuSolver;
use faer::Mat;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::sync::Arc;

/// Schur data of one interface component.
#[derive(Debug, Clone)]
pub struct SchurBlock {
    /// Index of the component in the graph arena.
    pub component: usize,
    /// Positions of the component dofs in the interface numbering, in global order.
    pub positions: Vec<usize>,
    /// Block of this subdomain.
    pub local: Mat<f64>,
    /// Blocks of all sharers (this one included), by rank.
    pub sharers: Vec<(usize, Mat<f64>)>,
    /// Sum of the sharer blocks, accumulated in rank order.
    pub sum: Option<Mat<f64>>,
}

#[derive(Debug, Clone)]
pub struct SubSchurs {
    needs_neighbour_blocks: bool,
    interior: Vec<usize>,
    interface: Vec<usize>,
    interior_factor: Option<Arc<LuSolver>>,
    schur: Mat<f64>,
    blocks: Vec<SchurBlock>,
}

impl SubSchurs {
    pub fn init(graph: &InterfaceGraph, needs_neighbour_blocks: bool) -> Self {
        Self {
            needs_neighbour_blocks,
            interior: graph.interior_dofs(),
            interface: graph.interface_dofs(),
            interior_factor: None,
            schur: Mat::zeros(0, 0),
            blocks: Vec::new(),
        }
    }

    /// Factor the interior block (with the benign subspace pushed), form the interface Schur
    /// complement and its component blocks. Collective over neighbours when neighbour blocks
    /// are needed.
    pub fn setup<C: Comm>(
        &mut self,
        comm: &C,
        sharing: &SharingInfo,
        graph: &InterfaceGraph,
        k: &CsrMatrix<f64>,
        benign: Option<&BenignSpace>,
        pivot_tol: f64,
    ) -> Result<(), BddcError> {
        let rank = comm.rank();
        let factor = self.factor_interior(rank, k, benign, pivot_tol);
        let factor = crate::parallel::agree(comm, "interior factorization", factor)?;

        let k_ib = k.submatrix_dense(&self.interior, &self.interface);
        let k_bi = k.submatrix_dense(&self.interface, &self.interior);
        let mut schur = k.submatrix_dense(&self.interface, &self.interface);
        let x = solve_columns(&factor, &k_ib, benign);
        let correction = &k_bi * &x;
        for j in 0..schur.ncols() {
            for i in 0..schur.nrows() {
                schur[(i, j)] -= correction[(i, j)];
            }
        }
        self.schur = schur;
        self.interior_factor = Some(factor);

        let mut position = vec![usize::MAX; graph.n_local()];
        for (pos, &i) in self.interface.iter().enumerate() {
            position[i] = pos;
        }
        self.blocks = graph
            .components()
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let positions: Vec<usize> = c.nodes.iter().map(|&i| position[i]).collect();
                let local = submatrix(&self.schur, &positions, &positions);
                SchurBlock { component: k, positions, local, sharers: Vec::new(), sum: None }
            })
            .collect();

        if self.needs_neighbour_blocks {
            let exchanged = self.exchange_blocks(comm, sharing, graph);
            crate::parallel::agree(comm, "Schur block exchange", exchanged)?;
        }
        log::debug!(
            "rank {rank}: interface Schur complement of order {} ({} blocks)",
            self.interface.len(),
            self.blocks.len()
        );
        Ok(())
    }

    fn factor_interior(
        &self,
        rank: usize,
        k: &CsrMatrix<f64>,
        benign: Option<&BenignSpace>,
        pivot_tol: f64,
    ) -> Result<Arc<LuSolver>, BddcError> {
        let mut k_ii = k.submatrix_dense(&self.interior, &self.interior);
        if let Some(b) = benign {
            b.pop_or_push(&mut k_ii, Direction::Push);
        }
        LuSolver::factor(&k_ii, pivot_tol)
            .map(Arc::new)
            .map_err(|e| e.singular(rank, "interior block"))
    }

    fn exchange_blocks<C: Comm>(
        &mut self,
        comm: &C,
        sharing: &SharingInfo,
        graph: &InterfaceGraph,
    ) -> Result<(), BddcError> {
        let rank = comm.rank();
        let comps = graph.components();
        let received = sharing.exchange(comm, tags::SCHUR_BLOCKS, |nb| {
            let mut out = Vec::new();
            for b in self.blocks.iter().filter(|b| comps[b.component].sharers.contains(&nb.rank)) {
                for j in 0..b.local.ncols() {
                    for i in 0..b.local.nrows() {
                        out.push(b.local[(i, j)]);
                    }
                }
            }
            out
        })?;

        for b in &mut self.blocks {
            b.sharers = vec![(rank, b.local.clone())];
        }
        for (nb, data) in sharing.neighbours().iter().zip(&received) {
            let expected: usize = self
                .blocks
                .iter()
                .filter(|b| comps[b.component].sharers.contains(&nb.rank))
                .map(|b| b.positions.len() * b.positions.len())
                .sum();
            expect_len(rank, "Schur block exchange", nb.rank, data.len(), expected)?;
            let mut offset = 0;
            for b in self.blocks.iter_mut().filter(|b| comps[b.component].sharers.contains(&nb.rank)) {
                let m = b.positions.len();
                let block = crate::matrix::dense::from_column_major(m, m, &data[offset..offset + m * m]);
                offset += m * m;
                b.sharers.push((nb.rank, block));
            }
        }
        for b in &mut self.blocks {
            b.sharers.sort_by_key(|(r, _)| *r);
            let m = b.positions.len();
            let mut sum = Mat::<f64>::zeros(m, m);
            for (_, s) in &b.sharers {
                for j in 0..m {
                    for i in 0..m {
                        sum[(i, j)] += s[(i, j)];
                    }
                }
            }
            b.sum = Some(sum);
        }
        Ok(())
    }

    /// Factor of the (regularized) interior block, shared with the Dirichlet solver.
    pub fn interior_factor(&self) -> Option<&Arc<LuSolver>> {
        self.interior_factor.as_ref()
    }

    /// Dense interface Schur complement, in interface numbering.
    pub fn schur(&self) -> &Mat<f64> {
        &self.schur
    }

    pub fn blocks(&self) -> &[SchurBlock] {
        &self.blocks
    }

    pub fn block(&self, component: usize) -> Option<&SchurBlock> {
        self.blocks.get(component)
    }

    pub fn interior(&self) -> &[usize] {
        &self.interior
    }

    pub fn interface(&self) -> &[usize] {
        &self.interface
    }

    #[cfg(test)]
    pub(crate) fn with_partition(interior: Vec<usize>, interface: Vec<usize>) -> Self {
        Self {
            needs_neighbour_blocks: false,
            interior,
            interface,
            interior_factor: None,
            schur: Mat::zeros(0, 0),
            blocks: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.interior.clear();
        self.interface.clear();
        self.interior_factor = None;
        self.schur = Mat::zeros(0, 0);
        self.blocks.clear();
    }
}

/// `K_II⁻¹ B` column by column; columns are projected off the benign null vector first.
pub(crate) fn solve_columns(factor: &LuSolver, b: &Mat<f64>, benign: Option<&BenignSpace>) -> Mat<f64> {
    let n = b.nrows();
    let solve = |j: usize| {
        let mut col: Vec<f64> = (0..n).map(|i| b[(i, j)]).collect();
        if let Some(s) = benign {
            s.remove_component(&mut col);
        }
        factor.solve_in_place(&mut col);
        if let Some(s) = benign {
            s.remove_component(&mut col);
        }
        col
    };
    #[cfg(feature = "rayon")]
    let columns: Vec<Vec<f64>> = (0..b.ncols()).into_par_iter().map(solve).collect();
    #[cfg(not(feature = "rayon"))]
    let columns: Vec<Vec<f64>> = (0..b.ncols()).map(solve).collect();
    Mat::from_fn(n, b.ncols(), |i, j| columns[j][i])
}

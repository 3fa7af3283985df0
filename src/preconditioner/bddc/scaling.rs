//! Partition-of-unity scaling of interface vectors.
//!
//! Interface vectors are in interface numbering (positions in the graph's interface dofs).
//! `restriction` turns a consistent residual into this subdomain's share, `extension` averages
//! the local corrections of all sharers back into a consistent vector. The two are adjoint,
//! which keeps the preconditioner symmetric.

use super::graph::{Candidate, CandidateKind, InterfaceGraph};
use super::sub_schurs::SubSchurs;
use crate::error::BddcError;
use crate::matrix::dense::gemv;
use crate::parallel::{Comm, SharingInfo, tags};
use crate::solver::LuSolver;
use faer::Mat;
use std::fmt::Debug;
use std::sync::Arc;

/// A scaling strategy on interface vectors of this subdomain.
pub trait Scaling: Send + Sync + Debug {
    /// Weights applied to a consistent residual before the local solves.
    fn scale_restriction(&self, v: &mut [f64]);
    /// Adjoint weights applied to a local correction before it is summed over sharers.
    fn scale_extension(&self, v: &mut [f64]);
}

/// Weights `1 / count`.
#[derive(Debug, Clone)]
pub struct MultiplicityScaling {
    weights: Vec<f64>,
}

impl MultiplicityScaling {
    pub fn new(sharing: &SharingInfo, interface: &[usize]) -> Self {
        let weights = interface.iter().map(|&i| 1.0 / sharing.count(i) as f64).collect();
        Self { weights }
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl Scaling for MultiplicityScaling {
    fn scale_restriction(&self, v: &mut [f64]) {
        for (x, w) in v.iter_mut().zip(&self.weights) {
            *x *= w;
        }
    }

    fn scale_extension(&self, v: &mut [f64]) {
        self.scale_restriction(v);
    }
}

/// Deluxe block of one component: `D = S_Σ⁻¹ S_i` and its transpose.
#[derive(Debug, Clone)]
struct DeluxeBlock {
    positions: Vec<usize>,
    d: Mat<f64>,
    dt: Mat<f64>,
}

/// Deluxe weights on edges and faces, multiplicity elsewhere.
#[derive(Debug, Clone)]
pub struct DeluxeScaling {
    fallback: MultiplicityScaling,
    blocks: Vec<DeluxeBlock>,
}

impl DeluxeScaling {
    /// Needs the summed sharer blocks of `sub_schurs`. Components whose sum cannot be
    /// factored keep multiplicity weights.
    pub fn new(
        sharing: &SharingInfo,
        graph: &InterfaceGraph,
        candidates: &[Candidate],
        sub_schurs: &SubSchurs,
        pivot_tol: f64,
    ) -> Self {
        let fallback = MultiplicityScaling::new(sharing, sub_schurs.interface());
        let mut blocks = Vec::new();
        for cand in candidates.iter().filter(|c| c.kind != CandidateKind::Vertex) {
            let Some(block) = sub_schurs.block(cand.component) else {
                continue;
            };
            let Some(sum) = block.sum.as_ref() else {
                continue;
            };
            let lu = match LuSolver::factor(sum, pivot_tol) {
                Ok(lu) => lu,
                Err(_) => {
                    log::warn!(
                        "rank {}: singular summed Schur block on component {}, multiplicity scaling used",
                        graph.rank(),
                        graph.components()[cand.component].id
                    );
                    continue;
                }
            };
            let d = lu.solve_mat(&block.local);
            let dt = d.transpose().to_owned();
            blocks.push(DeluxeBlock { positions: block.positions.clone(), d, dt });
        }
        log::debug!("rank {}: {} deluxe blocks", graph.rank(), blocks.len());
        Self { fallback, blocks }
    }

    fn apply_blocks(&self, v: &mut [f64], transpose: bool) {
        let covered = self.blocks.iter().flat_map(|b| b.positions.iter().copied());
        let saved: Vec<(usize, f64)> = covered.map(|p| (p, v[p])).collect();
        self.fallback.scale_restriction(v);
        let mut offset = 0;
        for b in &self.blocks {
            let m = b.positions.len();
            let x: Vec<f64> = saved[offset..offset + m].iter().map(|&(_, x)| x).collect();
            offset += m;
            let mut y = vec![0.0; m];
            if transpose {
                gemv(&b.dt, &x, &mut y);
            } else {
                gemv(&b.d, &x, &mut y);
            }
            for (&p, yi) in b.positions.iter().zip(y) {
                v[p] = yi;
            }
        }
    }
}

impl Scaling for DeluxeScaling {
    fn scale_restriction(&self, v: &mut [f64]) {
        self.apply_blocks(v, true);
    }

    fn scale_extension(&self, v: &mut [f64]) {
        self.apply_blocks(v, false);
    }
}

/// Restriction and extension between consistent interface vectors and subdomain shares.
#[derive(Debug)]
pub struct ScalingOperator {
    strategy: Box<dyn Scaling>,
    interface: Vec<usize>,
    n_local: usize,
    sharing: Arc<SharingInfo>,
}

impl ScalingOperator {
    pub fn new(strategy: Box<dyn Scaling>, interface: Vec<usize>, sharing: Arc<SharingInfo>) -> Self {
        let n_local = sharing.len();
        Self { strategy, interface, n_local, sharing }
    }

    pub fn interface(&self) -> &[usize] {
        &self.interface
    }

    /// `local_b = D_iᵀ global_b`
    pub fn restriction(&self, global_b: &[f64], local_b: &mut [f64]) {
        local_b.copy_from_slice(global_b);
        self.strategy.scale_restriction(local_b);
    }

    /// `global_b = Σ_j D_j local_b(j)`, summed over the sharers in rank order. Collective over
    /// neighbours.
    pub fn extension<C: Comm>(&self, comm: &C, local_b: &[f64], global_b: &mut [f64]) -> Result<(), BddcError> {
        global_b.copy_from_slice(local_b);
        self.strategy.scale_extension(global_b);
        self.assemble(comm, global_b)
    }

    /// Sum an interface vector over the sharers of each dof.
    pub fn assemble<C: Comm>(&self, comm: &C, v: &mut [f64]) -> Result<(), BddcError> {
        let mut full = vec![0.0; self.n_local];
        for (&i, &x) in self.interface.iter().zip(v.iter()) {
            full[i] = x;
        }
        self.sharing.sum_shared(comm, tags::INTERFACE_SUM, &mut full)?;
        for (&i, x) in self.interface.iter().zip(v.iter_mut()) {
            *x = full[i];
        }
        Ok(())
    }
}

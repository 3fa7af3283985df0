//! FETI-DP: the dual counterpart of BDDC on the same local pieces.
//!
//! Continuity of the non-primal interface dofs is enforced by Lagrange multipliers, one per
//! pair of consecutive sharers of a dof (non-redundant). With `K̃⁻¹` the partially assembled
//! solve (constrained Neumann solve plus coarse correction), the dual operator is
//! `F = B K̃⁻¹ Bᵀ` and the dual right-hand side `d = B K̃⁻¹ f̃`. Multiplier vectors are stored
//! on both ranks of their pair, with equal values.

use super::constraints::ConstraintKind;
use super::{Bddc, Ready};
use crate::core::traits::LinearOperator;
use crate::error::BddcError;
use crate::matrix::dense::gemv;
use crate::parallel::{Comm, Tag, expect_len, tags};
use crate::preconditioner::Preconditioner;
use faer::Mat;

#[derive(Debug, Clone, Copy)]
struct Multiplier {
    /// Local dof.
    node: usize,
    /// +1 on the lower rank of the pair, -1 on the upper.
    sign: f64,
}

/// Multipliers shared with one neighbour, in global dof order.
#[derive(Debug, Clone)]
struct PairGroup {
    rank: usize,
    start: usize,
    end: usize,
}

#[derive(Debug, Clone, Default)]
struct MultiplierLayout {
    multipliers: Vec<Multiplier>,
    groups: Vec<PairGroup>,
}

impl MultiplierLayout {
    fn len(&self) -> usize {
        self.multipliers.len()
    }

    /// `f += Bᵀ λ` on a local vector, with per-dof weights.
    fn add_transpose(&self, lambda: &[f64], weight: impl Fn(usize) -> f64, f: &mut [f64]) {
        for (m, &l) in self.multipliers.iter().zip(lambda) {
            f[m.node] += m.sign * weight(m.node) * l;
        }
    }

    /// `y = B x`: the signed jump across each pair, lower rank's term first. Collective over
    /// neighbours.
    fn jump<C: Comm>(
        &self,
        comm: &C,
        tag: Tag,
        x: &[f64],
        weight: impl Fn(usize) -> f64,
        y: &mut [f64],
    ) -> Result<(), BddcError> {
        let rank = comm.rank();
        let local: Vec<f64> = self
            .multipliers
            .iter()
            .map(|m| m.sign * weight(m.node) * x[m.node])
            .collect();
        for g in &self.groups {
            comm.send(g.rank, tag, &local[g.start..g.end])?;
        }
        for g in &self.groups {
            let theirs: Vec<f64> = comm.recv(g.rank, tag)?;
            expect_len(rank, "FETI-DP jump", g.rank, theirs.len(), g.end - g.start)?;
            for (k, t) in (g.start..g.end).zip(theirs) {
                y[k] = if rank < g.rank { local[k] + t } else { t + local[k] };
            }
        }
        Ok(())
    }
}

/// The dual operator `F = B K̃⁻¹ Bᵀ`. Borrows the set-up preconditioner, so the local solvers
/// cannot be rebuilt while it exists.
pub struct FetidpMat<'a, C: Comm + Clone> {
    bddc: &'a Bddc<C>,
    layout: MultiplierLayout,
}

impl<'a, C: Comm + Clone> FetidpMat<'a, C> {
    /// Panics if `bddc` is not set up; benign subdomains are not supported.
    pub fn create(bddc: &'a Bddc<C>) -> Result<Self, BddcError> {
        if bddc.benign.is_some() {
            return Err(BddcError::Unsupported("FETI-DP on a subdomain treated with the benign trick"));
        }
        bddc.ready();
        Ok(Self { bddc, layout: MultiplierLayout::default() })
    }

    /// Number the multipliers and check that every neighbour agrees on their count.
    /// Collective over neighbours.
    pub fn setup(&mut self) -> Result<(), BddcError> {
        let r = self.bddc.ready();
        let rank = r.comm.rank();
        let mut vertex = vec![false; r.sharing.len()];
        for c in self.bddc.constraints.iter().filter(|c| c.kind == ConstraintKind::Vertex) {
            for &d in &c.dofs {
                vertex[d] = true;
            }
        }

        let mut layout = MultiplierLayout::default();
        for nb in r.sharing.neighbours() {
            let start = layout.multipliers.len();
            for &i in &nb.nodes {
                if vertex[i] {
                    continue;
                }
                let sharers = r.sharing.sharers(i);
                let consecutive = sharers
                    .windows(2)
                    .any(|w| (w[0] == rank && w[1] == nb.rank) || (w[0] == nb.rank && w[1] == rank));
                if consecutive {
                    let sign = if rank < nb.rank { 1.0 } else { -1.0 };
                    layout.multipliers.push(Multiplier { node: i, sign });
                }
            }
            let end = layout.multipliers.len();
            layout.groups.push(PairGroup { rank: nb.rank, start, end });
        }

        for g in &layout.groups {
            r.comm.send(g.rank, tags::FETIDP_JUMP, &[(g.end - g.start) as u64])?;
        }
        let mut mismatch = None;
        for g in &layout.groups {
            let theirs: Vec<u64> = r.comm.recv(g.rank, tags::FETIDP_JUMP)?;
            if theirs.first().copied() != Some((g.end - g.start) as u64) && mismatch.is_none() {
                mismatch = Some(BddcError::Topology {
                    rank,
                    step: "FETI-DP multipliers",
                    detail: format!(
                        "{} multipliers shared with rank {}, which counts {:?}",
                        g.end - g.start,
                        g.rank,
                        theirs.first()
                    ),
                });
            }
        }
        let checked = match mismatch {
            Some(e) => Err(e),
            None => Ok(()),
        };
        crate::parallel::agree(r.comm, "FETI-DP multipliers", checked)?;
        log::debug!("rank {rank}: {} local Lagrange multipliers", layout.len());
        self.layout = layout;
        Ok(())
    }

    /// Number of locally stored multipliers.
    pub fn n_multipliers(&self) -> usize {
        self.layout.len()
    }

    /// Inner-product weights of multiplier vectors: each multiplier is stored twice.
    pub fn weights(&self) -> Vec<f64> {
        vec![0.5; self.layout.len()]
    }

    fn ready(&self) -> Ready<'_, C> {
        self.bddc.ready()
    }

    /// Local share of a consistent right-hand side: `f / count`.
    fn split(&self, r: &Ready<'_, C>, f: &[f64]) -> Vec<f64> {
        f.iter()
            .enumerate()
            .map(|(i, &v)| v / r.sharing.count(i) as f64)
            .collect()
    }

    /// `y = B K̃⁻¹ Bᵀ x`. Collective.
    ///
    /// # Arguments
    /// * `x` - Local multipliers, [`Self::n_multipliers`] entries
    /// * `y` - Output, same layout as `x`
    ///
    /// # Returns
    /// The error of the two-level solve or of the jump exchange with a neighbour.
    ///
    /// # Panics
    /// If `x` or `y` is shorter than [`Self::n_multipliers`].
    pub fn mult(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError> {
        let r = self.ready();
        let mut f = vec![0.0; r.sharing.len()];
        self.layout.add_transpose(x, |_| 1.0, &mut f);
        let u = self.bddc.two_level_solve(&r, &f)?;
        self.layout.jump(r.comm, tags::FETIDP_JUMP, &u, |_| 1.0, y)
    }

    /// Dual right-hand side `d = B K̃⁻¹ f̃` of a consistent right-hand side `f`. Collective.
    ///
    /// # Arguments
    /// * `f` - Consistent local right-hand side, one entry per local dof
    ///
    /// # Returns
    /// `d` with [`Self::n_multipliers`] entries.
    pub fn rhs(&self, f: &[f64]) -> Result<Vec<f64>, BddcError> {
        let r = self.ready();
        let share = self.split(&r, f);
        let u = self.bddc.two_level_solve(&r, &share)?;
        let mut d = vec![0.0; self.layout.len()];
        self.layout.jump(r.comm, tags::FETIDP_JUMP, &u, |_| 1.0, &mut d)?;
        Ok(d)
    }

    /// Primal solution `u = K̃⁻¹ (f̃ - Bᵀ λ)`, averaged over sharers into consistent form.
    /// Collective.
    ///
    /// # Arguments
    /// * `lambda` - Converged multipliers
    /// * `f` - The consistent right-hand side passed to [`Self::rhs`]
    ///
    /// # Returns
    /// The consistent local solution, one entry per local dof.
    ///
    /// # Panics
    /// If `f` does not have one entry per local dof.
    pub fn solution(&self, lambda: &[f64], f: &[f64]) -> Result<Vec<f64>, BddcError> {
        let r = self.ready();
        let mut share = self.split(&r, f);
        self.layout.add_transpose(lambda, |_| -1.0, &mut share);
        let mut u = self.bddc.two_level_solve(&r, &share)?;
        for (i, x) in u.iter_mut().enumerate() {
            *x /= r.sharing.count(i) as f64;
        }
        r.sharing.sum_shared(r.comm, tags::INTERFACE_SUM, &mut u)?;
        Ok(u)
    }
}

impl<C: Comm + Clone> LinearOperator for FetidpMat<'_, C> {
    fn local_len(&self) -> usize {
        self.layout.len()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError> {
        self.mult(x, y)
    }
}

/// Dual preconditioner flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetidpPcKind {
    /// `B_D S B_Dᵀ` with the interface Schur complement.
    Dirichlet,
    /// `B_D K_BB B_Dᵀ`.
    Lumped,
}

/// Scaled dual preconditioner `B_D A B_Dᵀ`, `A` the Schur complement or `K_BB`.
pub struct FetidpPc<'a, C: Comm + Clone> {
    bddc: &'a Bddc<C>,
    layout: MultiplierLayout,
    kind: FetidpPcKind,
    operator: Option<Mat<f64>>,
}

impl<'a, C: Comm + Clone> FetidpPc<'a, C> {
    pub fn create(mat: &FetidpMat<'a, C>, kind: FetidpPcKind) -> Self {
        Self {
            bddc: mat.bddc,
            layout: mat.layout.clone(),
            kind,
            operator: None,
        }
    }

    pub fn kind(&self) -> FetidpPcKind {
        self.kind
    }

    pub fn setup(&mut self) -> Result<(), BddcError> {
        let r = self.bddc.ready();
        let mut on_interface = vec![false; r.sharing.len()];
        for &i in r.sub_schurs.interface() {
            on_interface[i] = true;
        }
        if let Some(m) = self.layout.multipliers.iter().find(|m| !on_interface[m.node]) {
            return Err(BddcError::Topology {
                rank: r.comm.rank(),
                step: "FETI-DP preconditioner",
                detail: format!("multiplier on local dof {} outside the interface", m.node),
            });
        }
        self.operator = Some(match self.kind {
            FetidpPcKind::Dirichlet => r.sub_schurs.schur().clone(),
            FetidpPcKind::Lumped => r.couplings.k_bb.clone(),
        });
        Ok(())
    }

    /// `y = B_D A B_Dᵀ x`. Collective.
    pub fn apply_dual(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError> {
        let r = self.bddc.ready();
        let operator = self
            .operator
            .as_ref()
            .ok_or(BddcError::Unsupported("FETI-DP preconditioner applied before setup"))?;
        let weight = |i: usize| 1.0 / r.sharing.count(i) as f64;
        let mut f = vec![0.0; r.sharing.len()];
        self.layout.add_transpose(x, weight, &mut f);
        let interface = r.sub_schurs.interface();
        let w: Vec<f64> = interface.iter().map(|&i| f[i]).collect();
        let mut v = vec![0.0; interface.len()];
        gemv(operator, &w, &mut v);
        let mut full = vec![0.0; r.sharing.len()];
        for (&i, &x) in interface.iter().zip(&v) {
            full[i] = x;
        }
        self.layout.jump(r.comm, tags::FETIDP_PC, &full, weight, y)
    }
}

impl<'a, C: Comm + Clone> Preconditioner<FetidpMat<'a, C>, Vec<f64>> for FetidpPc<'a, C> {
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        self.apply_dual(r, z)
    }

    fn setup(&mut self, _a: &FetidpMat<'a, C>) -> Result<(), BddcError> {
        FetidpPc::setup(self)
    }
}

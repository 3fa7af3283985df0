//! The coarse (primal) problem and the scatters that move primal values between subdomains
//! and the ranks holding it.
//!
//! Setup: every rank sends the global numbers of its primal constraints and its local coarse
//! matrix to the holders, which assemble in rank order and factor. Apply: a forward scatter
//! accumulates local primal contributions into the coarse right-hand side, a reverse scatter
//! hands the coarse solution back. Both are split into `begin` and `end`; no coarse value may
//! be read before the matching `end` returns.

use crate::error::BddcError;
use crate::matrix::dense::from_column_major;
use crate::parallel::{Comm, Tag, agree, expect_len, tags};
use crate::solver::LuSolver;
use faer::Mat;
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    Insert,
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMode {
    /// Local primal values into the coarse vector.
    Forward,
    /// Coarse vector into local primal values.
    Reverse,
}

/// Which ranks assemble, factor and solve the coarse problem.
pub trait CoarseStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;
    /// Holding ranks, ascending; the first one serves the others on reverse scatters.
    fn holders(&self, size: usize) -> Vec<usize>;
}

/// Every rank solves the whole coarse problem.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redundant;

impl CoarseStrategy for Redundant {
    fn name(&self) -> &'static str {
        "redundant"
    }

    fn holders(&self, size: usize) -> Vec<usize> {
        (0..size).collect()
    }
}

/// Rank 0 solves.
#[derive(Debug, Clone, Copy, Default)]
pub struct Root;

impl CoarseStrategy for Root {
    fn name(&self) -> &'static str {
        "root"
    }

    fn holders(&self, _size: usize) -> Vec<usize> {
        vec![0]
    }
}

/// Token of a started scatter. Must be passed to [`CoarseProblem::scatter_coarse_data_end`].
#[must_use = "a started scatter must be completed with scatter_coarse_data_end"]
#[derive(Debug)]
pub struct PendingScatter {
    insert: InsertMode,
    mode: ScatterMode,
}

impl PendingScatter {
    pub fn mode(&self) -> ScatterMode {
        self.mode
    }
}

#[derive(Debug)]
pub struct CoarseProblem {
    strategy: Box<dyn CoarseStrategy>,
    rank: usize,
    holders: Vec<usize>,
    /// Global primal numbers of this rank's constraints.
    numbers: Vec<usize>,
    /// On holders: primal numbers of every rank, by rank.
    layout: Vec<Vec<usize>>,
    n_coarse: usize,
    matrix: Option<Mat<f64>>,
    factor: Option<LuSolver>,
}

impl CoarseProblem {
    /// Assemble and factor the coarse matrix on the holders. Collective.
    ///
    /// # Arguments
    /// * `strategy` - Decides which ranks hold the coarse problem
    /// * `numbers` - Global primal number of each local constraint
    /// * `n_coarse` - Number of global primal unknowns
    /// * `local` - Local coarse matrix `Φᵀ K Φ`, in the order of `numbers`
    /// * `pivot_tol` - Relative pivot tolerance of the coarse factorization
    ///
    /// # Returns
    /// * `Err(BddcError::SingularFactor)` on every rank when the coarse matrix is singular
    /// * `Err(BddcError::Topology)` on a holder that receives an out-of-range primal number,
    ///   and `Err(BddcError::Comm)` on the other ranks
    pub fn setup<C: Comm>(
        comm: &C,
        strategy: Box<dyn CoarseStrategy>,
        numbers: &[usize],
        n_coarse: usize,
        local: &Mat<f64>,
        pivot_tol: f64,
    ) -> Result<Self, BddcError> {
        let rank = comm.rank();
        let holders = strategy.holders(comm.size());
        let mut problem = Self {
            strategy,
            rank,
            holders,
            numbers: numbers.to_vec(),
            layout: Vec::new(),
            n_coarse,
            matrix: None,
            factor: None,
        };
        if n_coarse == 0 {
            log::debug!("rank {rank}: empty coarse space");
            return Ok(problem);
        }

        let p = numbers.len();
        let mut packed: Vec<f64> = Vec::with_capacity(p * p);
        for j in 0..p {
            for i in 0..p {
                packed.push(local[(i, j)]);
            }
        }
        let ids: Vec<u64> = numbers.iter().map(|&n| n as u64).collect();
        for &h in &problem.holders {
            comm.send(h, tags::COARSE_SETUP, &ids)?;
            comm.send(h, tags::COARSE_SETUP, &packed)?;
        }

        let assembled = if problem.is_holder() {
            let mut received = Vec::with_capacity(comm.size());
            for src in 0..comm.size() {
                let ids: Vec<u64> = comm.recv(src, tags::COARSE_SETUP)?;
                let vals: Vec<f64> = comm.recv(src, tags::COARSE_SETUP)?;
                received.push((ids, vals));
            }
            problem.assemble_and_factor(received, pivot_tol)
        } else {
            Ok(None)
        };

        // Every rank joins both reductions, whatever happened on the holders.
        let pivot = match &assembled {
            Ok(Some(k)) => *k as u64 + 1,
            _ => 0,
        };
        let failed = comm.all_reduce_max(pivot)?;
        agree(comm, "coarse assembly", assembled)?;
        if failed > 0 {
            return Err(BddcError::SingularFactor {
                rank,
                what: "coarse matrix",
                pivot: failed as usize - 1,
            });
        }
        log::debug!(
            "rank {rank}: coarse problem of order {n_coarse} ({} strategy)",
            problem.strategy.name()
        );
        Ok(problem)
    }

    /// Assemble the blocks received from every rank, in rank order, and factor. Returns the
    /// zero pivot of a singular coarse matrix.
    fn assemble_and_factor(
        &mut self,
        received: Vec<(Vec<u64>, Vec<f64>)>,
        pivot_tol: f64,
    ) -> Result<Option<usize>, BddcError> {
        let n_coarse = self.n_coarse;
        let mut assembled = Mat::<f64>::zeros(n_coarse, n_coarse);
        for (src, (ids, vals)) in received.into_iter().enumerate() {
            let m = ids.len();
            expect_len(self.rank, "coarse assembly", src, vals.len(), m * m)?;
            let ids: Vec<usize> = ids.into_iter().map(|g| g as usize).collect();
            if let Some(&g) = ids.iter().find(|&&g| g >= n_coarse) {
                return Err(BddcError::Topology {
                    rank: self.rank,
                    step: "coarse assembly",
                    detail: format!("rank {src} sent primal number {g} of {n_coarse}"),
                });
            }
            let block = from_column_major(m, m, &vals);
            for (j, &gj) in ids.iter().enumerate() {
                for (i, &gi) in ids.iter().enumerate() {
                    assembled[(gi, gj)] += block[(i, j)];
                }
            }
            self.layout.push(ids);
        }
        let zero_pivot = match LuSolver::factor(&assembled, pivot_tol) {
            Ok(lu) => {
                self.factor = Some(lu);
                None
            }
            Err(BddcError::ZeroPivot(k)) => Some(k),
            Err(e) => return Err(e),
        };
        self.matrix = Some(assembled);
        Ok(zero_pivot)
    }

    pub fn n_coarse(&self) -> usize {
        self.n_coarse
    }

    pub fn numbers(&self) -> &[usize] {
        &self.numbers
    }

    pub fn is_holder(&self) -> bool {
        self.holders.binary_search(&self.rank).is_ok()
    }

    /// Assembled coarse matrix, on holders.
    pub fn coarse_matrix(&self) -> Option<&Mat<f64>> {
        self.matrix.as_ref()
    }

    /// A zero coarse vector of the right length for this rank.
    pub fn work_vector(&self) -> Vec<f64> {
        vec![0.0; if self.is_holder() { self.n_coarse } else { 0 }]
    }

    /// Start moving data: forward sends `local` to the holders; reverse sends the parts of
    /// `coarse` other ranks need.
    ///
    /// # Arguments
    /// * `insert` - Whether [`Self::scatter_coarse_data_end`] overwrites or accumulates
    /// * `mode` - Direction of the scatter
    /// * `local` - Forward: one value per local constraint. Unused on reverse.
    /// * `coarse` - Reverse, on holders: the coarse solution. Unused on forward.
    ///
    /// # Returns
    /// A token to hand to [`Self::scatter_coarse_data_end`], or the send error.
    ///
    /// # Panics
    /// On a reverse scatter if `coarse` is shorter than the coarse problem on the first holder.
    pub fn scatter_coarse_data_begin<C: Comm>(
        &self,
        comm: &C,
        insert: InsertMode,
        mode: ScatterMode,
        local: &[f64],
        coarse: &[f64],
    ) -> Result<PendingScatter, BddcError> {
        if self.n_coarse > 0 {
            match mode {
                ScatterMode::Forward => {
                    for &h in &self.holders {
                        comm.send(h, tags::COARSE_FORWARD, local)?;
                    }
                }
                ScatterMode::Reverse => {
                    if self.holders.first() == Some(&self.rank) {
                        for (dest, ids) in self.layout.iter().enumerate() {
                            if self.holders.binary_search(&dest).is_err() {
                                let part: Vec<f64> = ids.iter().map(|&g| coarse[g]).collect();
                                comm.send(dest, tags::COARSE_REVERSE, &part)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(PendingScatter { insert, mode })
    }

    /// Complete a scatter. Forward: holders combine the contributions of all ranks into
    /// `coarse`, in rank order. Reverse: `local` receives the coarse values of this rank's
    /// constraints.
    ///
    /// # Arguments
    /// * `token` - Returned by the matching [`Self::scatter_coarse_data_begin`]
    /// * `local` - Reverse: one slot per local constraint. Unused on forward.
    /// * `coarse` - Forward, on holders: [`Self::work_vector`] sized accumulator
    ///
    /// # Returns
    /// `Err(BddcError::Comm)` when a message is missing or has the wrong length.
    ///
    /// # Panics
    /// If `coarse` is shorter than the coarse problem on a holder.
    pub fn scatter_coarse_data_end<C: Comm>(
        &self,
        comm: &C,
        token: PendingScatter,
        local: &mut [f64],
        coarse: &mut [f64],
    ) -> Result<(), BddcError> {
        if self.n_coarse == 0 {
            return Ok(());
        }
        let combine = |dst: &mut f64, v: f64| match token.insert {
            InsertMode::Insert => *dst = v,
            InsertMode::Add => *dst += v,
        };
        match token.mode {
            ScatterMode::Forward => {
                if self.is_holder() {
                    for (src, ids) in self.layout.iter().enumerate() {
                        let vals: Vec<f64> = self.recv(comm, src, tags::COARSE_FORWARD, ids.len())?;
                        for (&g, v) in ids.iter().zip(vals) {
                            combine(&mut coarse[g], v);
                        }
                    }
                }
            }
            ScatterMode::Reverse => {
                if self.is_holder() {
                    for (dst, &g) in local.iter_mut().zip(&self.numbers) {
                        combine(dst, coarse[g]);
                    }
                } else {
                    let src = self.holders[0];
                    let vals: Vec<f64> = self.recv(comm, src, tags::COARSE_REVERSE, self.numbers.len())?;
                    for (dst, v) in local.iter_mut().zip(vals) {
                        combine(dst, v);
                    }
                }
            }
        }
        Ok(())
    }

    fn recv<C: Comm>(&self, comm: &C, src: usize, tag: Tag, want: usize) -> Result<Vec<f64>, BddcError> {
        let vals: Vec<f64> = comm.recv(src, tag)?;
        expect_len(self.rank, "coarse scatter", src, vals.len(), want)?;
        Ok(vals)
    }

    /// Solve in place on holders; no-op elsewhere.
    pub fn solve(&self, coarse: &mut [f64]) {
        if let Some(lu) = self.factor.as_ref() {
            lu.solve_in_place(coarse);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::LocalComm;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    /// Two ranks share primal 1; rank 0 also has primal 0, rank 1 has primal 2.
    fn chain(comm: &LocalComm, strategy: Box<dyn CoarseStrategy>) -> (CoarseProblem, Vec<f64>) {
        let (numbers, local) = if comm.rank() == 0 {
            (vec![0, 1], Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { -1.0 }))
        } else {
            (vec![1, 2], Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { -1.0 }))
        };
        let mut pinned = local.clone();
        if comm.rank() == 0 {
            pinned[(0, 0)] += 1.0;
        }
        let problem = CoarseProblem::setup(comm, strategy, &numbers, 3, &pinned, 1e-12).unwrap();

        let rhs = vec![1.0, 1.0];
        let mut coarse = problem.work_vector();
        let token = problem
            .scatter_coarse_data_begin(comm, InsertMode::Add, ScatterMode::Forward, &rhs, &coarse)
            .unwrap();
        problem.scatter_coarse_data_end(comm, token, &mut [], &mut coarse).unwrap();
        problem.solve(&mut coarse);
        let mut out = vec![0.0; 2];
        let token = problem
            .scatter_coarse_data_begin(comm, InsertMode::Insert, ScatterMode::Reverse, &[], &coarse)
            .unwrap();
        problem.scatter_coarse_data_end(comm, token, &mut out, &mut coarse).unwrap();
        (problem, out)
    }

    #[test]
    fn root_and_redundant_agree() {
        for root in [false, true] {
            let outs = LocalComm::run(2, move |comm| {
                let strategy: Box<dyn CoarseStrategy> = if root { Box::new(Root) } else { Box::new(Redundant) };
                let (problem, out) = chain(&comm, strategy);
                assert_eq!(problem.coarse_matrix().is_some(), problem.is_holder());
                out
            });
            // [2 -1 0; -1 2 -1; 0 -1 1] u = [1 2 1]
            assert_abs_diff_eq!(outs[0][0], 4.0, epsilon = 1e-12);
            assert_abs_diff_eq!(outs[0][1], 7.0, epsilon = 1e-12);
            assert_abs_diff_eq!(outs[1][0], 7.0, epsilon = 1e-12);
            assert_abs_diff_eq!(outs[1][1], 8.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn singular_coarse_matrix_fails_everywhere() {
        let errs = LocalComm::run(2, |comm| {
            let local = Mat::from_fn(1, 1, |_, _| 0.0);
            CoarseProblem::setup(&comm, Box::new(Root), &[0], 1, &local, 1e-12).unwrap_err()
        });
        for e in errs {
            assert!(matches!(e, BddcError::SingularFactor { what: "coarse matrix", pivot: 0, .. }));
        }
    }

    #[test]
    fn bad_primal_number_on_the_root_fails_every_rank() {
        let errs = LocalComm::run(3, |comm| {
            let comm = comm.with_timeout(Duration::from_secs(5));
            let numbers = if comm.rank() == 2 { vec![7] } else { vec![comm.rank()] };
            let local = Mat::from_fn(1, 1, |_, _| 1.0);
            CoarseProblem::setup(&comm, Box::new(Root), &numbers, 2, &local, 1e-12).unwrap_err()
        });
        assert!(matches!(errs[0], BddcError::Topology { rank: 0, step: "coarse assembly", .. }));
        for e in &errs[1..] {
            match e {
                BddcError::Comm(msg) => assert!(msg.contains("on another rank"), "{msg}"),
                other => panic!("unexpected error {other}"),
            }
        }
    }
}

//! Balancing Domain Decomposition by Constraints.
//!
//! Every rank holds one subdomain of a [`SubdomainMatrix`]. Setup analyses the interface,
//! selects primal constraints, builds local Schur complements, the local Dirichlet and
//! constrained Neumann solvers, the coarse problem and the interface scaling. The apply is
//!
//! 1. interior (Dirichlet) solve and condensation of the residual on the interface,
//! 2. interface preconditioner: scaled restriction, constrained Neumann solve overlapped with
//!    the coarse forward scatter, coarse solve, reverse scatter, scaled extension,
//! 3. exact interior correction (discrete harmonic extension).
//!
//! Subdomains with an interior pressure null space (benign trick) keep the constant pressure
//! out of the interior solves and carry its mean as a local primal unknown.
//!
//! # References
//! - C. R. Dohrmann, A preconditioner for substructuring based on constrained energy
//!   minimization, SIAM J. Sci. Comput. 25 (2003).
//! - J. Mandel, C. R. Dohrmann, R. Tezaur, An algebraic theory for primal and dual
//!   substructuring methods by constraints, Appl. Numer. Math. 54 (2005).

pub mod adaptive;
pub mod benign;
pub mod coarse;
pub mod constraints;
pub mod fetidp;
pub mod graph;
pub mod local_solvers;
pub mod null_space;
pub mod scaling;
pub mod sub_schurs;

use self::adaptive::AdaptiveParams;
use self::benign::BenignSpace;
use self::coarse::{CoarseProblem, CoarseStrategy, InsertMode, Redundant, Root, ScatterMode};
use self::constraints::{Constraint, ConstraintKey, ConstraintKind, ConstraintSet, tag_candidates};
use self::graph::{Candidate, CandidateKind, GraphInput, InterfaceGraph};
use self::local_solvers::LocalSolvers;
use self::scaling::{DeluxeScaling, MultiplicityScaling, Scaling, ScalingOperator};
use self::sub_schurs::SubSchurs;
use crate::config::{BddcOptions, CoarseKind, ScalingKind};
use crate::context::SetupSession;
use crate::error::BddcError;
use crate::matrix::dense::gemv;
use crate::matrix::{IndexSet, SubdomainMatrix};
use crate::parallel::{Comm, SharingInfo, agree};
use crate::preconditioner::Preconditioner;
use faer::Mat;
use parking_lot::Mutex;
use std::sync::Arc;

/// Setup progress. Phases run in declaration order; only `ApplyReady` allows an apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SetupState {
    Uninitialized,
    GraphBuilt,
    ComponentsComputed,
    ConstraintsSelected,
    SchursComputed,
    LocalSolversReady,
    CoarseSolverReady,
    ApplyReady,
}

/// Dense couplings of the subdomain matrix used by the apply.
#[derive(Debug, Clone)]
struct Couplings {
    k_ib: Mat<f64>,
    k_bi: Mat<f64>,
    k_bb: Mat<f64>,
}

#[derive(Debug, Default)]
struct Scratch {
    coarse: Vec<f64>,
}

pub struct Bddc<C: Comm + Clone> {
    opts: BddcOptions,
    dirichlet: Option<IndexSet>,
    neumann: Option<IndexSet>,
    primal_vertices: Option<IndexSet>,
    fields: Option<Vec<usize>>,
    near_null_space: Option<Vec<Vec<f64>>>,
    session: SetupSession,
    state: SetupState,
    setup_key: Option<(u64, u64)>,
    comm: Option<C>,
    sharing: Option<Arc<SharingInfo>>,
    graph: InterfaceGraph,
    candidates: Vec<Candidate>,
    constraints: ConstraintSet,
    benign: Option<BenignSpace>,
    sub_schurs: Option<SubSchurs>,
    solvers: Option<LocalSolvers>,
    coarse: Option<CoarseProblem>,
    scaling: Option<ScalingOperator>,
    couplings: Option<Couplings>,
    scratch: Mutex<Scratch>,
}

/// Borrowed view of a set-up preconditioner.
struct Ready<'a, C> {
    comm: &'a C,
    sharing: &'a SharingInfo,
    sub_schurs: &'a SubSchurs,
    solvers: &'a LocalSolvers,
    coarse: &'a CoarseProblem,
    scaling: &'a ScalingOperator,
    couplings: &'a Couplings,
    benign: Option<&'a BenignSpace>,
}

impl<C: Comm + Clone> Bddc<C> {
    pub fn new(opts: BddcOptions) -> Self {
        Self {
            opts,
            dirichlet: None,
            neumann: None,
            primal_vertices: None,
            fields: None,
            near_null_space: None,
            session: SetupSession::default(),
            state: SetupState::Uninitialized,
            setup_key: None,
            comm: None,
            sharing: None,
            graph: InterfaceGraph::default(),
            candidates: Vec::new(),
            constraints: ConstraintSet::default(),
            benign: None,
            sub_schurs: None,
            solvers: None,
            coarse: None,
            scaling: None,
            couplings: None,
            scratch: Mutex::new(Scratch::default()),
        }
    }

    pub fn options(&self) -> &BddcOptions {
        &self.opts
    }

    /// Local dofs with Dirichlet boundary conditions.
    pub fn set_dirichlet(&mut self, dofs: IndexSet) {
        self.dirichlet = Some(dofs);
        self.reset();
    }

    /// Local dofs on the natural (Neumann) boundary.
    pub fn set_neumann(&mut self, dofs: IndexSet) {
        self.neumann = Some(dofs);
        self.reset();
    }

    /// Local dofs that must become primal vertices.
    pub fn set_primal_vertices(&mut self, dofs: IndexSet) {
        self.primal_vertices = Some(dofs);
        self.reset();
    }

    /// Field id of every local dof; components never mix fields.
    pub fn set_fields(&mut self, fields: Vec<usize>) {
        self.fields = Some(fields);
        self.reset();
    }

    /// Kernel vectors of the local matrix (local numbering). Directions the primal
    /// constraints leave free are split off the local Neumann solve, so a floating subdomain
    /// needs no constraint to pin it.
    pub fn set_near_null_space(&mut self, vectors: Vec<Vec<f64>>) {
        self.near_null_space = Some(vectors);
        self.reset();
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Set up for `a`. A no-op when already set up for the same operator and values.
    /// Collective: every rank of `a.comm()` must call it.
    ///
    /// # Arguments
    /// * `a` - Subdomain matrix of this rank
    ///
    /// # Returns
    /// * `Ok(())` with the state at [`SetupState::ApplyReady`]
    /// * `Err(BddcError)` on every rank if any rank fails; the rank that failed reports the
    ///   cause, the others a [`BddcError::Comm`]. Every derived structure is dropped and the
    ///   state is `Uninitialized`.
    pub fn setup(&mut self, a: &SubdomainMatrix<C>) -> Result<(), BddcError> {
        let key = (a.id(), a.state());
        if self.state == SetupState::ApplyReady && self.setup_key == Some(key) {
            log::debug!("rank {}: operator unchanged, setup skipped", a.comm().rank());
            return Ok(());
        }
        self.reset();
        match self.run_setup(a) {
            Ok(()) => {
                self.setup_key = Some(key);
                Ok(())
            }
            Err(e) => {
                log::debug!("rank {}: setup failed in state {:?}: {e}", a.comm().rank(), self.state);
                self.reset();
                Err(e)
            }
        }
    }

    fn run_setup(&mut self, a: &SubdomainMatrix<C>) -> Result<(), BddcError> {
        let comm = a.comm();
        let rank = comm.rank();
        let k = a.local();
        let sharing = Arc::clone(a.sharing());
        let opts = self.opts.clone();

        self.session.restart(rank);
        self.session.announce(|| {
            format!(
                "BDDC on {} subdomains, {} global dofs: vertices {}, edges {}, faces {}, {:?} scaling, {:?} coarse solver{}{}",
                comm.size(),
                a.n_global(),
                opts.use_vertices,
                opts.use_edges,
                opts.use_faces,
                opts.scaling,
                opts.coarse,
                if opts.adaptive_threshold.is_some() { ", adaptive" } else { "" },
                if opts.benign_trick { ", benign trick" } else { "" },
            )
        });

        self.session.begin("interface graph");
        let mut graph = InterfaceGraph::init(a.mapping(), a.n_global());
        let input = GraphInput {
            dirichlet: self.dirichlet.as_ref(),
            neumann: self.neumann.as_ref(),
            primal_vertices: self.primal_vertices.as_ref(),
            fields: self.fields.as_deref(),
            vertex_size: opts.vertex_size,
        };
        graph.setup(comm, Arc::clone(&sharing), k, &input)?;
        self.state = SetupState::GraphBuilt;

        self.session.begin("connected components");
        graph.compute_connected_components_local();
        let merged = graph.compute_connected_components(comm);
        agree(comm, "connected components", merged)?;
        self.state = SetupState::ComponentsComputed;

        self.session.begin("constraints");
        let mut candidates = graph.candidates();
        tag_candidates(&mut candidates, &opts);
        let mut constraints = ConstraintSet::from_candidates(&graph, &candidates);
        let interior = graph.interior_dofs();
        let benign = if opts.benign_trick {
            let k_ii = k.submatrix_dense(&interior, &interior);
            BenignSpace::detect(k, &interior, &k_ii, opts.benign_tol)
        } else {
            None
        };
        if let Some(b) = benign.as_ref() {
            constraints.push(Constraint {
                key: ConstraintKey { component: a.n_global() + rank, sub: 0 },
                kind: ConstraintKind::Benign,
                sharers: vec![rank],
                dofs: b.flagged().iter().map(|p| interior[p]).collect(),
                coeffs: b.constraint_coeffs(),
            });
            log::debug!("rank {rank}: benign subdomain, {} pressure dofs", b.flagged().len());
        }
        log::debug!(
            "rank {rank}: {} candidates ({} vertices, {} edges, {} faces), {} constraints",
            candidates.len(),
            candidates.iter().filter(|c| c.kind == CandidateKind::Vertex).count(),
            candidates.iter().filter(|c| c.kind == CandidateKind::Edge).count(),
            candidates.iter().filter(|c| c.kind == CandidateKind::Face).count(),
            constraints.len()
        );
        self.state = SetupState::ConstraintsSelected;

        self.session.begin("local Schur complements");
        let mut sub_schurs = SubSchurs::init(&graph, opts.needs_neighbour_blocks());
        sub_schurs.setup(comm, &sharing, &graph, k, benign.as_ref(), opts.pivot_tol)?;
        if let Some(threshold) = opts.adaptive_threshold {
            let params = AdaptiveParams {
                threshold,
                max_per_component: opts.adaptive_max,
                pivot_tol: opts.pivot_tol,
            };
            let selected = adaptive::select(&graph, &sub_schurs, &candidates, &constraints, params);
            for c in agree(comm, "adaptive selection", selected)? {
                constraints.push(c);
            }
        }
        self.state = SetupState::SchursComputed;

        self.session.begin("local solvers");
        let numbered = constraints.compute_primal_numbering(comm, &sharing);
        agree(comm, "primal numbering", numbered)?;
        let mut solvers = LocalSolvers::new(graph.n_local());
        if let Some(vectors) = self.near_null_space.as_ref() {
            solvers = solvers.with_near_null_space(vectors.clone());
        }
        let built = solvers.setup(rank, k, &sub_schurs, &constraints, true, true, opts.pivot_tol);
        agree(comm, "local solvers", built)?;
        let basis = solvers
            .setup_correction(rank, k, opts.check_correction)
            .map(|m| m.clone());
        let coarse_local = agree(comm, "coarse basis", basis)?;
        self.state = SetupState::LocalSolversReady;

        self.session.begin("coarse solver");
        let strategy: Box<dyn CoarseStrategy> = match opts.coarse {
            CoarseKind::Redundant => Box::new(Redundant),
            CoarseKind::Root => Box::new(Root),
        };
        let coarse = CoarseProblem::setup(
            comm,
            strategy,
            constraints.numbers(),
            constraints.n_global_primal(),
            &coarse_local,
            opts.pivot_tol,
        )?;
        self.state = SetupState::CoarseSolverReady;

        self.session.begin("scaling");
        let interface = sub_schurs.interface().to_vec();
        let strategy: Box<dyn Scaling> = match opts.scaling {
            ScalingKind::Multiplicity => Box::new(MultiplicityScaling::new(&sharing, &interface)),
            ScalingKind::Deluxe => Box::new(DeluxeScaling::new(
                &sharing,
                &graph,
                &candidates,
                &sub_schurs,
                opts.pivot_tol,
            )),
        };
        let scaling = ScalingOperator::new(strategy, interface.clone(), Arc::clone(&sharing));
        let couplings = Couplings {
            k_ib: k.submatrix_dense(&interior, &interface),
            k_bi: k.submatrix_dense(&interface, &interior),
            k_bb: k.submatrix_dense(&interface, &interface),
        };
        self.session.end();

        *self.scratch.get_mut() = Scratch { coarse: coarse.work_vector() };
        self.comm = Some(comm.clone());
        self.sharing = Some(sharing);
        self.graph = graph;
        self.candidates = candidates;
        self.constraints = constraints;
        self.benign = benign;
        self.sub_schurs = Some(sub_schurs);
        self.solvers = Some(solvers);
        self.coarse = Some(coarse);
        self.scaling = Some(scaling);
        self.couplings = Some(couplings);
        self.state = SetupState::ApplyReady;
        Ok(())
    }

    /// Drop everything derived from the operator. Idempotent.
    pub fn reset(&mut self) {
        self.state = SetupState::Uninitialized;
        self.setup_key = None;
        self.comm = None;
        self.sharing = None;
        self.graph.reset();
        self.candidates.clear();
        self.constraints = ConstraintSet::default();
        self.benign = None;
        self.sub_schurs = None;
        self.solvers = None;
        self.coarse = None;
        self.scaling = None;
        self.couplings = None;
        *self.scratch.get_mut() = Scratch::default();
    }

    fn ready(&self) -> Ready<'_, C> {
        match (
            self.state,
            &self.comm,
            &self.sharing,
            &self.sub_schurs,
            &self.solvers,
            &self.coarse,
            &self.scaling,
            &self.couplings,
        ) {
            (
                SetupState::ApplyReady,
                Some(comm),
                Some(sharing),
                Some(sub_schurs),
                Some(solvers),
                Some(coarse),
                Some(scaling),
                Some(couplings),
            ) => Ready {
                comm,
                sharing,
                sub_schurs,
                solvers,
                coarse,
                scaling,
                couplings,
                benign: self.benign.as_ref(),
            },
            _ => panic!("BDDC used in state {:?}; call setup first", self.state),
        }
    }

    /// Partially assembled solve of the local right-hand side `f`: constrained Neumann solve
    /// plus coarse correction `Φ S_c⁻¹ Σ_j Φ_jᵀ f_j`. Collective.
    fn two_level_solve(&self, r: &Ready<'_, C>, f: &[f64]) -> Result<Vec<f64>, BddcError> {
        let v = r.solvers.phi_transpose_apply(f);
        let mut scratch = self.scratch.lock();
        let coarse = &mut scratch.coarse;
        coarse.fill(0.0);
        let token = r
            .coarse
            .scatter_coarse_data_begin(r.comm, InsertMode::Add, ScatterMode::Forward, &v, &coarse[..])?;
        let mut x = r.solvers.neumann_solve(f);
        r.coarse.scatter_coarse_data_end(r.comm, token, &mut [], &mut coarse[..])?;
        r.coarse.solve(&mut coarse[..]);
        let mut u_c = vec![0.0; v.len()];
        let token = r
            .coarse
            .scatter_coarse_data_begin(r.comm, InsertMode::Insert, ScatterMode::Reverse, &[], &coarse[..])?;
        r.coarse.scatter_coarse_data_end(r.comm, token, &mut u_c, &mut coarse[..])?;
        drop(scratch);
        r.solvers.phi_apply_add(&u_c, &mut x);
        Ok(x)
    }

    /// Interface part of the preconditioner on a condensed residual `g_b` (interface
    /// numbering). `p0_rhs` is the pressure-mean component of the interior residual of a
    /// benign subdomain. Returns the consistent interface correction and the local two-level
    /// solution it was averaged from.
    fn interface_correction(
        &self,
        r: &Ready<'_, C>,
        g_b: &[f64],
        p0_rhs: f64,
    ) -> Result<(Vec<f64>, Vec<f64>), BddcError> {
        let interface = r.sub_schurs.interface();
        let interior = r.sub_schurs.interior();
        let mut w = vec![0.0; interface.len()];
        r.scaling.restriction(g_b, &mut w);
        let mut f = vec![0.0; r.sharing.len()];
        for (&i, &x) in interface.iter().zip(&w) {
            f[i] = x;
        }
        if let Some(b) = r.benign {
            let mut f_i = vec![0.0; interior.len()];
            b.set_p0(&mut f_i, p0_rhs);
            for (&i, &x) in interior.iter().zip(&f_i) {
                f[i] = x;
            }
        }
        let z_loc = self.two_level_solve(r, &f)?;
        let x_b: Vec<f64> = interface.iter().map(|&i| z_loc[i]).collect();
        let mut z_b = vec![0.0; interface.len()];
        r.scaling.extension(r.comm, &x_b, &mut z_b)?;
        Ok((z_b, z_loc))
    }

    /// `z_I = -K_II⁻¹ K_IB z_B`, plus the pressure mean of the two-level solution on a benign
    /// subdomain.
    fn harmonic_extension(&self, r: &Ready<'_, C>, z_b: &[f64], z_loc: &[f64]) -> Vec<f64> {
        let interior = r.sub_schurs.interior();
        let mut t = vec![0.0; interior.len()];
        gemv(&r.couplings.k_ib, z_b, &mut t);
        r.solvers.dirichlet_solve(&mut t, r.benign);
        for x in t.iter_mut() {
            *x = -*x;
        }
        if let Some(b) = r.benign {
            let loc_i: Vec<f64> = interior.iter().map(|&i| z_loc[i]).collect();
            b.set_p0(&mut t, b.get_p0(&loc_i));
        }
        t
    }

    /// Interface preconditioner on a consistent interface residual `r_b` (interface
    /// numbering). The result is a local vector holding the interface correction; with
    /// `dirichlet` its interior holds the discrete harmonic extension, otherwise zero.
    /// Collective.
    pub fn apply_interface_preconditioner(&self, r_b: &[f64], dirichlet: bool) -> Result<Vec<f64>, BddcError> {
        let r = self.ready();
        let (z_b, z_loc) = self.interface_correction(&r, r_b, 0.0)?;
        let mut z = vec![0.0; r.sharing.len()];
        for (&i, &x) in r.sub_schurs.interface().iter().zip(&z_b) {
            z[i] = x;
        }
        if dirichlet {
            let z_i = self.harmonic_extension(&r, &z_b, &z_loc);
            for (&i, x) in r.sub_schurs.interior().iter().zip(z_i) {
                z[i] = x;
            }
        }
        Ok(z)
    }

    fn apply_local(&self, res: &[f64], z: &mut [f64]) -> Result<(), BddcError> {
        let r = self.ready();
        let interior = r.sub_schurs.interior();
        let interface = r.sub_schurs.interface();
        assert_eq!(res.len(), r.sharing.len(), "residual has the wrong length");
        assert_eq!(z.len(), r.sharing.len(), "correction has the wrong length");

        let mut u_i: Vec<f64> = interior.iter().map(|&i| res[i]).collect();
        let p0_rhs = r.benign.map_or(0.0, |b| b.get_p0(&u_i));
        r.solvers.dirichlet_solve(&mut u_i, r.benign);

        let mut condensed = vec![0.0; interface.len()];
        gemv(&r.couplings.k_bi, &u_i, &mut condensed);
        r.scaling.assemble(r.comm, &mut condensed)?;
        let g_b: Vec<f64> = interface.iter().zip(&condensed).map(|(&i, &c)| res[i] - c).collect();

        let (z_b, z_loc) = self.interface_correction(&r, &g_b, p0_rhs)?;
        let z_i = self.harmonic_extension(&r, &z_b, &z_loc);
        for (&i, &x) in interface.iter().zip(&z_b) {
            z[i] = x;
        }
        for ((&i, x), u) in interior.iter().zip(z_i).zip(u_i) {
            z[i] = x + u;
        }
        Ok(())
    }

    pub fn graph(&self) -> &InterfaceGraph {
        &self.graph
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    pub fn benign(&self) -> Option<&BenignSpace> {
        self.benign.as_ref()
    }

    pub fn sub_schurs(&self) -> Option<&SubSchurs> {
        self.sub_schurs.as_ref()
    }

    /// Dense interface Schur complement of this subdomain.
    pub fn local_schur(&self) -> Option<&Mat<f64>> {
        self.sub_schurs.as_ref().map(|s| s.schur())
    }

    /// Assembled coarse matrix, on ranks holding the coarse problem.
    pub fn coarse_matrix(&self) -> Option<&Mat<f64>> {
        self.coarse.as_ref().and_then(|c| c.coarse_matrix())
    }

    pub fn coarse_problem(&self) -> Option<&CoarseProblem> {
        self.coarse.as_ref()
    }

    pub fn scaling(&self) -> Option<&ScalingOperator> {
        self.scaling.as_ref()
    }

    pub fn session(&self) -> &SetupSession {
        &self.session
    }
}

impl<C: Comm + Clone> Preconditioner<SubdomainMatrix<C>, Vec<f64>> for Bddc<C> {
    /// `z = M⁻¹ r` on consistent local vectors. Panics unless set up.
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
        self.apply_local(r, z)
    }

    fn setup(&mut self, a: &SubdomainMatrix<C>) -> Result<(), BddcError> {
        Bddc::setup(self, a)
    }
}

//! Saddle-point subdomains whose interior pressure is only determined up to a constant.
//!
//! Each subdomain has two shared velocity dofs, one interior velocity and one interior pressure
//! coupled only to the shared velocities. The interior block is singular, the constant
//! pressure spans its kernel and the benign trick makes its mean a local primal unknown.

mod common;

use approx::assert_abs_diff_eq;
use bddc::parallel::{Comm, LocalComm};
use bddc::preconditioner::bddc::constraints::ConstraintKind;
use bddc::{Bddc, BddcError, BddcOptions, FetidpMat, Preconditioner, SetupState};
use common::{Problem, Subdomain, dense_solve, restrict};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn saddle_problem() -> Problem {
    let betas = [(1.0, 0.0), (0.0, 1.0)];
    let subdomains = [vec![0, 1, 2, 3], vec![0, 1, 4, 5]]
        .into_iter()
        .zip(betas)
        .map(|(l2g, (b0, b1))| {
            let mut triplets = Vec::new();
            for i in 0..3 {
                for j in 0..3 {
                    triplets.push((i, j, if i == j { 2.5 } else { -1.0 }));
                }
            }
            for (v, beta) in [(0, b0), (1, b1)] {
                if beta != 0.0 {
                    triplets.push((v, 3, beta));
                    triplets.push((3, v, beta));
                }
            }
            Subdomain { l2g, triplets }
        })
        .collect();
    Problem { n_global: 6, subdomains }
}

fn benign_options() -> BddcOptions {
    BddcOptions::default().with_benign_trick(true).with_vertex_size(2)
}

#[test]
fn pressure_mean_becomes_a_local_primal_unknown() {
    let problem = saddle_problem();
    LocalComm::run(2, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(benign_options());
        bddc.setup(&a).unwrap();

        let benign = bddc.benign().unwrap();
        assert_eq!(benign.flagged().indices(), &[1]);
        let kinds: Vec<ConstraintKind> = bddc.constraints().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![ConstraintKind::Vertex, ConstraintKind::Vertex, ConstraintKind::Benign]);
        let p0 = bddc.constraints().iter().last().unwrap();
        assert_eq!(p0.key.component, 6 + rank);
        assert_eq!(p0.sharers, vec![rank]);
        assert_eq!(p0.dofs, vec![3]);
        assert_eq!(bddc.constraints().n_global_primal(), 4);
    });
}

#[test]
fn benign_preconditioner_is_exact_with_primal_interface() {
    let problem = saddle_problem();
    let a_global = problem.assemble();
    let mut rng = StdRng::seed_from_u64(5);
    for _ in 0..3 {
        let r: Vec<f64> = (0..problem.n_global).map(|_| rng.r#gen::<f64>() - 0.5).collect();
        let exact = dense_solve(&a_global, &r);
        let out = LocalComm::run(2, |comm| {
            let rank = comm.rank();
            let a = problem.operator(comm);
            let mut bddc = Bddc::new(benign_options().with_check_correction(true));
            bddc.setup(&a).unwrap();
            let l2g = &problem.subdomains[rank].l2g;
            let mut z = vec![0.0; l2g.len()];
            bddc.apply(&restrict(l2g, &r), &mut z).unwrap();
            z
        });
        for (sub, z) in problem.subdomains.iter().zip(&out) {
            for (&g, &zi) in sub.l2g.iter().zip(z) {
                assert_abs_diff_eq!(zi, exact[g], epsilon = 1e-10);
            }
        }
    }
}

#[test]
fn singular_interior_without_benign_trick_fails_setup() {
    let problem = saddle_problem();
    let out = LocalComm::run(2, |comm| {
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default().with_vertex_size(2));
        let err = bddc.setup(&a).unwrap_err();
        (err, bddc.state())
    });
    for (rank, (err, state)) in out.into_iter().enumerate() {
        assert_eq!(state, SetupState::Uninitialized);
        assert_eq!(err, BddcError::SingularFactor { rank, what: "interior block", pivot: 1 });
    }
}

#[test]
fn fetidp_rejects_benign_subdomains() {
    let problem = saddle_problem();
    LocalComm::run(2, |comm| {
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(benign_options());
        bddc.setup(&a).unwrap();
        assert!(matches!(FetidpMat::create(&bddc), Err(BddcError::Unsupported(_))));
    });
}

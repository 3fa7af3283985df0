//! BDDC on a 1D Laplacian: the interface is a set of single points, so the coarse space with
//! vertex constraints captures every interface unknown and the preconditioner is exact.

mod common;

use approx::assert_abs_diff_eq;
use bddc::core::DistributedInnerProduct;
use bddc::parallel::{Comm, LocalComm};
use bddc::preconditioner::bddc::graph::CandidateKind;
use bddc::{Bddc, BddcError, BddcOptions, PcgSolver, Preconditioner, SetupState};
use common::{dense_solve, laplace_1d, restrict};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn two_subdomains_share_one_vertex() {
    let problem = laplace_1d(2, 4);
    let results = LocalComm::run(2, |comm| {
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default());
        bddc.setup(&a).unwrap();

        let comps = bddc.graph().components();
        assert_eq!(comps.len(), 1);
        assert_eq!(comps[0].id, 4);
        assert_eq!(comps[0].nodes.len(), 1);
        assert_eq!(comps[0].sharers, vec![0, 1]);
        let cands = bddc.candidates();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].kind, CandidateKind::Vertex);
        assert_eq!(bddc.constraints().n_global_primal(), 1);

        let scaling = bddc.scaling().unwrap();
        let mut w = vec![0.0];
        scaling.restriction(&[1.0], &mut w);
        w[0]
    });
    assert_eq!(results, vec![0.5, 0.5]);
}

#[test]
fn vertex_coarse_space_gives_the_exact_inverse() {
    for ranks in [2, 3] {
        let problem = laplace_1d(ranks, 4);
        let a_global = problem.assemble();
        let mut rng = StdRng::seed_from_u64(11);
        let r: Vec<f64> = (0..problem.n_global).map(|_| rng.r#gen::<f64>() - 0.5).collect();
        let exact = dense_solve(&a_global, &r);

        let out = LocalComm::run(ranks, |comm| {
            let rank = comm.rank();
            let a = problem.operator(comm);
            let mut bddc = Bddc::new(BddcOptions::default().with_check_correction(true));
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
fn floating_subdomain_without_constraints_fails_setup_everywhere() {
    let problem = laplace_1d(3, 3);
    let out = LocalComm::run(3, |comm| {
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default().with_vertices(false));
        let err = bddc.setup(&a).unwrap_err();
        (err, bddc.state())
    });
    assert!(matches!(
        out[1].0,
        BddcError::SingularFactor { rank: 1, what: "Neumann problem", .. }
    ));
    for (rank, (err, state)) in out.iter().enumerate() {
        assert_eq!(*state, SetupState::Uninitialized);
        if rank != 1 {
            assert!(matches!(err, BddcError::Comm(_)), "rank {rank}: {err}");
        }
    }
}

#[test]
fn supplied_kernel_lets_a_floating_subdomain_go_unconstrained() {
    let problem = laplace_1d(3, 3);
    let a_global = problem.assemble();
    let b: Vec<f64> = (0..problem.n_global).map(|g| 1.0 + (g % 3) as f64).collect();
    let exact = dense_solve(&a_global, &b);
    let out = LocalComm::run(3, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm.clone());
        let l2g = &problem.subdomains[rank].l2g;
        let mut bddc = Bddc::new(BddcOptions::default().with_vertices(false));
        if rank == 1 {
            bddc.set_near_null_space(vec![vec![1.0; l2g.len()]]);
        }
        bddc.setup(&a).unwrap();
        assert_eq!(bddc.constraints().n_global_primal(), 0);

        let weights = a.weights();
        let ip = DistributedInnerProduct::new(&comm, &weights);
        let mut x = vec![0.0; l2g.len()];
        let stats = PcgSolver::new(1e-12, 50)
            .solve(&a, Some(&bddc), &ip, &restrict(l2g, &b), &mut x)
            .unwrap();
        assert!(stats.converged, "rank {rank}: {stats:?}");
        x
    });
    let scale = exact.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
    for (sub, x) in problem.subdomains.iter().zip(&out) {
        for (&g, &xi) in sub.l2g.iter().zip(x) {
            assert_abs_diff_eq!(xi, exact[g], epsilon = 1e-8 * scale);
        }
    }
}

#[test]
fn near_null_space_outside_the_kernel_is_rejected() {
    let problem = laplace_1d(3, 3);
    let out = LocalComm::run(3, |comm| {
        let a = problem.operator(comm.clone());
        let mut bddc = Bddc::new(BddcOptions::default().with_vertices(false));
        if comm.rank() == 1 {
            bddc.set_near_null_space(vec![vec![1.0, 0.0, 0.0, 0.0]]);
        }
        bddc.setup(&a).unwrap_err()
    });
    assert!(matches!(out[1], BddcError::InvalidInput(ref m) if m.contains("not in the kernel")));
    assert!(matches!(out[0], BddcError::Comm(_)));
    assert!(matches!(out[2], BddcError::Comm(_)));
}

#[test]
#[should_panic(expected = "call setup first")]
fn apply_before_setup_panics() {
    let bddc: Bddc<LocalComm> = Bddc::new(BddcOptions::default());
    let mut z = vec![0.0; 3];
    let _ = bddc.apply(&vec![1.0; 3], &mut z);
}

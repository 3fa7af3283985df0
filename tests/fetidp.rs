//! FETI-DP on the same local pieces as BDDC.

mod common;

use approx::assert_abs_diff_eq;
use bddc::core::DistributedInnerProduct;
use bddc::parallel::{Comm, LocalComm};
use bddc::{Bddc, BddcOptions, FetidpMat, FetidpPc, FetidpPcKind, PcgSolver};
use common::{Problem, dense_solve, grid_2d, laplace_1d, restrict};

/// Solve the dual problem with preconditioned CG and recover the primal solution; returns the
/// number of dual iterations.
fn fetidp_solve(problem: &Problem, kind: FetidpPcKind) -> usize {
    let a_global = problem.assemble();
    let b: Vec<f64> = (0..problem.n_global).map(|g| ((g * 37) % 11) as f64 - 5.0).collect();
    let exact = dense_solve(&a_global, &b);
    let ranks = problem.subdomains.len();
    let out = LocalComm::run(ranks, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm.clone());
        let mut bddc = Bddc::new(BddcOptions::default());
        bddc.setup(&a).unwrap();

        let mut fmat = FetidpMat::create(&bddc).unwrap();
        fmat.setup().unwrap();
        let mut pc = FetidpPc::create(&fmat, kind);
        pc.setup().unwrap();
        assert_eq!(pc.kind(), kind);

        let f = restrict(&problem.subdomains[rank].l2g, &b);
        let d = fmat.rhs(&f).unwrap();
        let weights = fmat.weights();
        let ip = DistributedInnerProduct::new(&comm, &weights);
        let mut lambda = vec![0.0; fmat.n_multipliers()];
        let stats = PcgSolver::new(1e-12, 100)
            .solve(&fmat, Some(&pc), &ip, &d, &mut lambda)
            .unwrap();
        assert!(stats.converged, "rank {rank}: dual CG did not converge");
        (fmat.solution(&lambda, &f).unwrap(), stats.iterations, fmat.n_multipliers())
    });
    let scale = exact.iter().fold(1.0_f64, |m, v| m.max(v.abs()));
    for (sub, (u, _, _)) in problem.subdomains.iter().zip(&out) {
        for (&g, &ui) in sub.l2g.iter().zip(u) {
            assert_abs_diff_eq!(ui, exact[g], epsilon = 1e-8 * scale);
        }
    }
    // two faces of four dofs per subdomain, the cross point is primal
    if ranks == 4 {
        assert!(out.iter().all(|(_, _, n)| *n == 8));
    }
    out[0].1
}

#[test]
fn dirichlet_preconditioner_recovers_the_direct_solution() {
    let iterations = fetidp_solve(&grid_2d(2, 2, 4, |_| 1.0), FetidpPcKind::Dirichlet);
    assert!(iterations <= 20, "{iterations} iterations");
}

#[test]
fn lumped_preconditioner_recovers_the_direct_solution() {
    fetidp_solve(&grid_2d(2, 2, 4, |r| 1.0 + r as f64), FetidpPcKind::Lumped);
}

#[test]
fn primal_vertex_interfaces_need_no_multipliers() {
    let problem = laplace_1d(3, 4);
    let a_global = problem.assemble();
    let b: Vec<f64> = (0..problem.n_global).map(|g| g as f64).collect();
    let exact = dense_solve(&a_global, &b);
    let out = LocalComm::run(3, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default());
        bddc.setup(&a).unwrap();
        let mut fmat = FetidpMat::create(&bddc).unwrap();
        fmat.setup().unwrap();
        assert_eq!(fmat.n_multipliers(), 0);
        let f = restrict(&problem.subdomains[rank].l2g, &b);
        assert!(fmat.rhs(&f).unwrap().is_empty());
        fmat.solution(&[], &f).unwrap()
    });
    for (sub, u) in problem.subdomains.iter().zip(&out) {
        for (&g, &ui) in sub.l2g.iter().zip(u) {
            assert_abs_diff_eq!(ui, exact[g], epsilon = 1e-10);
        }
    }
}

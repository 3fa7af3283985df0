//! User-provided boundary marks, primal vertices and fields, and the interface-only apply.

mod common;

use approx::assert_abs_diff_eq;
use bddc::core::DistributedInnerProduct;
use bddc::parallel::{Comm, LocalComm};
use bddc::preconditioner::bddc::graph::{CandidateKind, NodeFlags};
use bddc::{Bddc, BddcOptions, IndexSet, PcgSolver};
use common::{Problem, dense_solve, grid_2d, laplace_1d, restrict};

/// Five-point grid of 2x2 subdomains with 4x4 cells; local index of `(x, y)`.
fn local(x: usize, y: usize) -> usize {
    y * 5 + x
}

fn converges_to_direct_solution(problem: &Problem, configure: impl Fn(usize, &mut Bddc<LocalComm>) + Sync) {
    let a_global = problem.assemble();
    let b: Vec<f64> = (0..problem.n_global).map(|g| (g % 5) as f64).collect();
    let exact = dense_solve(&a_global, &b);
    let out = LocalComm::run(problem.subdomains.len(), |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm.clone());
        let mut bddc = Bddc::new(BddcOptions::default());
        configure(rank, &mut bddc);
        bddc.setup(&a).unwrap();
        let weights = a.weights();
        let ip = DistributedInnerProduct::new(&comm, &weights);
        let l2g = &problem.subdomains[rank].l2g;
        let mut x = vec![0.0; l2g.len()];
        let stats = PcgSolver::new(1e-12, 100)
            .solve(&a, Some(&bddc), &ip, &restrict(l2g, &b), &mut x)
            .unwrap();
        assert!(stats.converged);
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
fn user_primal_vertices_split_faces_on_every_sharer() {
    let problem = grid_2d(2, 2, 4, |_| 1.0);
    let out = LocalComm::run(4, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default());
        if rank == 0 {
            bddc.set_primal_vertices(IndexSet::new(vec![local(4, 0), local(0, 4)]));
        }
        bddc.setup(&a).unwrap();
        let vertices = bddc
            .candidates()
            .iter()
            .filter(|c| c.kind == CandidateKind::Vertex)
            .count();
        let user = bddc
            .graph()
            .components()
            .iter()
            .filter(|c| c.flags.contains(NodeFlags::PRIMAL))
            .count();
        (bddc.graph().components().len(), vertices, user, bddc.constraints().n_global_primal())
    });
    assert_eq!(out[0], (5, 3, 2, 3));
    assert_eq!(out[1], (4, 2, 1, 3));
    assert_eq!(out[2], (4, 2, 1, 3));
    assert_eq!(out[3], (3, 1, 0, 3));

    converges_to_direct_solution(&problem, |rank, bddc| {
        if rank == 0 {
            bddc.set_primal_vertices(IndexSet::new(vec![local(4, 0), local(0, 4)]));
        }
    });
}

#[test]
fn dirichlet_marks_remove_components_from_the_candidates() {
    let problem = grid_2d(2, 2, 4, |_| 1.0);
    let out = LocalComm::run(4, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default());
        if rank == 1 {
            // global node (4, 0), the outer end of the face shared with rank 0
            bddc.set_dirichlet(IndexSet::new(vec![local(0, 0)]));
        }
        bddc.setup(&a).unwrap();
        (
            bddc.graph().components().len(),
            bddc.candidates().len(),
            bddc.graph().dirichlet_dofs().len(),
        )
    });
    assert_eq!(out[0], (4, 3, 1));
    assert_eq!(out[1], (4, 3, 1));
    assert_eq!(out[2], (3, 3, 0));

    converges_to_direct_solution(&problem, |rank, bddc| {
        if rank == 1 {
            bddc.set_dirichlet(IndexSet::new(vec![local(0, 0)]));
        }
    });
}

#[test]
fn fields_never_share_a_component() {
    let problem = grid_2d(2, 2, 4, |_| 1.0);
    let out = LocalComm::run(4, |comm| {
        let rank = comm.rank();
        let l2g = problem.subdomains[rank].l2g.clone();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default().with_faces(true));
        // field 1 above global row 2
        bddc.set_fields(l2g.iter().map(|&g| usize::from(g / 9 >= 2)).collect());
        bddc.setup(&a).unwrap();
        let comps = bddc.graph().components();
        for c in comps {
            let rows: Vec<usize> = c.nodes.iter().map(|&i| l2g[i] / 9).collect();
            assert!(rows.iter().all(|&y| usize::from(y >= 2) == c.field));
        }
        (comps.len(), bddc.constraints().n_global_primal())
    });
    assert_eq!(out, vec![(4, 6), (4, 6), (3, 6), (3, 6)]);
}

#[test]
fn interface_preconditioner_inverts_the_schur_complement() {
    let problem = laplace_1d(3, 4);
    let a_global = problem.assemble();
    // residual supported on the interface only
    let mut r = vec![0.0; problem.n_global];
    r[4] = 1.0;
    r[8] = -2.0;
    let exact = dense_solve(&a_global, &r);
    let out = LocalComm::run(3, |comm| {
        let rank = comm.rank();
        let a = problem.operator(comm);
        let mut bddc = Bddc::new(BddcOptions::default());
        bddc.setup(&a).unwrap();
        let l2g = &problem.subdomains[rank].l2g;
        let interface = bddc.sub_schurs().unwrap().interface().to_vec();
        let r_b: Vec<f64> = interface.iter().map(|&i| r[l2g[i]]).collect();
        let with = bddc.apply_interface_preconditioner(&r_b, true).unwrap();
        let without = bddc.apply_interface_preconditioner(&r_b, false).unwrap();
        (interface, with, without)
    });
    for ((sub, (interface, with, without)), rank) in problem.subdomains.iter().zip(&out).zip(0..) {
        for (i, &g) in sub.l2g.iter().enumerate() {
            assert_abs_diff_eq!(with[i], exact[g], epsilon = 1e-10);
            if interface.contains(&i) {
                assert_abs_diff_eq!(without[i], exact[g], epsilon = 1e-10);
            } else {
                assert_eq!(without[i], 0.0, "rank {rank}, dof {i}");
            }
        }
    }
}

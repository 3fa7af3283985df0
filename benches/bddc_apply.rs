use bddc::parallel::{Comm, LocalComm, LocalToGlobalMapping};
use bddc::{Bddc, BddcOptions, CsrMatrix, Preconditioner, ScalingKind, SubdomainMatrix};
use criterion::{Criterion, black_box, criterion_group, criterion_main};

/// Five-point Laplacian on subdomain `rank` of a `2 × 2` decomposition into `m × m` cells.
fn subdomain(comm: LocalComm, m: usize) -> SubdomainMatrix<LocalComm> {
    let rank = comm.rank();
    let (rx, ry) = (rank % 2, rank / 2);
    let nx = 2 * m + 1;
    let local = |x: usize, y: usize| y * (m + 1) + x;
    let mut l2g = Vec::with_capacity((m + 1) * (m + 1));
    for y in 0..=m {
        for x in 0..=m {
            l2g.push((ry * m + y) * nx + rx * m + x);
        }
    }
    let mut t = Vec::new();
    for cy in 0..m {
        for cx in 0..m {
            for ((x0, y0), (x1, y1)) in [
                ((cx, cy), (cx + 1, cy)),
                ((cx, cy + 1), (cx + 1, cy + 1)),
                ((cx, cy), (cx, cy + 1)),
                ((cx + 1, cy), (cx + 1, cy + 1)),
            ] {
                let (i, j) = (local(x0, y0), local(x1, y1));
                t.extend([(i, i, 0.5), (j, j, 0.5), (i, j, -0.5), (j, i, -0.5)]);
            }
        }
    }
    // pin every local dof lightly so no subdomain floats
    for i in 0..(m + 1) * (m + 1) {
        t.push((i, i, 1e-3));
    }
    let k = CsrMatrix::from_triplets(l2g.len(), l2g.len(), &t).expect("valid triplets");
    let mapping = LocalToGlobalMapping::new(l2g).expect("valid mapping");
    SubdomainMatrix::new(comm, mapping, k, nx * nx).expect("valid operator")
}

fn bench_bddc(c: &mut Criterion) {
    for (name, scaling) in [("multiplicity", ScalingKind::Multiplicity), ("deluxe", ScalingKind::Deluxe)] {
        let opts = BddcOptions::default().with_faces(true).with_scaling(scaling);
        c.bench_function(&format!("bddc setup 2x2 {name}"), |b| {
            b.iter(|| {
                LocalComm::run(4, |comm| {
                    let a = subdomain(comm, 12);
                    let mut pc = Bddc::new(opts.clone());
                    pc.setup(black_box(&a)).expect("setup");
                })
            })
        });
        c.bench_function(&format!("bddc apply 2x2 {name}"), |b| {
            b.iter(|| {
                LocalComm::run(4, |comm| {
                    let a = subdomain(comm, 12);
                    let mut pc = Bddc::new(opts.clone());
                    pc.setup(&a).expect("setup");
                    let r = vec![1.0; a.local().nrows()];
                    let mut z = vec![0.0; r.len()];
                    for _ in 0..20 {
                        pc.apply(black_box(&r), &mut z).expect("apply");
                    }
                })
            })
        });
    }
}

criterion_group!(benches, bench_bddc);
criterion_main!(benches);

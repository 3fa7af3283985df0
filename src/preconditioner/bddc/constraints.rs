//! Primal constraints: which interface quantities are solved globally, and their global
//! numbering.

use super::graph::{Candidate, CandidateKind, CandidateTag, InterfaceGraph};
use crate::config::BddcOptions;
use crate::error::BddcError;
use crate::parallel::{Comm, SharingInfo, tags};
use faer::Mat;
use std::collections::BTreeMap;

/// Identifies a constraint identically on all of its sharers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintKey {
    /// Component id (smallest global dof), or `n_global + rank` for a subdomain-local one.
    pub component: usize,
    pub sub: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Vertex,
    Average,
    Adaptive,
    /// Interior pressure mean of a benign subdomain.
    Benign,
}

/// A row `c` of the local constraint matrix: the primal value is `Σ_k coeffs[k] · u[dofs[k]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub key: ConstraintKey,
    pub kind: ConstraintKind,
    pub sharers: Vec<usize>,
    pub dofs: Vec<usize>,
    pub coeffs: Vec<f64>,
}

impl Constraint {
    /// Lowest sharer.
    pub fn owner(&self) -> usize {
        self.sharers[0]
    }
}

/// Set the `Primal | Local` tag of each candidate from the options.
pub fn tag_candidates(candidates: &mut [Candidate], opts: &BddcOptions) {
    for c in candidates {
        let primal = match c.kind {
            CandidateKind::Vertex => opts.use_vertices,
            CandidateKind::Edge => opts.use_edges,
            CandidateKind::Face => opts.use_faces,
        };
        c.tag = if primal { CandidateTag::Primal } else { CandidateTag::Local };
    }
}

/// Local constraints ordered by key, with their global primal numbers once assigned.
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    constraints: Vec<Constraint>,
    numbers: Vec<usize>,
    n_global_primal: usize,
}

impl ConstraintSet {
    /// Vertex constraints (one per dof of a vertex component) and averages of the edges and
    /// faces tagged primal.
    pub fn from_candidates(graph: &InterfaceGraph, candidates: &[Candidate]) -> Self {
        let mut set = Self::default();
        for cand in candidates.iter().filter(|c| c.tag == CandidateTag::Primal) {
            let comp = &graph.components()[cand.component];
            if comp.nodes.is_empty() {
                log::debug!("rank {}: empty component {} skipped", graph.rank(), comp.id);
                continue;
            }
            match cand.kind {
                CandidateKind::Vertex => {
                    for (sub, &node) in comp.nodes.iter().enumerate() {
                        set.push(Constraint {
                            key: ConstraintKey { component: comp.id, sub },
                            kind: ConstraintKind::Vertex,
                            sharers: comp.sharers.clone(),
                            dofs: vec![node],
                            coeffs: vec![1.0],
                        });
                    }
                }
                CandidateKind::Edge | CandidateKind::Face => {
                    let w = 1.0 / (comp.nodes.len() as f64).sqrt();
                    set.push(Constraint {
                        key: ConstraintKey { component: comp.id, sub: 0 },
                        kind: ConstraintKind::Average,
                        sharers: comp.sharers.clone(),
                        dofs: comp.nodes.clone(),
                        coeffs: vec![w; comp.nodes.len()],
                    });
                }
            }
        }
        set
    }

    /// Insert keeping key order; invalidates the numbering.
    pub fn push(&mut self, c: Constraint) {
        let pos = self.constraints.partition_point(|x| x.key < c.key);
        self.constraints.insert(pos, c);
        self.numbers.clear();
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter()
    }

    pub fn as_slice(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Constraints on the given component.
    pub fn on_component(&self, id: usize) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(move |c| c.key.component == id)
    }

    /// Global primal number of each local constraint (empty before numbering).
    pub fn numbers(&self) -> &[usize] {
        &self.numbers
    }

    pub fn n_global_primal(&self) -> usize {
        self.n_global_primal
    }

    /// Dense `p × n_local` constraint matrix.
    pub fn matrix(&self, n_local: usize) -> Mat<f64> {
        let mut c = Mat::zeros(self.len(), n_local);
        for (k, con) in self.constraints.iter().enumerate() {
            for (&d, &v) in con.dofs.iter().zip(&con.coeffs) {
                c[(k, d)] = v;
            }
        }
        c
    }

    /// Owners number their constraints consecutively after an exclusive scan over ranks and
    /// send `(key, number)` to the other sharers, which validate the keys. Collective.
    pub fn compute_primal_numbering<C: Comm>(
        &mut self,
        comm: &C,
        sharing: &SharingInfo,
    ) -> Result<(), BddcError> {
        let rank = comm.rank();
        let owned = self.constraints.iter().filter(|c| c.owner() == rank).count();
        let counts = comm.all_gather(tags::PRIMAL_NUMBERING, &[owned as u64])?;
        let offset: u64 = counts[..rank].iter().filter_map(|c| c.first()).sum();
        self.n_global_primal = counts.iter().filter_map(|c| c.first()).sum::<u64>() as usize;

        let mut numbers = vec![usize::MAX; self.len()];
        let mut next = offset as usize;
        for (k, c) in self.constraints.iter().enumerate() {
            if c.owner() == rank {
                numbers[k] = next;
                next += 1;
            }
        }

        let received = sharing.exchange(comm, tags::PRIMAL_NUMBERING, |nb| {
            self.constraints
                .iter()
                .zip(&numbers)
                .filter(|(c, _)| c.owner() == rank && c.sharers.contains(&nb.rank))
                .flat_map(|(c, &num)| [c.key.component as u64, c.key.sub as u64, num as u64])
                .collect::<Vec<u64>>()
        })?;

        let index: BTreeMap<ConstraintKey, usize> =
            self.constraints.iter().enumerate().map(|(k, c)| (c.key, k)).collect();
        for (nb, data) in sharing.neighbours().iter().zip(&received) {
            if data.len() % 3 != 0 {
                return Err(BddcError::Comm(format!("ragged primal numbering from rank {}", nb.rank)));
            }
            for t in data.chunks_exact(3) {
                let key = ConstraintKey { component: t[0] as usize, sub: t[1] as usize };
                let k = *index.get(&key).ok_or_else(|| BddcError::Topology {
                    rank,
                    step: "primal numbering",
                    detail: format!("rank {} numbered unknown constraint {key:?}", nb.rank),
                })?;
                if self.constraints[k].owner() != nb.rank {
                    return Err(BddcError::Topology {
                        rank,
                        step: "primal numbering",
                        detail: format!("rank {} is not the owner of constraint {key:?}", nb.rank),
                    });
                }
                numbers[k] = t[2] as usize;
            }
        }
        if let Some(k) = numbers.iter().position(|&n| n == usize::MAX) {
            return Err(BddcError::Topology {
                rank,
                step: "primal numbering",
                detail: format!(
                    "no number received for constraint {:?} from rank {}",
                    self.constraints[k].key,
                    self.constraints[k].owner()
                ),
            });
        }
        self.numbers = numbers;
        log::debug!(
            "rank {rank}: {} local primal constraints, {} global",
            self.len(),
            self.n_global_primal
        );
        Ok(())
    }
}

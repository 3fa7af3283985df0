//! Local-to-global numbering of a subdomain and the sharing pattern derived from it.

use super::{Comm, Tag, expect_len, tags};
use crate::error::BddcError;
use bytemuck::Pod;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Map from the local dofs of a subdomain to global dof indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalToGlobalMapping {
    indices: Vec<usize>,
}

impl LocalToGlobalMapping {
    /// Build a mapping; a global index may appear only once per subdomain.
    pub fn new(indices: Vec<usize>) -> Result<Self, BddcError> {
        let mut seen = HashSet::with_capacity(indices.len());
        for (local, &g) in indices.iter().enumerate() {
            if !seen.insert(g) {
                return Err(BddcError::InvalidInput(format!(
                    "global index {g} mapped twice (local {local})"
                )));
            }
        }
        Ok(Self { indices })
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn global(&self, local: usize) -> usize {
        self.indices[local]
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn global_to_local(&self) -> HashMap<usize, usize> {
        self.indices.iter().enumerate().map(|(l, &g)| (g, l)).collect()
    }

    /// Determine, for every local dof, the ranks whose subdomains contain it.
    ///
    /// Rendezvous exchange: global index `g` is registered with rank `g % size`, which
    /// answers every registrant with the full sorted list of sharers.
    pub fn sharing<C: Comm>(&self, comm: &C) -> Result<SharingInfo, BddcError> {
        let size = comm.size();
        let rank = comm.rank();

        let mut queries: Vec<Vec<(u64, usize)>> = vec![Vec::new(); size];
        for (local, &g) in self.indices.iter().enumerate() {
            queries[g % size].push((g as u64, local));
        }
        for q in &mut queries {
            q.sort_unstable();
        }
        for (dest, q) in queries.iter().enumerate() {
            let gids: Vec<u64> = q.iter().map(|&(g, _)| g).collect();
            comm.send(dest, tags::SHARING_QUERY, &gids)?;
        }

        let mut registry: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        let mut asked: Vec<Vec<u64>> = Vec::with_capacity(size);
        for src in 0..size {
            let gids: Vec<u64> = comm.recv(src, tags::SHARING_QUERY)?;
            for &g in &gids {
                registry.entry(g).or_default().push(src as u64);
            }
            asked.push(gids);
        }
        for (dest, gids) in asked.iter().enumerate() {
            let mut reply = Vec::new();
            for g in gids {
                let ranks = registry.get(g).map_or(&[][..], Vec::as_slice);
                reply.push(ranks.len() as u64);
                reply.extend_from_slice(ranks);
            }
            comm.send(dest, tags::SHARING_REPLY, &reply)?;
        }

        let mut sharers = vec![Vec::new(); self.len()];
        for (owner, q) in queries.iter().enumerate() {
            let reply: Vec<u64> = comm.recv(owner, tags::SHARING_REPLY)?;
            let mut pos = 0;
            for &(_, local) in q {
                let truncated = || BddcError::Comm(format!("truncated sharing reply from rank {owner}"));
                let count = *reply.get(pos).ok_or_else(truncated)? as usize;
                let ranks = reply.get(pos + 1..pos + 1 + count).ok_or_else(truncated)?;
                pos += 1 + count;
                sharers[local] = ranks.iter().map(|&r| r as usize).collect();
            }
        }
        SharingInfo::new(rank, &self.indices, sharers)
    }
}

/// Shared dofs with one neighbouring subdomain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbour {
    pub rank: usize,
    /// Local indices of the shared dofs, ordered by global index (the same order on both sides).
    pub nodes: Vec<usize>,
}

/// Which ranks share each local dof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingInfo {
    rank: usize,
    sharers: Vec<Vec<usize>>,
    neighbours: Vec<Neighbour>,
}

impl SharingInfo {
    /// `sharers[i]` lists the ranks holding local dof `i` (this rank included).
    pub fn new(rank: usize, globals: &[usize], mut sharers: Vec<Vec<usize>>) -> Result<Self, BddcError> {
        if sharers.len() != globals.len() {
            return Err(BddcError::InvalidInput(format!(
                "{} sharer lists for {} dofs",
                sharers.len(),
                globals.len()
            )));
        }
        let mut by_rank: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, s) in sharers.iter_mut().enumerate() {
            s.sort_unstable();
            s.dedup();
            if s.binary_search(&rank).is_err() {
                return Err(BddcError::Topology {
                    rank,
                    step: "sharing",
                    detail: format!("global dof {} does not list its own subdomain", globals[i]),
                });
            }
            for &r in s.iter().filter(|&&r| r != rank) {
                by_rank.entry(r).or_default().push(i);
            }
        }
        let neighbours = by_rank
            .into_iter()
            .map(|(r, mut nodes)| {
                nodes.sort_by_key(|&i| globals[i]);
                Neighbour { rank: r, nodes }
            })
            .collect();
        Ok(Self { rank, sharers, neighbours })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn len(&self) -> usize {
        self.sharers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sharers.is_empty()
    }

    /// Multiplicity of local dof `i`.
    pub fn count(&self, i: usize) -> usize {
        self.sharers[i].len()
    }

    pub fn sharers(&self, i: usize) -> &[usize] {
        &self.sharers[i]
    }

    pub fn is_interface(&self, i: usize) -> bool {
        self.sharers[i].len() > 1
    }

    pub fn neighbours(&self) -> &[Neighbour] {
        &self.neighbours
    }

    /// `1 / count` for every local dof.
    pub fn multiplicity_weights(&self) -> Vec<f64> {
        self.sharers.iter().map(|s| 1.0 / s.len() as f64).collect()
    }

    /// Send `pack(neighbour)` to every neighbour and return what each of them sent back,
    /// in neighbour order.
    pub fn exchange<C, T, F>(&self, comm: &C, tag: Tag, mut pack: F) -> Result<Vec<Vec<T>>, BddcError>
    where
        C: Comm,
        T: Pod,
        F: FnMut(&Neighbour) -> Vec<T>,
    {
        for nb in &self.neighbours {
            comm.send(nb.rank, tag, &pack(nb))?;
        }
        self.neighbours.iter().map(|nb| comm.recv(nb.rank, tag)).collect()
    }

    /// Replace every shared entry by the sum over its sharers. The sum is taken in rank order,
    /// so all sharers end up with bitwise-equal values.
    pub fn sum_shared<C: Comm>(&self, comm: &C, tag: Tag, values: &mut [f64]) -> Result<(), BddcError> {
        let received = self.exchange(comm, tag, |nb| nb.nodes.iter().map(|&i| values[i]).collect::<Vec<f64>>())?;
        let mut parts: HashMap<usize, Vec<(usize, f64)>> = HashMap::new();
        for (nb, vals) in self.neighbours.iter().zip(&received) {
            expect_len(self.rank, "interface sum", nb.rank, vals.len(), nb.nodes.len())?;
            for (&i, &v) in nb.nodes.iter().zip(vals) {
                parts.entry(i).or_default().push((nb.rank, v));
            }
        }
        for (i, mut contribs) in parts {
            contribs.push((self.rank, values[i]));
            contribs.sort_unstable_by_key(|&(r, _)| r);
            values[i] = contribs.iter().map(|&(_, v)| v).sum();
        }
        Ok(())
    }
}

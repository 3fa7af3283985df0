//! Interface graph: classification of the interface dofs of a subdomain and their grouping
//! into connected components shared consistently by all subdomains that touch them.

use crate::core::traits::RowPattern;
use crate::error::BddcError;
use crate::matrix::IndexSet;
use crate::parallel::{Comm, LocalToGlobalMapping, SharingInfo, agree, expect_len, tags};
use bitflags::bitflags;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

bitflags! {
    /// Boundary marks of a dof.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeFlags: u8 {
        const DIRICHLET = 1;
        const NEUMANN = 1 << 1;
        /// User-provided primal vertex.
        const PRIMAL = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CandidateKind {
    Vertex,
    Edge,
    Face,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateTag {
    /// Promoted to the coarse space.
    Primal,
    /// Handled by the local (dual) part of the preconditioner only.
    Local,
}

/// A connected set of interface dofs with identical sharers and marks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Smallest global index in the component; identical on every sharer.
    pub id: usize,
    /// Local dofs, ordered by global index.
    pub nodes: Vec<usize>,
    pub sharers: Vec<usize>,
    pub flags: NodeFlags,
    pub field: usize,
}

impl Component {
    pub fn count(&self) -> usize {
        self.sharers.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Index into [`InterfaceGraph::components`].
    pub component: usize,
    pub kind: CandidateKind,
    /// This rank is the lowest sharer.
    pub owner: bool,
    pub neumann: bool,
    pub tag: CandidateTag,
}

/// Boundary information of a subdomain, in local numbering.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphInput<'a> {
    pub dirichlet: Option<&'a IndexSet>,
    pub neumann: Option<&'a IndexSet>,
    pub primal_vertices: Option<&'a IndexSet>,
    /// Field id of every local dof.
    pub fields: Option<&'a [usize]>,
    pub vertex_size: usize,
}

type ClassKey = (Vec<usize>, usize, u8, Option<usize>);

#[derive(Debug, Clone, Default)]
pub struct InterfaceGraph {
    rank: usize,
    globals: Vec<usize>,
    n_global: usize,
    vertex_size: usize,
    sharing: Option<Arc<SharingInfo>>,
    adjacency: Vec<Vec<usize>>,
    flags: Vec<NodeFlags>,
    field: Vec<usize>,
    class: Vec<Option<usize>>,
    local_label: Vec<Option<usize>>,
    component_of: Vec<Option<usize>>,
    components: Vec<Component>,
}

impl InterfaceGraph {
    /// Declare the dof space of the subdomain.
    pub fn init(mapping: &LocalToGlobalMapping, n_global: usize) -> Self {
        Self {
            globals: mapping.indices().to_vec(),
            n_global,
            ..Self::default()
        }
    }

    /// Build adjacency and node classification, and make the boundary marks consistent across
    /// sharers (a mark set by any sharer holds on all of them). Collective over neighbours.
    pub fn setup<C: Comm, P: RowPattern>(
        &mut self,
        comm: &C,
        sharing: Arc<SharingInfo>,
        pattern: &P,
        input: &GraphInput<'_>,
    ) -> Result<(), BddcError> {
        self.reset();
        let built = self.build_local(comm.rank(), &sharing, pattern, input);
        agree(comm, "interface graph input", built)?;
        self.sharing = Some(Arc::clone(&sharing));

        let received = sharing.exchange(comm, tags::MARKS, |nb| {
            nb.nodes
                .iter()
                .map(|&i| u64::from(self.flags[i].bits()) | (self.field[i] as u64) << 8)
                .collect::<Vec<u64>>()
        })?;
        let merged = sharing
            .neighbours()
            .iter()
            .zip(&received)
            .try_for_each(|(nb, marks)| expect_len(self.rank, "boundary marks", nb.rank, marks.len(), nb.nodes.len()));
        agree(comm, "boundary marks", merged)?;
        for (nb, marks) in sharing.neighbours().iter().zip(&received) {
            for (&i, &m) in nb.nodes.iter().zip(marks) {
                self.flags[i] |= NodeFlags::from_bits_truncate((m & 0xff) as u8);
                self.field[i] = self.field[i].min((m >> 8) as usize);
            }
        }

        let mut classes: BTreeMap<ClassKey, usize> = BTreeMap::new();
        self.class = vec![None; self.globals.len()];
        for i in 0..self.globals.len() {
            if !sharing.is_interface(i) {
                continue;
            }
            let marks = self.flags[i] & (NodeFlags::DIRICHLET | NodeFlags::NEUMANN);
            let vertex = self.flags[i].contains(NodeFlags::PRIMAL).then_some(self.globals[i]);
            let key = (sharing.sharers(i).to_vec(), self.field[i], marks.bits(), vertex);
            let next = classes.len();
            self.class[i] = Some(*classes.entry(key).or_insert(next));
        }
        log::debug!(
            "rank {}: {} interface dofs in {} classes",
            self.rank,
            self.class.iter().flatten().count(),
            classes.len()
        );
        Ok(())
    }

    fn build_local<P: RowPattern>(
        &mut self,
        rank: usize,
        sharing: &SharingInfo,
        pattern: &P,
        input: &GraphInput<'_>,
    ) -> Result<(), BddcError> {
        let n = self.globals.len();
        self.rank = rank;
        if sharing.len() != n {
            return Err(BddcError::InvalidInput(format!(
                "sharing information for {} dofs, graph has {n}",
                sharing.len()
            )));
        }
        if let Some(&g) = self.globals.iter().find(|&&g| g >= self.n_global) {
            return Err(BddcError::InvalidInput(format!(
                "global index {g} outside the {} global dofs",
                self.n_global
            )));
        }
        self.vertex_size = input.vertex_size.max(1);

        self.flags = vec![NodeFlags::empty(); n];
        for (set, flag) in [
            (input.dirichlet, NodeFlags::DIRICHLET),
            (input.neumann, NodeFlags::NEUMANN),
            (input.primal_vertices, NodeFlags::PRIMAL),
        ] {
            if let Some(set) = set {
                for (i, marked) in set.to_mask(n)?.into_iter().enumerate() {
                    if marked {
                        self.flags[i] |= flag;
                    }
                }
            }
        }
        self.field = match input.fields {
            Some(f) if f.len() == n => f.to_vec(),
            Some(f) => {
                return Err(BddcError::InvalidInput(format!(
                    "{} field ids for {n} dofs",
                    f.len()
                )));
            }
            None => vec![0; n],
        };

        self.adjacency = vec![Vec::new(); n];
        for i in 0..n {
            for &j in pattern.row_indices(i) {
                if j == i {
                    continue;
                }
                if j >= n {
                    return Err(BddcError::InvalidInput(format!("column {j} in row {i} out of range")));
                }
                self.adjacency[i].push(j);
                self.adjacency[j].push(i);
            }
        }
        for adj in &mut self.adjacency {
            adj.sort_unstable();
            adj.dedup();
        }
        Ok(())
    }

    /// Breadth-first search inside each node class over the local adjacency. The label of a
    /// local component is its smallest global index.
    pub fn compute_connected_components_local(&mut self) {
        let n = self.globals.len();
        let mut label = vec![None; n];
        let mut order: Vec<usize> = (0..n).filter(|&i| self.class.get(i).copied().flatten().is_some()).collect();
        order.sort_by_key(|&i| self.globals[i]);
        let mut queue = VecDeque::new();
        for &start in &order {
            if label[start].is_some() {
                continue;
            }
            let class = self.class[start];
            label[start] = Some(self.globals[start]);
            queue.push_back(start);
            while let Some(i) = queue.pop_front() {
                for &j in &self.adjacency[i] {
                    if label[j].is_none() && self.class[j] == class {
                        // Visiting in global order, so `start` already holds the smallest index.
                        label[j] = Some(self.globals[start]);
                        queue.push_back(j);
                    }
                }
            }
        }
        self.local_label = label;
    }

    /// Merge local components across subdomains: two interface dofs stay together iff every
    /// sharer sees them locally connected. Collective over neighbours; ends with the mandatory
    /// consistency check.
    pub fn compute_connected_components<C: Comm>(&mut self, comm: &C) -> Result<(), BddcError> {
        let sharing = self.sharing_info()?;
        if self.local_label.len() != self.globals.len() {
            self.compute_connected_components_local();
        }
        let received = sharing.exchange(comm, tags::COMPONENT_LABELS, |nb| {
            nb.nodes
                .iter()
                .map(|&i| self.local_label[i].map_or(u64::MAX, |l| l as u64))
                .collect::<Vec<u64>>()
        })?;

        self.component_of = vec![None; self.globals.len()];
        self.components.clear();
        // The consistency exchange runs whether or not the merge succeeded.
        let merged = self.merge_components(&sharing, &received);
        let checked = self.check_consistency(comm);
        merged.and(checked)
    }

    fn merge_components(&mut self, sharing: &SharingInfo, received: &[Vec<u64>]) -> Result<(), BddcError> {
        let mut signature: HashMap<usize, Vec<(usize, u64)>> = HashMap::new();
        for (i, l) in self.local_label.iter().enumerate() {
            if let Some(l) = l {
                signature.insert(i, vec![(self.rank, *l as u64)]);
            }
        }
        for (nb, labels) in sharing.neighbours().iter().zip(received) {
            expect_len(self.rank, "component labels", nb.rank, labels.len(), nb.nodes.len())?;
            for (&i, &l) in nb.nodes.iter().zip(labels) {
                let sig = signature.get_mut(&i).ok_or_else(|| BddcError::Topology {
                    rank: self.rank,
                    step: "component labels",
                    detail: format!("global dof {} is not an interface dof here", self.globals[i]),
                })?;
                sig.push((nb.rank, l));
            }
        }

        let mut groups: BTreeMap<Vec<(usize, u64)>, Vec<usize>> = BTreeMap::new();
        for (i, mut sig) in signature {
            sig.sort_unstable();
            groups.entry(sig).or_default().push(i);
        }
        let mut components: Vec<Component> = groups
            .into_values()
            .map(|mut nodes| {
                nodes.sort_by_key(|&i| self.globals[i]);
                let first = nodes[0];
                Component {
                    id: self.globals[first],
                    sharers: sharing.sharers(first).to_vec(),
                    flags: self.flags[first],
                    field: self.field[first],
                    nodes,
                }
            })
            .collect();
        components.sort_by_key(|c| c.id);

        for (k, c) in components.iter().enumerate() {
            for &i in &c.nodes {
                self.component_of[i] = Some(k);
            }
        }
        self.components = components;
        log::debug!("rank {}: {} interface components", self.rank, self.components.len());
        Ok(())
    }

    /// Every sharer of a dof must report the same component id, component size and
    /// multiplicity for it.
    pub(crate) fn check_consistency<C: Comm>(&self, comm: &C) -> Result<(), BddcError> {
        let sharing = self.sharing_info()?;
        let describe = |i: usize| -> [u64; 3] {
            match self.component_of(i) {
                Some(k) => {
                    let c = &self.components[k];
                    [c.id as u64, c.nodes.len() as u64, c.count() as u64]
                }
                None => [u64::MAX, 0, 0],
            }
        };
        let received = sharing.exchange(comm, tags::COMPONENT_CHECK, |nb| {
            nb.nodes.iter().flat_map(|&i| describe(i)).collect::<Vec<u64>>()
        })?;
        for (nb, data) in sharing.neighbours().iter().zip(&received) {
            expect_len(self.rank, "component check", nb.rank, data.len(), 3 * nb.nodes.len())?;
            for (&i, theirs) in nb.nodes.iter().zip(data.chunks_exact(3)) {
                let ours = describe(i);
                if ours[..] != theirs[..] {
                    return Err(BddcError::Topology {
                        rank: self.rank,
                        step: "component check",
                        detail: format!(
                            "global dof {}: component {} of size {} shared by {} here, \
                             component {} of size {} shared by {} on rank {}",
                            self.globals[i], ours[0], ours[1], ours[2], theirs[0], theirs[1], theirs[2], nb.rank
                        ),
                    });
                }
            }
        }
        Ok(())
    }

    /// One candidate per component, Dirichlet components excluded. All tagged `Local`.
    pub fn candidates(&self) -> Vec<Candidate> {
        let mut out = Vec::with_capacity(self.components.len());
        for (k, c) in self.components.iter().enumerate() {
            if c.flags.contains(NodeFlags::DIRICHLET) {
                log::debug!("rank {}: skipping Dirichlet component {}", self.rank, c.id);
                continue;
            }
            let neumann = c.flags.contains(NodeFlags::NEUMANN);
            let kind = if c.nodes.len() <= self.vertex_size || c.flags.contains(NodeFlags::PRIMAL) {
                CandidateKind::Vertex
            } else if c.count() == 2 && !neumann {
                CandidateKind::Face
            } else {
                CandidateKind::Edge
            };
            out.push(Candidate {
                component: k,
                kind,
                owner: c.sharers.first() == Some(&self.rank),
                neumann,
                tag: CandidateTag::Local,
            });
        }
        out
    }

    fn sharing_info(&self) -> Result<Arc<SharingInfo>, BddcError> {
        self.sharing
            .clone()
            .ok_or(BddcError::Unsupported("interface graph used before setup"))
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_local(&self) -> usize {
        self.globals.len()
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    pub fn global(&self, i: usize) -> usize {
        self.globals[i]
    }

    pub fn flags(&self, i: usize) -> NodeFlags {
        self.flags[i]
    }

    pub fn is_interface(&self, i: usize) -> bool {
        self.class.get(i).copied().flatten().is_some()
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component_of(&self, i: usize) -> Option<usize> {
        self.component_of.get(i).copied().flatten()
    }

    pub fn local_label(&self, i: usize) -> Option<usize> {
        self.local_label.get(i).copied().flatten()
    }

    /// Local indices of the interface dofs, ascending.
    pub fn interface_dofs(&self) -> Vec<usize> {
        (0..self.n_local()).filter(|&i| self.is_interface(i)).collect()
    }

    /// Local indices of the interior dofs, ascending.
    pub fn interior_dofs(&self) -> Vec<usize> {
        (0..self.n_local()).filter(|&i| !self.is_interface(i)).collect()
    }

    pub fn dirichlet_dofs(&self) -> IndexSet {
        self.marked(NodeFlags::DIRICHLET)
    }

    pub fn neumann_dofs(&self) -> IndexSet {
        self.marked(NodeFlags::NEUMANN)
    }

    /// Dirichlet dofs on the interface, as positions in [`Self::interface_dofs`].
    pub fn dirichlet_dofs_boundary(&self) -> IndexSet {
        self.interface_dofs()
            .into_iter()
            .enumerate()
            .filter(|&(_, i)| self.flags[i].contains(NodeFlags::DIRICHLET))
            .map(|(pos, _)| pos)
            .collect()
    }

    fn marked(&self, flag: NodeFlags) -> IndexSet {
        self.flags
            .iter()
            .enumerate()
            .filter(|(_, f)| f.contains(flag))
            .map(|(i, _)| i)
            .collect()
    }

    /// Drop everything derived from the operator; the dof space declared by `init` stays.
    pub fn reset(&mut self) {
        self.sharing = None;
        self.adjacency.clear();
        self.flags.clear();
        self.field.clear();
        self.class.clear();
        self.local_label.clear();
        self.component_of.clear();
        self.components.clear();
    }

    #[cfg(test)]
    pub(crate) fn components_mut(&mut self) -> &mut Vec<Component> {
        &mut self.components
    }
}

//! API options for the BDDC preconditioner.
//!
//! `BddcOptions` selects which interface components become primal constraints, the scaling
//! and coarse strategies, adaptive selection, and the benign saddle-point treatment. Defaults
//! match a plain BDDC with vertex constraints, edge averages and multiplicity scaling.

/// Partition-of-unity strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingKind {
    /// Weights `1 / multiplicity`.
    Multiplicity,
    /// Per-component weights `(Σ_j S_j)⁻¹ S_i` from local Schur complements.
    Deluxe,
}

/// Where the coarse problem is assembled and factored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoarseKind {
    /// Every rank holds and solves the whole coarse problem.
    Redundant,
    /// Rank 0 solves; the others only send and receive coarse data.
    Root,
}

/// Options of the BDDC preconditioner.
#[derive(Debug, Clone, PartialEq)]
pub struct BddcOptions {
    /// Promote vertex candidates to primal constraints.
    pub use_vertices: bool,
    /// Promote edge averages.
    pub use_edges: bool,
    /// Promote face averages.
    pub use_faces: bool,
    /// Components with at most this many dofs are vertices.
    pub vertex_size: usize,
    pub scaling: ScalingKind,
    /// Adaptive selection threshold; `None` disables it.
    pub adaptive_threshold: Option<f64>,
    /// Maximum number of adaptive constraints per component.
    pub adaptive_max: usize,
    /// Detect and treat interior pressure null spaces.
    pub benign_trick: bool,
    pub coarse: CoarseKind,
    /// Verify the coarse basis after it is computed.
    pub check_correction: bool,
    /// Relative pivot tolerance of the dense factorizations.
    pub pivot_tol: f64,
    /// Relative tolerance of the benign null-space check.
    pub benign_tol: f64,
}

impl Default for BddcOptions {
    fn default() -> Self {
        Self {
            use_vertices: true,
            use_edges: true,
            use_faces: false,
            vertex_size: 1,
            scaling: ScalingKind::Multiplicity,
            adaptive_threshold: None,
            adaptive_max: 8,
            benign_trick: false,
            coarse: CoarseKind::Redundant,
            check_correction: false,
            pivot_tol: 1e-12,
            benign_tol: 1e-10,
        }
    }
}

impl BddcOptions {
    pub fn with_vertices(mut self, flag: bool) -> Self {
        self.use_vertices = flag;
        self
    }
    pub fn with_edges(mut self, flag: bool) -> Self {
        self.use_edges = flag;
        self
    }
    pub fn with_faces(mut self, flag: bool) -> Self {
        self.use_faces = flag;
        self
    }
    pub fn with_vertex_size(mut self, size: usize) -> Self {
        self.vertex_size = size;
        self
    }
    pub fn with_scaling(mut self, scaling: ScalingKind) -> Self {
        self.scaling = scaling;
        self
    }
    pub fn with_adaptive(mut self, threshold: f64, max_per_component: usize) -> Self {
        self.adaptive_threshold = Some(threshold);
        self.adaptive_max = max_per_component;
        self
    }
    pub fn with_benign_trick(mut self, flag: bool) -> Self {
        self.benign_trick = flag;
        self
    }
    pub fn with_coarse(mut self, coarse: CoarseKind) -> Self {
        self.coarse = coarse;
        self
    }
    pub fn with_check_correction(mut self, flag: bool) -> Self {
        self.check_correction = flag;
        self
    }
    pub fn with_pivot_tol(mut self, tol: f64) -> Self {
        self.pivot_tol = tol;
        self
    }

    /// Deluxe scaling and adaptive selection need every sharer's Schur block.
    pub fn needs_neighbour_blocks(&self) -> bool {
        self.scaling == ScalingKind::Deluxe || self.adaptive_threshold.is_some()
    }
}

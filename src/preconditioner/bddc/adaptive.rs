//! Adaptive selection of primal constraints from local generalized eigenproblems.
//!
//! For every edge or face component and every sharer `j`, the eigenpairs of
//! `S_j v = μ S_Σ v` (`S_Σ` the sum of the sharer blocks) with `μ < 1 / threshold` mark modes
//! that subdomain `j` cannot control on its own; the functionals `S_Σ v` become primal
//! constraints. All sharers work on bitwise-identical data and select the same constraints.
//!
//! Overlaps are resolved by construction: components are disjoint, candidate vectors of one
//! component are visited by sharer rank and ascending `μ`, and a vector already spanned by the
//! existing constraints of the component (or by earlier selected vectors) is dropped.

use super::constraints::{Constraint, ConstraintKey, ConstraintKind, ConstraintSet};
use super::graph::{Candidate, CandidateKind, InterfaceGraph};
use super::sub_schurs::SubSchurs;
use crate::error::BddcError;
use crate::matrix::dense::{
    cholesky, column, gemv, orthonormalize, solve_lower_mat, solve_lower_transpose, symmetric_eigen,
};
use faer::Mat;

/// Parameters of the adaptive selection.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveParams {
    pub threshold: f64,
    pub max_per_component: usize,
    pub pivot_tol: f64,
}

/// Adaptive constraints for all edge and face candidates; keys use sub-indices from 1 on.
pub fn select(
    graph: &InterfaceGraph,
    sub_schurs: &SubSchurs,
    candidates: &[Candidate],
    existing: &ConstraintSet,
    params: AdaptiveParams,
) -> Result<Vec<Constraint>, BddcError> {
    if !(params.threshold > 1.0) {
        return Err(BddcError::InvalidInput(format!(
            "adaptive threshold must exceed 1, got {}",
            params.threshold
        )));
    }
    let mut out = Vec::new();
    for cand in candidates.iter().filter(|c| c.kind != CandidateKind::Vertex) {
        let comp = &graph.components()[cand.component];
        let Some(block) = sub_schurs.block(cand.component) else {
            continue;
        };
        let Some(sum) = block.sum.as_ref() else {
            log::debug!("rank {}: no neighbour blocks for component {}", graph.rank(), comp.id);
            continue;
        };
        let l = match cholesky(sum, params.pivot_tol) {
            Ok(l) => l,
            Err(_) => {
                log::debug!(
                    "rank {}: summed Schur block of component {} is not definite, skipped",
                    graph.rank(),
                    comp.id
                );
                continue;
            }
        };

        let mut vectors = Vec::new();
        for (_, s_j) in &block.sharers {
            let g = congruence(&l, s_j);
            let (values, modes) = symmetric_eigen(&g)?;
            for (k, &mu) in values.iter().enumerate() {
                if mu >= 1.0 / params.threshold {
                    break;
                }
                let mut v = column(&modes, k);
                solve_lower_transpose(&l, &mut v);
                let mut c = vec![0.0; v.len()];
                gemv(sum, &v, &mut c);
                vectors.push(c);
            }
        }
        if vectors.is_empty() {
            continue;
        }

        let position = |dof: usize| comp.nodes.iter().position(|&n| n == dof);
        let base: Vec<Vec<f64>> = existing
            .on_component(comp.id)
            .map(|c| {
                let mut row = vec![0.0; comp.nodes.len()];
                for (&d, &v) in c.dofs.iter().zip(&c.coeffs) {
                    if let Some(p) = position(d) {
                        row[p] = v;
                    }
                }
                row
            })
            .collect();
        let base = orthonormalize(base, 1e-12);
        let n_base = base.len();
        let mut all = base;
        all.extend(vectors);
        let mut selected = orthonormalize(all, 1e-8).split_off(n_base);
        if selected.len() > params.max_per_component {
            log::debug!(
                "rank {}: component {} keeps {} of {} adaptive constraints",
                graph.rank(),
                comp.id,
                params.max_per_component,
                selected.len()
            );
            selected.truncate(params.max_per_component);
        }
        for (k, coeffs) in selected.into_iter().enumerate() {
            out.push(Constraint {
                key: ConstraintKey { component: comp.id, sub: k + 1 },
                kind: ConstraintKind::Adaptive,
                sharers: comp.sharers.clone(),
                dofs: comp.nodes.clone(),
                coeffs,
            });
        }
    }
    log::debug!("rank {}: {} adaptive constraints", graph.rank(), out.len());
    Ok(out)
}

/// `L⁻¹ S L⁻ᵀ` for symmetric `S`.
fn congruence(l: &Mat<f64>, s: &Mat<f64>) -> Mat<f64> {
    let mut half = s.clone();
    solve_lower_mat(l, &mut half);
    // (L⁻¹ S)ᵀ = S L⁻ᵀ
    let mut g = half.transpose().to_owned();
    solve_lower_mat(l, &mut g);
    g
}

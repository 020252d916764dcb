//! Prediction (spec §4.5): invokes a pretrained feed-forward model over a
//! fixed-order feature vector, writes the score, and re-establishes
//! candidate order.
//!
//! Grounded on the "tensor multiply-add for a small MLP is trivially
//! inlined" note (spec §2): rather than pull in a tensor runtime, the model
//! is a plain two-layer MLP evaluated with nested dot products, loaded once
//! per worker process from a JSON weight file (spec §9 "Global state... treat
//! as explicit dependencies injected into each component").

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::row::{recompute_delta, sort_candidates, Row};

/// Feature names in the order §4.4 lists them; the ρ model consumes exactly
/// this vector, padding anything missing with 0 (spec §3 invariant).
pub const INITIAL_FEATURE_ORDER: &[&str] = &[
    "ed_score",
    "jaccard_score",
    "jaccardNgram_score",
    "popularity",
    "pos_score",
    "es_score",
    "ambiguity_mention",
    "ntoken_mention",
    "length_mention",
    "ntoken_entity",
    "length_entity",
    "ncorrects_tokens",
    "desc",
    "descNgram",
    "p_obj_ne",
    "p_subj_ne",
    "p_subj_lit_datatype",
    "p_subj_lit_all_datatype",
    "p_subj_lit_row",
];

/// The ρ′ model's input adds the per-candidate CTA/CPA profile features
/// derived in Features Revision (spec §4.6 step 5).
pub fn revision_feature_order() -> Vec<String> {
    let mut order: Vec<String> = INITIAL_FEATURE_ORDER.iter().map(|s| s.to_string()).collect();
    for k in 1..=5 {
        order.push(format!("cta_t{k}"));
    }
    for k in 1..=5 {
        order.push(format!("cpa_t{k}"));
    }
    order
}

/// Weight layout for a single-hidden-layer MLP: `hidden = relu(W1 x + b1)`,
/// `output = sigmoid(w2 . hidden + b2)`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelWeights {
    pub w1: Vec<Vec<f64>>,
    pub b1: Vec<f64>,
    pub w2: Vec<f64>,
    pub b2: f64,
}

/// A loaded scoring model bound to a fixed feature order.
pub struct ScoringModel {
    weights: ModelWeights,
    feature_order: Vec<String>,
}

impl ScoringModel {
    pub fn load(path: &Path, feature_order: Vec<String>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading model weights from {}", path.display()))?;
        let weights: ModelWeights = serde_json::from_str(&raw)
            .with_context(|| format!("parsing model weights from {}", path.display()))?;
        if weights.w1.iter().any(|row| row.len() != feature_order.len()) {
            anyhow::bail!(
                "model at {} expects {} input features, feature order has {}",
                path.display(),
                weights.w1.first().map(|r| r.len()).unwrap_or(0),
                feature_order.len()
            );
        }
        Ok(Self { weights, feature_order })
    }

    fn score_one(&self, features: &std::collections::HashMap<String, f64>) -> f64 {
        let x: Vec<f64> = self.feature_order.iter().map(|f| features.get(f).copied().unwrap_or(0.0)).collect();
        let hidden: Vec<f64> = self
            .weights
            .w1
            .iter()
            .zip(&self.weights.b1)
            .map(|(row, b)| {
                let sum: f64 = row.iter().zip(&x).map(|(w, xi)| w * xi).sum();
                (sum + b).max(0.0)
            })
            .collect();
        let out: f64 =
            hidden.iter().zip(&self.weights.w2).map(|(h, w)| h * w).sum::<f64>() + self.weights.b2;
        sigmoid(out)
    }
}

#[cfg(test)]
impl ScoringModel {
    pub(crate) fn from_weights(weights: ModelWeights, feature_order: Vec<String>) -> Self {
        Self { weights, feature_order }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Scores every (cell, candidate) pair in `rows`, assembling the batch
/// tensor implicitly as one pass over all candidates (spec §4.5 step 1-2).
/// `by_prime` selects whether ρ or ρ′ is written (spec §4.5 step 3).
pub fn run(rows: &mut [Row], model: &ScoringModel, by_prime: bool) {
    for row in rows.iter_mut() {
        for cell in row.ne_cells_mut() {
            for candidate in cell.candidates.iter_mut() {
                let score = model.score_one(&candidate.features);
                if by_prime {
                    candidate.score_prime = Some(score);
                } else {
                    candidate.score = Some(score);
                }
            }
            sort_candidates(&mut cell.candidates, by_prime);
            recompute_delta(&mut cell.candidates, by_prime);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::{Candidate, Cell, NeCell};

    fn identity_model(n_features: usize) -> ScoringModel {
        let feature_order: Vec<String> = (0..n_features).map(|i| format!("f{i}")).collect();
        ScoringModel {
            weights: ModelWeights {
                w1: vec![vec![1.0; n_features]],
                b1: vec![0.0],
                w2: vec![1.0],
                b2: -1000.0,
            },
            feature_order,
        }
    }

    #[test]
    fn ranking_stability_ties_break_by_ascending_id() {
        let mut cand_a = Candidate { id: "Q100".into(), ..Default::default() };
        cand_a.score_prime = Some(0.8);
        let mut cand_b = Candidate { id: "Q090".into(), ..Default::default() };
        cand_b.score_prime = Some(0.8);

        let mut candidates = vec![cand_a, cand_b];
        sort_candidates(&mut candidates, true);
        assert_eq!(candidates[0].id, "Q090");
    }

    #[test]
    fn run_writes_score_and_resorts() {
        let model = identity_model(1);
        let mut candidates = vec![
            Candidate { id: "Q1".into(), features: [("f0".to_string(), 0.0)].into(), ..Default::default() },
            Candidate { id: "Q2".into(), features: [("f0".to_string(), 1.0)].into(), ..Default::default() },
        ];
        candidates.reverse();
        let mut rows = vec![Row {
            id_row: 0,
            cells: vec![Cell::Ne(NeCell {
                text: "x".into(),
                column_index: 0,
                is_subject: false,
                provided_id: None,
                candidates,
                normalized_text: "x".into(),
            })],
        }];

        run(&mut rows, &model, false);
        let ne = rows[0].ne_cells().next().unwrap();
        assert_eq!(ne.candidates[0].id, "Q2");
        assert!(ne.candidates[0].score.unwrap() > ne.candidates[1].score.unwrap());
    }
}

//! Feature Extraction, revision pass (spec §4.6): cross-row/column
//! aggregates derived from the ρ-ranked snapshot, feeding the ρ′ model.
//!
//! No `original_source` file survived retrieval for this phase; the
//! snapshot-then-aggregate shape (build a stable snapshot first, then derive
//! profiles from it) follows the "no in-place mutation during aggregation"
//! constraint (spec §9) rather than any specific retrieved source.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::kg_client::KgClient;
use crate::model::row::{Cell, Row, TypeRef};
use crate::model::table::Target;

/// A column's top-5 weighted type ids (CTA₁…₅, spec §4.6 step 1).
#[derive(Debug, Clone, Default)]
pub struct TypeProfile {
    pub ranked: Vec<(String, f64)>,
}

/// A column-pair's top-5 weighted predicate ids (CPA₁…₅, spec §4.6 step 3).
#[derive(Debug, Clone, Default)]
pub struct PredicateProfile {
    pub ranked: Vec<(String, f64)>,
}

#[derive(Debug, Default)]
pub struct RevisionProfiles {
    /// NE column index -> type profile.
    pub cta: HashMap<usize, TypeProfile>,
    /// (subjectCol, otherCol) -> predicate profile; `otherCol` ranges over
    /// every other NE column and every LIT column.
    pub cpa: HashMap<(usize, usize), PredicateProfile>,
}

struct Top1 {
    id: String,
    types: Vec<TypeRef>,
    score: f64,
}

struct Snapshot {
    /// column -> [(idRow, top1)], stable before any rescoring (spec §5
    /// "workers MUST NOT observe partial updates").
    ne_top1: HashMap<usize, Vec<(i64, Top1)>>,
    lit_cells: HashMap<usize, Vec<(i64, String)>>,
}

fn build_snapshot(rows: &[Row]) -> Snapshot {
    let mut ne_top1: HashMap<usize, Vec<(i64, Top1)>> = HashMap::new();
    let mut lit_cells: HashMap<usize, Vec<(i64, String)>> = HashMap::new();
    for row in rows {
        for ne in row.ne_cells() {
            if let Some(top) = ne.candidates.first() {
                ne_top1.entry(ne.column_index).or_default().push((
                    row.id_row,
                    Top1 { id: top.id.clone(), types: top.types.clone(), score: top.score.unwrap_or(0.0) },
                ));
            }
        }
        for lit in row.lit_cells() {
            lit_cells.entry(lit.column_index).or_default().push((row.id_row, lit.normalized_text.clone()));
        }
    }
    Snapshot { ne_top1, lit_cells }
}

fn top_n(weights: HashMap<String, f64>, n: usize) -> Vec<(String, f64)> {
    let mut items: Vec<(String, f64)> = weights.into_iter().collect();
    items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    items.truncate(n);
    let total: f64 = items.iter().map(|(_, w)| w).sum();
    if total > 0.0 {
        items.into_iter().map(|(id, w)| (id, w / total)).collect()
    } else {
        items
    }
}

fn build_cta(snapshot: &Snapshot) -> HashMap<usize, TypeProfile> {
    snapshot
        .ne_top1
        .iter()
        .map(|(&col, entries)| {
            let mut weights: HashMap<String, f64> = HashMap::new();
            for (_, top1) in entries {
                for t in &top1.types {
                    *weights.entry(t.id.clone()).or_insert(0.0) += top1.score;
                }
            }
            (col, TypeProfile { ranked: top_n(weights, 5) })
        })
        .collect()
}

/// Builds per-pair predicate profiles (for CTA/Decision) and a single
/// subject-level profile merging weight across every pair (used to compute
/// each subject candidate's `cpa_tk` features, spec §4.6 step 4 — the
/// per-candidate feature vector has one slot set, not one per partner
/// column).
fn build_cpa(
    snapshot: &Snapshot,
    subj_col: usize,
    predicates: &HashMap<String, HashMap<String, Vec<String>>>,
    literals: &HashMap<String, HashMap<String, Vec<String>>>,
) -> (HashMap<(usize, usize), PredicateProfile>, Vec<(String, f64)>) {
    let mut pair_profiles = HashMap::new();
    let mut merged: HashMap<String, f64> = HashMap::new();

    let Some(subj_rows) = snapshot.ne_top1.get(&subj_col) else {
        return (pair_profiles, Vec::new());
    };

    for (&other_col, other_rows) in &snapshot.ne_top1 {
        if other_col == subj_col {
            continue;
        }
        let mut weights: HashMap<String, f64> = HashMap::new();
        for (id_row, subj_top1) in subj_rows {
            let Some((_, other_top1)) = other_rows.iter().find(|(r, _)| r == id_row) else { continue };
            let Some(related) = predicates.get(&subj_top1.id) else { continue };
            let Some(pred_ids) = related.get(&other_top1.id) else { continue };
            let w = subj_top1.score * other_top1.score;
            for p in pred_ids {
                *weights.entry(p.clone()).or_insert(0.0) += w;
                *merged.entry(p.clone()).or_insert(0.0) += w;
            }
        }
        pair_profiles.insert((subj_col, other_col), PredicateProfile { ranked: top_n(weights, 5) });
    }

    for (&lit_col, lit_rows) in &snapshot.lit_cells {
        let mut weights: HashMap<String, f64> = HashMap::new();
        for (id_row, subj_top1) in subj_rows {
            let Some((_, text)) = lit_rows.iter().find(|(r, _)| r == id_row) else { continue };
            let Some(by_pred) = literals.get(&subj_top1.id) else { continue };
            for (pred, values) in by_pred {
                if values.iter().any(|v| v.to_lowercase() == *text) {
                    *weights.entry(pred.clone()).or_insert(0.0) += subj_top1.score;
                    *merged.entry(pred.clone()).or_insert(0.0) += subj_top1.score;
                }
            }
        }
        pair_profiles.insert((subj_col, lit_col), PredicateProfile { ranked: top_n(weights, 5) });
    }

    (pair_profiles, top_n(merged, 5))
}

fn apply_cta(rows: &mut [Row], cta: &HashMap<usize, TypeProfile>) {
    for row in rows.iter_mut() {
        for ne in row.ne_cells_mut() {
            let Some(profile) = cta.get(&ne.column_index) else {
                for candidate in ne.candidates.iter_mut() {
                    for k in 1..=5 {
                        candidate.set_feature(&format!("cta_t{k}"), 0.0);
                    }
                }
                continue;
            };
            for candidate in ne.candidates.iter_mut() {
                let type_ids: HashSet<&str> = candidate.types.iter().map(|t| t.id.as_str()).collect();
                for (k, (type_id, freq)) in profile.ranked.iter().enumerate().take(5) {
                    let value = if type_ids.contains(type_id.as_str()) { *freq } else { 0.0 };
                    candidate.set_feature(&format!("cta_t{}", k + 1), value);
                }
                for k in (profile.ranked.len() + 1)..=5 {
                    candidate.set_feature(&format!("cta_t{k}"), 0.0);
                }
            }
        }
    }
}

fn apply_cpa_tk(rows: &mut [Row], subj_col: usize, merged: &[(String, f64)], predicates: &HashMap<String, HashMap<String, Vec<String>>>, literals: &HashMap<String, HashMap<String, Vec<String>>>) {
    for row in rows.iter_mut() {
        let other_top1: Vec<(usize, String)> = row
            .ne_cells()
            .filter(|c| c.column_index != subj_col)
            .filter_map(|c| c.candidates.first().map(|top| (c.column_index, top.id.clone())))
            .collect();
        let lit_texts: Vec<String> = row.lit_cells().map(|c| c.normalized_text.clone()).collect();

        for cell in row.cells.iter_mut() {
            let Cell::Ne(ne) = cell else { continue };
            if ne.column_index != subj_col {
                continue;
            }
            for candidate in ne.candidates.iter_mut() {
                let mut connected: HashSet<String> = HashSet::new();
                if let Some(related) = predicates.get(&candidate.id) {
                    for (_, other_id) in &other_top1 {
                        if let Some(preds) = related.get(other_id) {
                            connected.extend(preds.iter().cloned());
                        }
                    }
                }
                if let Some(by_pred) = literals.get(&candidate.id) {
                    for (pred, values) in by_pred {
                        if lit_texts.iter().any(|t| values.iter().any(|v| v.to_lowercase() == *t)) {
                            connected.insert(pred.clone());
                        }
                    }
                }
                for k in 0..5 {
                    let key = format!("cpa_t{}", k + 1);
                    let value = merged.get(k).map(|(pred, freq)| if connected.contains(pred) { *freq } else { 0.0 }).unwrap_or(0.0);
                    candidate.set_feature(&key, value);
                }
            }
        }
    }
}

/// Runs Features Revision over `rows`, mutating every NE candidate's
/// features in place with `cta_t1..5`/`cpa_t1..5`, and returns the
/// aggregated profiles for the Decision stage to elect CTA/CPA winners from.
pub async fn run(rows: &mut [Row], target: &Target, kg: &dyn KgClient) -> RevisionProfiles {
    let snapshot = build_snapshot(rows);
    let cta = build_cta(&snapshot);
    apply_cta(rows, &cta);

    let Some(subj_col) = target.subj else {
        return RevisionProfiles { cta, cpa: HashMap::new() };
    };

    let all_subj_ids: Vec<String> = rows
        .iter()
        .filter_map(|r| r.cell_at(subj_col).and_then(|c| c.as_ne()))
        .flat_map(|ne| ne.candidates.iter().map(|c| c.id.clone()))
        .collect();
    let predicates = kg.predicates(&all_subj_ids).await.unwrap_or_default();
    let literals = kg.literals(&all_subj_ids).await.unwrap_or_default();

    let (cpa, merged) = build_cpa(&snapshot, subj_col, &predicates, &literals);
    apply_cpa_tk(rows, subj_col, &merged, &predicates, &literals);

    RevisionProfiles { cta, cpa }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::model::row::{Candidate, NeCell};
    use crate::model::TypeRef;

    fn ne_cell(col: usize, is_subject: bool, candidates: Vec<Candidate>) -> Cell {
        Cell::Ne(NeCell {
            text: "x".into(),
            column_index: col,
            is_subject,
            provided_id: None,
            candidates,
            normalized_text: "x".into(),
        })
    }

    fn candidate_with_type(id: &str, score: f64, type_id: &str) -> Candidate {
        let mut c = Candidate { id: id.into(), ..Default::default() };
        c.types = vec![TypeRef { id: type_id.into(), name: "Human".into() }];
        c.score = Some(score);
        c
    }

    #[tokio::test]
    async fn cta_election_picks_majority_weighted_type() {
        let rows_data = vec![
            (0, "Q1", 0.9),
            (1, "Q2", 0.8),
            (2, "Q3", 0.7),
        ];
        let mut rows: Vec<Row> = rows_data
            .into_iter()
            .map(|(id_row, id, score)| Row {
                id_row,
                cells: vec![ne_cell(0, true, vec![candidate_with_type(id, score, "Q5")])],
            })
            .collect();

        let kg = ScriptedKgClient::default();
        let target = Target { ne: vec![0], lit: vec![], lit_datatype: HashMap::new(), subj: Some(0) };
        let profiles = run(&mut rows, &target, &kg).await;

        let cta0 = &profiles.cta[&0];
        assert_eq!(cta0.ranked[0].0, "Q5");
        assert!((cta0.ranked[0].1 - 1.0).abs() < 1e-9);
    }
}

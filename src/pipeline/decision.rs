//! Decision / Materialization (spec §4.7): elects CEA/CTA/CPA winners from
//! the ρ′-refreshed state and assembles the four persisted artifacts.
//!
//! No `original_source` file survived retrieval for this phase; modeled as
//! pure in-memory assembly — persistence itself is the caller's job
//! (`store::MongoStore`, spec §6), keeping this stage testable without a
//! document store.

use std::collections::HashMap;

use crate::model::row::{Candidate, Row};
use crate::model::table::Target;

use super::features_revision::RevisionProfiles;

/// One NE cell's winning entry in the `cea` artifact (spec §6 `cea`).
#[derive(Debug, Clone)]
pub struct CeaEntry {
    pub id_row: i64,
    pub column_index: usize,
    /// Full candidate list ordered by ρ′ descending; empty if lookup
    /// produced no candidates (spec §4.7 "CEA").
    pub winning_candidates: Vec<Candidate>,
}

#[derive(Debug, Default)]
pub struct DecisionOutput {
    /// Mirrors `winning_candidates` but keyed for the `candidateScored`
    /// artifact: every (row, column) gets an entry, scored or not.
    pub candidate_scored: Vec<CeaEntry>,
    pub cea: Vec<CeaEntry>,
    /// column -> winning type id.
    pub cta: HashMap<usize, String>,
    /// subjectCol -> (otherCol -> winning predicate id).
    pub cpa: HashMap<usize, HashMap<usize, String>>,
}

/// Elects winners and assembles the four artifacts (spec §4.7). `rows` must
/// already have `score_prime` populated by the second Prediction pass.
pub fn run(rows: &[Row], target: &Target, profiles: &RevisionProfiles) -> DecisionOutput {
    let mut candidate_scored = Vec::new();
    let mut cea = Vec::new();

    for row in rows {
        for ne in row.ne_cells() {
            let entry = CeaEntry { id_row: row.id_row, column_index: ne.column_index, winning_candidates: ne.candidates.clone() };
            candidate_scored.push(entry.clone());
            cea.push(entry);
        }
    }

    let cta = profiles
        .cta
        .iter()
        .filter_map(|(col, profile)| profile.ranked.first().map(|(type_id, _)| (*col, type_id.clone())))
        .collect();

    let mut cpa: HashMap<usize, HashMap<usize, String>> = HashMap::new();
    if let Some(subj_col) = target.subj {
        for ((src, dst), profile) in &profiles.cpa {
            if *src != subj_col {
                continue;
            }
            if let Some((pred_id, _)) = profile.ranked.first() {
                cpa.entry(*src).or_default().insert(*dst, pred_id.clone());
            }
        }
    }

    DecisionOutput { candidate_scored, cea, cta, cpa }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::row::{Cell, NeCell};
    use crate::pipeline::features_revision::{PredicateProfile, TypeProfile};

    #[test]
    fn cta_election_picks_top_ranked_type() {
        let mut profiles = RevisionProfiles::default();
        profiles.cta.insert(0, TypeProfile { ranked: vec![("Q5".to_string(), 1.0)] });
        let rows: Vec<Row> = Vec::new();
        let target = Target { ne: vec![0], lit: vec![], lit_datatype: HashMap::new(), subj: Some(0) };

        let out = run(&rows, &target, &profiles);
        assert_eq!(out.cta[&0], "Q5");
    }

    #[test]
    fn cpa_election_only_keeps_subject_rooted_pairs() {
        let mut profiles = RevisionProfiles::default();
        profiles.cpa.insert((0, 3), PredicateProfile { ranked: vec![("P569".to_string(), 1.0)] });
        profiles.cpa.insert((1, 3), PredicateProfile { ranked: vec![("P999".to_string(), 1.0)] });
        let rows: Vec<Row> = Vec::new();
        let target = Target { ne: vec![0, 1], lit: vec![3], lit_datatype: HashMap::new(), subj: Some(0) };

        let out = run(&rows, &target, &profiles);
        assert_eq!(out.cpa[&0][&3], "P569");
        assert!(!out.cpa.contains_key(&1));
    }

    #[test]
    fn empty_candidate_list_yields_empty_cea_entry() {
        let rows = vec![Row {
            id_row: 0,
            cells: vec![Cell::Ne(NeCell {
                text: "Jerusalem".into(),
                column_index: 1,
                is_subject: false,
                provided_id: None,
                candidates: vec![],
                normalized_text: "jerusalem".into(),
            })],
        }];
        let profiles = RevisionProfiles::default();
        let target = Target::default();
        let out = run(&rows, &target, &profiles);
        assert_eq!(out.cea.len(), 1);
        assert!(out.cea[0].winning_candidates.is_empty());
    }
}

//! Feature Extraction, initial pass (spec §4.4): string and KG-structure
//! features per (NE cell, candidate), computed before any score exists.
//!
//! Grounded on `original_source/api/process/phases/features.py`'s per-column
//! feature assembly, generalized to the tagged `Cell` model (spec §9).
//! Row-context features (`p_obj_ne`, `p_subj_ne`, `p_subj_lit_*`) reuse the
//! KG client's batch `objects`/`labels`/`literals` calls the same way
//! `lamAPI.py`'s callers do: one batch call per row rather than one per
//! candidate.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::kg_client::KgClient;
use crate::model::row::{Candidate, Row};
use crate::model::table::LiteralDatatype;

const MAX_TOKENS: f64 = 10.0;
const MAX_CHARS: f64 = 50.0;
const NGRAM_N: usize = 3;

/// Runs initial feature extraction over every NE cell of `rows`, in place.
pub async fn run(rows: &mut [Row], kg: &dyn KgClient) {
    for row in rows.iter_mut() {
        run_row(row, kg).await;
    }
}

async fn run_row(row: &mut Row, kg: &dyn KgClient) {
    let all_ids: Vec<String> =
        row.ne_cells().flat_map(|c| c.candidates.iter().map(|cand| cand.id.clone())).collect();
    let objects = kg.objects(&all_ids).await.unwrap_or_default();
    let object_ids: Vec<String> = objects.values().flatten().cloned().collect();
    let labels = kg.labels(&object_ids).await.unwrap_or_default();
    let literals = kg.literals(&all_ids).await.unwrap_or_default();

    let ne_texts: Vec<(usize, String)> =
        row.ne_cells().map(|c| (c.column_index, c.normalized_text.clone())).collect();
    let subject_col = row.subject_cell().map(|c| c.column_index);
    let subject_candidate_ids: Vec<String> = row
        .subject_cell()
        .map(|c| c.candidates.iter().map(|cand| cand.id.clone()).collect())
        .unwrap_or_default();
    let lit_cells: Vec<(String, LiteralDatatype)> =
        row.lit_cells().map(|c| (c.normalized_text.clone(), c.datatype)).collect();

    for cell in row.ne_cells_mut() {
        let col = cell.column_index;
        let cell_text = cell.normalized_text.clone();
        let cell_tokens = tokenize(&cell_text);
        let n = cell.candidates.len();

        let raw_pop: Vec<f64> = cell.candidates.iter().map(|c| c.feature("__raw_popularity")).collect();
        let raw_es: Vec<f64> = cell.candidates.iter().map(|c| c.feature("__raw_es_score")).collect();
        let norm_pop = min_max_normalize(&raw_pop);
        let norm_es = min_max_normalize(&raw_es);

        let ambiguity = if n <= 1 { 0.0 } else { 1.0 - 1.0 / n as f64 };
        let ntoken_mention = (cell_tokens.len() as f64 / MAX_TOKENS).min(1.0);
        let length_mention = (cell_text.chars().count() as f64 / MAX_CHARS).min(1.0);

        let other_ne: Vec<&(usize, String)> = ne_texts.iter().filter(|(c, _)| *c != col).collect();

        for (rank, candidate) in cell.candidates.iter_mut().enumerate() {
            let name_norm = candidate.name.to_lowercase();
            candidate.r#match = name_norm == cell_text;

            candidate.set_feature("ed_score", normalized_edit_similarity(&cell_text, &name_norm));

            let name_tokens = tokenize(&name_norm);
            candidate.set_feature("jaccard_score", jaccard(&token_set(&cell_tokens), &token_set(&name_tokens)));
            candidate.set_feature(
                "jaccardNgram_score",
                jaccard(&char_ngrams(&cell_text, NGRAM_N), &char_ngrams(&name_norm, NGRAM_N)),
            );

            candidate.set_feature("popularity", norm_pop[rank]);
            candidate.set_feature("pos_score", 1.0 - rank as f64 / n.max(1) as f64);
            candidate.set_feature("es_score", norm_es[rank]);

            candidate.set_feature("ambiguity_mention", ambiguity);
            candidate.set_feature("ntoken_mention", ntoken_mention);
            candidate.set_feature("length_mention", length_mention);

            candidate.set_feature("ntoken_entity", (name_tokens.len() as f64 / MAX_TOKENS).min(1.0));
            candidate.set_feature("length_entity", (name_norm.chars().count() as f64 / MAX_CHARS).min(1.0));

            let ncorrects = if cell_tokens.is_empty() {
                0.0
            } else {
                let name_set = token_set(&name_tokens);
                cell_tokens.iter().filter(|t| name_set.contains(t.as_str())).count() as f64
                    / cell_tokens.len() as f64
            };
            candidate.set_feature("ncorrects_tokens", ncorrects);

            let desc_lower = candidate.description.as_deref().unwrap_or("").to_lowercase();
            let desc = if desc_lower.is_empty() { 0.0 } else if desc_lower.contains(&cell_text) { 1.0 } else { 0.0 };
            candidate.set_feature("desc", desc);
            candidate.set_feature(
                "descNgram",
                if desc_lower.is_empty() {
                    0.0
                } else {
                    jaccard(&char_ngrams(&cell_text, NGRAM_N), &char_ngrams(&desc_lower, NGRAM_N)).min(1.0)
                },
            );

            let obj_labels: HashSet<String> = objects
                .get(&candidate.id)
                .into_iter()
                .flatten()
                .filter_map(|oid| labels.get(oid))
                .map(|l| l.to_lowercase())
                .collect();
            let p_obj_ne = if other_ne.is_empty() {
                0.0
            } else {
                other_ne.iter().filter(|(_, text)| obj_labels.contains(text)).count() as f64
                    / other_ne.len() as f64
            };
            candidate.set_feature("p_obj_ne", p_obj_ne);

            let p_subj_ne = if Some(col) == subject_col || subject_candidate_ids.is_empty() {
                0.0
            } else {
                let matched = subject_candidate_ids
                    .iter()
                    .filter(|sid| {
                        objects
                            .get(*sid)
                            .into_iter()
                            .flatten()
                            .filter_map(|oid| labels.get(oid))
                            .any(|l| l.to_lowercase() == cell_text)
                    })
                    .count();
                matched as f64 / subject_candidate_ids.len() as f64
            };
            candidate.set_feature("p_subj_ne", p_subj_ne);

            let literal_values: Vec<String> = literals
                .get(&candidate.id)
                .into_iter()
                .flat_map(|by_pred| by_pred.values())
                .flatten()
                .map(|v| v.to_lowercase())
                .collect();

            candidate.set_feature(
                "p_subj_lit_datatype",
                lit_match_fraction(&lit_cells, &literal_values, true),
            );
            candidate.set_feature(
                "p_subj_lit_all_datatype",
                lit_match_fraction(&lit_cells, &literal_values, false),
            );
            candidate.set_feature("p_subj_lit_row", lit_loose_match_fraction(&lit_cells, &literal_values));

            candidate.features.remove("__raw_popularity");
            candidate.features.remove("__raw_es_score");
        }
    }
}

fn lit_match_fraction(
    lit_cells: &[(String, LiteralDatatype)],
    literal_values: &[String],
    require_datatype: bool,
) -> f64 {
    let relevant: Vec<&(String, LiteralDatatype)> = if require_datatype {
        lit_cells.iter().filter(|(_, dt)| *dt != LiteralDatatype::String).collect()
    } else {
        lit_cells.iter().collect()
    };
    if relevant.is_empty() {
        return 0.0;
    }
    let matched = relevant
        .iter()
        .filter(|(text, dt)| {
            literal_values.iter().any(|v| v == text && (!require_datatype || literal_datatype_guess(v) == *dt))
        })
        .count();
    matched as f64 / relevant.len() as f64
}

fn lit_loose_match_fraction(lit_cells: &[(String, LiteralDatatype)], literal_values: &[String]) -> f64 {
    if lit_cells.is_empty() {
        return 0.0;
    }
    let matched = lit_cells
        .iter()
        .filter(|(text, _)| literal_values.iter().any(|v| v.contains(text.as_str()) || text.contains(v.as_str())))
        .count();
    matched as f64 / lit_cells.len() as f64
}

static DATE_LIKE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());

fn literal_datatype_guess(value: &str) -> LiteralDatatype {
    if value.parse::<f64>().is_ok() {
        LiteralDatatype::Number
    } else if DATE_LIKE.is_match(value) {
        LiteralDatatype::Datetime
    } else {
        LiteralDatatype::String
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric()).filter(|s| !s.is_empty()).map(|s| s.to_lowercase()).collect()
}

fn token_set(tokens: &[String]) -> HashSet<&str> {
    tokens.iter().map(|s| s.as_str()).collect()
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() < n {
        return [text.to_string()].into_iter().collect();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = if a[i - 1] == b[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

fn normalized_edit_similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count()).max(1);
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max > min {
        values.iter().map(|v| (v - min) / (max - min)).collect()
    } else {
        values.iter().map(|v| if *v > 0.0 { 1.0 } else { 0.0 }).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::model::row::{Cell, NeCell};

    fn candidate(id: &str, name: &str) -> Candidate {
        Candidate { id: id.into(), name: name.into(), ..Default::default() }
    }

    fn row_with_one_ne(text: &str, candidates: Vec<Candidate>) -> Row {
        Row {
            id_row: 0,
            cells: vec![Cell::Ne(NeCell {
                text: text.into(),
                column_index: 0,
                is_subject: true,
                provided_id: None,
                candidates,
                normalized_text: text.to_lowercase(),
            })],
        }
    }

    #[tokio::test]
    async fn exact_match_sets_match_true_and_high_ed_score() {
        let mut rows = vec![row_with_one_ne("Zooey Deschanel", vec![candidate("Q1", "Zooey Deschanel")])];
        let kg = ScriptedKgClient::default();
        run(&mut rows, &kg).await;

        let ne = rows[0].ne_cells().next().unwrap();
        let c = &ne.candidates[0];
        assert!(c.r#match);
        assert!((c.feature("ed_score") - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn pos_score_decreases_with_rank() {
        let mut rows =
            vec![row_with_one_ne("Tom Hanks", vec![candidate("Q1", "Tom Hanks"), candidate("Q2", "Thomas Hanks")])];
        let kg = ScriptedKgClient::default();
        run(&mut rows, &kg).await;

        let ne = rows[0].ne_cells().next().unwrap();
        assert!(ne.candidates[0].feature("pos_score") > ne.candidates[1].feature("pos_score"));
    }

    #[test]
    fn ngram_jaccard_is_symmetric_and_bounded() {
        let a = char_ngrams("los angeles", 3);
        let b = char_ngrams("los angeles", 3);
        assert_eq!(jaccard(&a, &b), 1.0);
    }
}

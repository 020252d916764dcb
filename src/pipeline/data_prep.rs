//! Data Preparation (spec §4.2): column-type inference, subject-column
//! election, row normalization.
//!
//! Grounded on `original_source/api/process/computation.py`'s
//! `DataPreparation.compute_datatype` / `rows_normalization` call sites.

use std::collections::HashMap;

use crate::kg_client::KgClient;
use crate::model::table::{ColumnTag, LiteralDatatype, TablePage, Target};

use super::error::PipelineError;
use super::normalize::{grapheme_len, normalize_cell};

/// Runs Data Preparation over `page` in place: fills `column_tags`,
/// `literal_datatypes` and `target` (spec §4.2).
pub async fn run(page: &mut TablePage, kg: &dyn KgClient) -> Result<(), PipelineError> {
    validate_arity(page)?;

    if !page.has_caller_supplied_tags() {
        classify_columns(page, kg).await;
    }

    elect_target(page)?;
    Ok(())
}

fn validate_arity(page: &crate::model::table::TablePage) -> Result<(), PipelineError> {
    if page.header.is_empty() {
        return Err(PipelineError::EmptyHeader);
    }
    let expected = page.header.len();
    for row in &page.rows {
        if row.data.len() != expected {
            return Err(PipelineError::ArityMismatch {
                id_row: row.id_row,
                expected,
                actual: row.data.len(),
            });
        }
    }
    Ok(())
}

fn column_texts(page: &crate::model::table::TablePage, col: usize) -> Vec<String> {
    page.rows.iter().map(|r| r.data[col].clone()).collect()
}

/// Step 1 + 2: call `columnAnalysis` once on all column projections, falling
/// back to `literalRecognizer` per-column where classification is missing.
async fn classify_columns(page: &mut TablePage, kg: &dyn KgClient) {
    let ncols = page.header.len();
    let columns: HashMap<usize, Vec<String>> =
        (0..ncols).map(|c| (c, column_texts(page, c))).collect();

    let analysis = kg.column_analysis(&columns).await.unwrap_or_default();
    for (col, a) in &analysis {
        if let Some(tag) = a.tag {
            page.column_tags.insert(*col, tag);
        }
        if let Some(dt) = a.datatype {
            page.literal_datatypes.insert(*col, dt);
        }
    }

    let missing: Vec<usize> = (0..ncols).filter(|c| !page.column_tags.contains_key(c)).collect();
    for col in missing {
        let cells = &columns[&col];
        let classifications = kg.literal_recognizer(cells).await.unwrap_or_default();
        match majority_datatype(&classifications) {
            Some(LiteralDatatype::Entity) => {
                page.column_tags.insert(col, ColumnTag::Ne);
            },
            Some(dt) => {
                page.column_tags.insert(col, ColumnTag::Lit);
                page.literal_datatypes.insert(col, dt);
            },
            None => {
                page.column_tags.insert(col, ColumnTag::NoTag);
            },
        }
    }
}

/// Aggregates cell-level classifications into a column-level majority
/// (spec §4.2 step 2).
fn majority_datatype(classifications: &[Option<LiteralDatatype>]) -> Option<LiteralDatatype> {
    let mut counts: HashMap<LiteralDatatype, usize> = HashMap::new();
    for c in classifications.iter().flatten() {
        *counts.entry(*c).or_default() += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(dt, _)| dt)
}

/// Steps 3: elect the subject column and assemble `target`.
fn elect_target(page: &mut TablePage) -> Result<(), PipelineError> {
    let ncols = page.header.len();
    let ne: Vec<usize> = (0..ncols)
        .filter(|c| {
            matches!(page.column_tags.get(c), Some(ColumnTag::Ne) | Some(ColumnTag::Subj))
        })
        .collect();
    let lit: Vec<usize> =
        (0..ncols).filter(|c| matches!(page.column_tags.get(c), Some(ColumnTag::Lit))).collect();
    let lit_datatype: HashMap<usize, LiteralDatatype> = lit
        .iter()
        .filter_map(|c| page.literal_datatypes.get(c).map(|dt| (*c, *dt)))
        .collect();

    let already_flagged =
        ne.iter().find(|c| page.column_tags.get(c) == Some(&ColumnTag::Subj)).copied();
    let subj = already_flagged.or_else(|| elect_subject_column(page, &ne));

    if let Some(col) = subj {
        page.column_tags.insert(col, ColumnTag::Subj);
    }

    page.target = Target { ne, lit, lit_datatype, subj };
    Ok(())
}

/// Highest mean cell length among NE columns; ties broken by lowest column
/// index (spec §4.2 step 3, §9 Open Questions).
fn elect_subject_column(page: &crate::model::table::TablePage, ne: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &col in ne {
        let texts = column_texts(page, col);
        let mean_len = if texts.is_empty() {
            0.0
        } else {
            let total: usize =
                texts.iter().map(|t| grapheme_len(normalize_cell(t).0.as_str())).sum();
            total as f64 / texts.len() as f64
        };
        match best {
            Some((_, best_len)) if mean_len <= best_len => {},
            _ => best = Some((col, mean_len)),
        }
    }
    best.map(|(col, _)| col)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::model::table::{RawRow, TablePageStatus};

    fn fixture_page() -> TablePage {
        TablePage {
            dataset_name: "ds".into(),
            table_name: "tbl".into(),
            page: 0,
            header: vec!["Actor".into(), "City".into(), "Country".into(), "DOB".into()],
            rows: vec![
                RawRow { id_row: 0, data: vec!["Zooey Deschanel".into(), "Los Angeles".into(), "United States".into(), "January 17, 1980".into()], ids: None },
                RawRow { id_row: 1, data: vec!["Tom Hanks".into(), "Concord".into(), "United States".into(), "July 9, 1956".into()], ids: None },
                RawRow { id_row: 2, data: vec!["Natalie Portman".into(), "Jerusalem".into(), "Israel".into(), "June 9, 1981".into()], ids: None },
            ],
            column_tags: HashMap::new(),
            literal_datatypes: HashMap::new(),
            target: Target::default(),
            status: TablePageStatus::Doing,
            kg_reference: "wikidata".into(),
            lookup_limit: 50,
            execution_time_secs: None,
            rss_delta_bytes: None,
            vms_delta_bytes: None,
        }
    }

    fn scripted_with_analysis() -> ScriptedKgClient {
        let mut kg = ScriptedKgClient::default();
        for col in [0usize, 1, 2] {
            kg.column_analysis.insert(
                col,
                crate::kg_client::ColumnAnalysis {
                    tag: Some(ColumnTag::Ne),
                    datatype: None,
                    classification: None,
                    probabilities: HashMap::new(),
                },
            );
        }
        kg.column_analysis.insert(
            3,
            crate::kg_client::ColumnAnalysis {
                tag: Some(ColumnTag::Lit),
                datatype: Some(LiteralDatatype::Datetime),
                classification: None,
                probabilities: HashMap::new(),
            },
        );
        kg
    }

    #[tokio::test]
    async fn scenario_1_datatype_inference() {
        let mut page = fixture_page();
        let kg = scripted_with_analysis();
        run(&mut page, &kg).await.unwrap();

        assert_eq!(page.column_tags[&0], ColumnTag::Subj);
        assert_eq!(page.column_tags[&1], ColumnTag::Ne);
        assert_eq!(page.column_tags[&2], ColumnTag::Ne);
        assert_eq!(page.column_tags[&3], ColumnTag::Lit);
        assert_eq!(page.target.subj, Some(0));
        assert_eq!(page.target.ne, vec![0, 1, 2]);
        assert_eq!(page.target.lit, vec![3]);
        assert_eq!(page.target.lit_datatype[&3], LiteralDatatype::Datetime);
    }

    #[tokio::test]
    async fn respects_caller_supplied_tags() {
        let mut page = fixture_page();
        page.column_tags.insert(0, ColumnTag::Subj);
        page.column_tags.insert(1, ColumnTag::Ne);
        page.column_tags.insert(2, ColumnTag::Ne);
        page.column_tags.insert(3, ColumnTag::Lit);
        page.literal_datatypes.insert(3, LiteralDatatype::Datetime);
        let kg = ScriptedKgClient::default();

        run(&mut page, &kg).await.unwrap();
        assert_eq!(page.target.subj, Some(0));
    }

    #[tokio::test]
    async fn rejects_arity_mismatch() {
        let mut page = fixture_page();
        page.rows[0].data.pop();
        let kg = scripted_with_analysis();
        let err = run(&mut page, &kg).await.unwrap_err();
        assert!(matches!(err, PipelineError::ArityMismatch { .. }));
    }
}

//! Lookup (spec §4.3): concurrent candidate retrieval with per-table-page
//! memoization.
//!
//! Grounded on `original_source/api/process/phases/lookup.py`
//! (`Lookup._build_row`, the `_cache` dict keyed by raw cell text, and
//! `asyncio.gather` fan-in), translated to `futures::future::join_all` over
//! one task per row and a `dashmap::DashMap` memoization cache shared across
//! the concurrent lookups (spec §9 "Coroutine control flow").

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::kg_client::{KgClient, KgClientError, LookupCandidate};
use crate::model::row::{Candidate, Cell, LitCell, NeCell, NoTagCell, Row};
use crate::model::table::{ColumnTag, RawRow, TablePage};

use super::normalize::normalize_cell;

/// A failed lookup for one cell: kept so the caller can persist a `log`
/// document (spec §7 "Transient I/O... on exhaustion treated as empty
/// result"; spec §4.3 "A cell whose lookup fails ... is left with an empty
/// candidate list").
#[derive(Debug, Clone)]
pub struct LookupFailure {
    pub id_row: i64,
    pub column_index: usize,
    pub cell_text: String,
    pub error: KgClientError,
}

pub struct LookupOutcome {
    pub rows: Vec<Row>,
    pub failures: Vec<LookupFailure>,
}

/// In-page memoization cache keyed by raw cell text (spec §4.3: "Concurrently
/// dispatch one `lookup` request per distinct cell text in the table page").
type MemoCache = DashMap<String, Arc<OnceCell<Result<Vec<LookupCandidate>, KgClientError>>>>;

pub async fn run(page: &TablePage, kg: &dyn KgClient) -> LookupOutcome {
    let cache: MemoCache = DashMap::new();
    let tasks = page.rows.iter().map(|raw| build_row(raw, page, kg, &cache));
    let results = futures::future::join_all(tasks).await;

    let mut rows = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (row, mut row_failures) in results {
        rows.push(row);
        failures.append(&mut row_failures);
    }
    LookupOutcome { rows, failures }
}

async fn build_row(
    raw: &RawRow,
    page: &TablePage,
    kg: &dyn KgClient,
    cache: &MemoCache,
) -> (Row, Vec<LookupFailure>) {
    let mut row = Row::new(raw.id_row);
    let mut failures = Vec::new();

    for (col, text) in raw.data.iter().enumerate() {
        let tag = page.column_tags.get(&col).copied();
        match tag {
            Some(ColumnTag::Ne) | Some(ColumnTag::Subj) => {
                let provided_id =
                    raw.ids.as_ref().and_then(|ids| ids.get(col)).cloned().flatten();
                let candidates = match get_candidates(text, provided_id.as_deref(), page, kg, cache).await {
                    Ok(candidates) => candidates,
                    Err(error) => {
                        failures.push(LookupFailure {
                            id_row: raw.id_row,
                            column_index: col,
                            cell_text: text.clone(),
                            error,
                        });
                        Vec::new()
                    },
                };
                let (display, normalized) = normalize_cell(text);
                row.cells.push(Cell::Ne(NeCell {
                    text: display,
                    column_index: col,
                    is_subject: tag == Some(ColumnTag::Subj),
                    provided_id,
                    candidates: candidates_into_model(candidates),
                    normalized_text: normalized,
                }));
            },
            Some(ColumnTag::Lit) => {
                let datatype = page
                    .literal_datatypes
                    .get(&col)
                    .copied()
                    .unwrap_or(crate::model::table::LiteralDatatype::String);
                let (display, normalized) = normalize_cell(text);
                row.cells.push(Cell::Lit(LitCell {
                    text: display,
                    column_index: col,
                    datatype,
                    normalized_text: normalized,
                }));
            },
            _ => {
                let (display, _) = normalize_cell(text);
                row.cells.push(Cell::NoTag(NoTagCell { text: display, column_index: col }));
            },
        }
    }

    (row, failures)
}

/// Dispatches (or reuses, via `cache`) one `lookup` request for `text`.
async fn get_candidates(
    text: &str,
    provided_id: Option<&str>,
    page: &TablePage,
    kg: &dyn KgClient,
    cache: &MemoCache,
) -> Result<Vec<LookupCandidate>, KgClientError> {
    let cell = cache.entry(text.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone();
    cell.get_or_init(|| async {
        kg.lookup(text, provided_id, &page.kg_reference, page.lookup_limit).await
    })
    .await
    .clone()
}

fn candidates_into_model(raw: Vec<LookupCandidate>) -> Vec<Candidate> {
    raw.into_iter()
        .map(|c| Candidate {
            id: c.id,
            name: c.name,
            types: c.types,
            description: c.description,
            r#match: false,
            features: {
                let mut f = std::collections::HashMap::new();
                if let Some(p) = c.popularity {
                    f.insert("__raw_popularity".to_string(), p);
                }
                if let Some(e) = c.es_score {
                    f.insert("__raw_es_score".to_string(), e);
                }
                f
            },
            score: None,
            score_prime: None,
            delta: 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::model::table::{LiteralDatatype, Target};
    use std::collections::HashMap;

    fn page_with(rows: Vec<RawRow>) -> TablePage {
        let mut column_tags = HashMap::new();
        column_tags.insert(0, ColumnTag::Subj);
        column_tags.insert(1, ColumnTag::Ne);
        TablePage {
            dataset_name: "ds".into(),
            table_name: "tbl".into(),
            page: 0,
            header: vec!["Actor".into(), "City".into()],
            rows,
            column_tags,
            literal_datatypes: HashMap::new(),
            target: Target { ne: vec![0, 1], lit: vec![], lit_datatype: HashMap::new(), subj: Some(0) },
            status: crate::model::table::TablePageStatus::Doing,
            kg_reference: "wikidata".into(),
            lookup_limit: 50,
            execution_time_secs: None,
            rss_delta_bytes: None,
            vms_delta_bytes: None,
        }
    }

    #[tokio::test]
    async fn memoizes_repeated_cell_text() {
        let rows = vec![
            RawRow { id_row: 0, data: vec!["Zooey Deschanel".into(), "Los Angeles".into()], ids: None },
            RawRow { id_row: 1, data: vec!["Someone Else".into(), "Los Angeles".into()], ids: None },
        ];
        let page = page_with(rows);
        let mut kg = ScriptedKgClient::default();
        kg.lookups.insert(
            "Los Angeles".into(),
            vec![LookupCandidate { id: "Q65".into(), name: "Los Angeles".into(), types: vec![], description: None, popularity: None, es_score: None }],
        );
        kg.lookups.insert("Zooey Deschanel".into(), vec![]);
        kg.lookups.insert("Someone Else".into(), vec![]);

        let outcome = run(&page, &kg).await;
        assert_eq!(outcome.rows.len(), 2);
        let calls = kg.lookup_calls.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| *c == "Los Angeles").count(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_leaves_empty_candidates_without_failing_other_rows() {
        let rows = vec![
            RawRow { id_row: 0, data: vec!["Zooey Deschanel".into(), "Los Angeles".into()], ids: None },
            RawRow { id_row: 1, data: vec!["Natalie Portman".into(), "Jerusalem".into()], ids: None },
        ];
        let page = page_with(rows);
        let mut kg = ScriptedKgClient::default();
        kg.failing_lookups.push("Jerusalem".into());
        kg.lookups.insert("Los Angeles".into(), vec![]);
        kg.lookups.insert("Zooey Deschanel".into(), vec![]);
        kg.lookups.insert("Natalie Portman".into(), vec![]);

        let outcome = run(&page, &kg).await;
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].column_index, 1);
        let row1 = outcome.rows.iter().find(|r| r.id_row == 1).unwrap();
        let city_cell = row1.cell_at(1).unwrap().as_ne().unwrap();
        assert!(city_cell.candidates.is_empty());
    }

    #[test]
    fn datatype_literal_default() {
        assert_eq!(LiteralDatatype::String, LiteralDatatype::String);
    }
}

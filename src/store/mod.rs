//! Document store facade (spec §6): collections `dataset`, `table`, `row`,
//! `candidateScored`, `cea`, `ceaPrelinking`, `cta`, `cpa`, `log`.
//!
//! Grounded on `kg_client::client`'s split between a `trait` boundary (so the
//! pipeline stages never depend on a concrete driver) and an HTTP/Mongo
//! implementation behind it.

pub mod error;
pub mod mongo;
pub mod signal;

pub use error::StoreError;
pub use mongo::MongoStore;
pub use signal::{JobSignal, RedisJobSignal};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::row::Candidate;
use crate::model::table::TablePage;
use crate::pipeline::PipelineOutcome;

/// One (row, column) entry in `candidateScored` or `cea` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCellDoc {
    pub dataset_name: String,
    pub table_name: String,
    pub page: i64,
    pub id_row: i64,
    pub column_index: usize,
    pub candidates: Vec<Candidate>,
}

/// The single `cta` document for a page: column -> winning type id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CtaDoc {
    pub dataset_name: String,
    pub table_name: String,
    pub page: i64,
    pub cta: std::collections::HashMap<usize, String>,
}

/// The single `cpa` document for a page: subjectCol -> otherCol -> predicate id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpaDoc {
    pub dataset_name: String,
    pub table_name: String,
    pub page: i64,
    pub cpa: std::collections::HashMap<usize, std::collections::HashMap<usize, String>>,
}

/// One diagnostic entry in the `log` collection (spec §6, §11 error
/// classification).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogDoc {
    pub dataset_name: String,
    pub table_name: String,
    pub error: String,
    pub stack_trace: Option<String>,
    /// `KgClientError::error_type()`-style bucket, when the failure came
    /// from the KG client (§11).
    pub error_type: Option<String>,
}

/// Boundary the pipeline's caller (the worker loop) uses to claim pages and
/// persist artifacts; kept trait-object-safe so tests can substitute an
/// in-memory fake with no network access (spec §10.4).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Atomically claims one `TODO` page, flipping it to `DOING` (spec §5
    /// "Page claim"). `None` means no work is currently available.
    async fn claim_next_page(&self) -> Result<Option<TablePage>, StoreError>;

    /// Persists the four Decision artifacts plus the supplemented
    /// `ceaPrelinking` one, grouped so a partially written page never shows
    /// `DONE` without all four required artifacts (spec §4.7), then marks
    /// the page `DONE` with resource-accounting fields (spec §11).
    async fn persist_success(
        &self,
        page: &TablePage,
        outcome: &PipelineOutcome,
        execution_time_secs: f64,
        rss_delta_bytes: i64,
        vms_delta_bytes: i64,
    ) -> Result<(), StoreError>;

    /// Marks a page `ERROR` and writes a `log` entry (spec §7 taxonomy item 3).
    async fn mark_error(&self, page: &TablePage, error: &str, error_type: Option<&str>) -> Result<(), StoreError>;
}

//! `Table` and `TablePage` — spec §3.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Unique by `(dataset_name, table_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub dataset_name: String,
    pub table_name: String,
    pub kg_reference: String,
    pub header: Vec<String>,
    pub n_rows: i64,
    /// Opaque linkage into whatever job-tracking system the ingress
    /// component uses; not interpreted here (out of scope, §12).
    pub id_job: Option<String>,
}

/// Per-column tag assigned during Data Preparation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnTag {
    Ne,
    Lit,
    Subj,
    #[serde(rename = "NOTAG")]
    NoTag,
}

/// Per-column literal datatype classification (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiteralDatatype {
    String,
    Number,
    Datetime,
    Geo,
    Entity,
}

/// Which columns are NE, which are LIT (with datatype), and which is SUBJ.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Target {
    #[serde(rename = "NE")]
    pub ne: Vec<usize>,
    #[serde(rename = "LIT")]
    pub lit: Vec<usize>,
    #[serde(rename = "LIT_DATATYPE")]
    pub lit_datatype: HashMap<usize, LiteralDatatype>,
    #[serde(rename = "SUBJ")]
    pub subj: Option<usize>,
}

/// Lifecycle status of a `TablePage` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TablePageStatus {
    Todo,
    Doing,
    Done,
    Error,
}

/// One unit of work: a contiguous row slice of one table (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    pub dataset_name: String,
    pub table_name: String,
    pub page: i64,
    pub header: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Column index -> tag, as supplied by the caller or produced by
    /// Data Preparation. Absent entries are treated as `NOTAG`.
    pub column_tags: HashMap<usize, ColumnTag>,
    pub literal_datatypes: HashMap<usize, LiteralDatatype>,
    pub target: Target,
    pub status: TablePageStatus,
    pub kg_reference: String,
    pub lookup_limit: usize,
    pub execution_time_secs: Option<f64>,
    pub rss_delta_bytes: Option<i64>,
    pub vms_delta_bytes: Option<i64>,
}

impl TablePage {
    /// True when the caller already supplied column tags (spec §4.2 step 1).
    pub fn has_caller_supplied_tags(&self) -> bool {
        !self.column_tags.is_empty()
    }
}

/// Raw row data as read from the document store, before cell classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRow {
    pub id_row: i64,
    pub data: Vec<String>,
    /// Per-column pre-known KG entity IDs, used as hints to the lookup
    /// service (spec §3).
    #[serde(default)]
    pub ids: Option<Vec<Option<String>>>,
}

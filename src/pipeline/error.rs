//! Internal invariant violations (spec §7.3): these mark a page `ERROR` and
//! are logged, but never raised by stages downstream of Lookup over
//! per-cell data (those tolerate empty candidates/features instead, per
//! spec §7 "Propagation policy").

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("table page has an empty header")]
    EmptyHeader,

    #[error("row {id_row} has {actual} cells, expected {expected} (arity mismatch)")]
    ArityMismatch { id_row: i64, expected: usize, actual: usize },

    #[error("unknown literal datatype for column {column_index}: {raw}")]
    UnknownDatatype { column_index: usize, raw: String },

    #[error("no subject column could be elected: table page has no NE columns")]
    NoSubjectColumn,
}

//! Data model for table pages, rows, cells and KG candidates.
//!
//! See spec §3. `Table`/`TablePage` carry lifecycle and tagging metadata;
//! `Row`/`Cell` carry the per-row data; `Candidate` carries per-(cell,
//! candidate) scoring state threaded through the pipeline.

pub mod row;
pub mod table;

pub use row::{Candidate, Cell, Row, TypeRef};
pub use table::{ColumnTag, LiteralDatatype, Table, TablePage, TablePageStatus, Target};

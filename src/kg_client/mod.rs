//! KG client facade (spec §4.1): concurrent HTTP, retries, semaphore.

pub mod client;
pub mod error;
pub mod models;

#[cfg(test)]
pub mod mock;

pub use client::{HttpKgClient, KgClient};
pub use error::KgClientError;
pub use models::{ColumnAnalysis, LookupCandidate};

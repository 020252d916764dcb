//! Document store errors — grounded on `kg_client::error::KgClientError`'s
//! shape (a flat `thiserror::Error` enum at the I/O boundary).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store connection failed: {0}")]
    Connection(#[from] mongodb::error::Error),

    #[error("document store returned malformed data: {0}")]
    Serialization(#[from] bson::ser::Error),

    #[error("document store returned malformed data: {0}")]
    Deserialization(#[from] bson::de::Error),

    #[error("job signal store error: {0}")]
    Signal(#[from] redis::RedisError),
}

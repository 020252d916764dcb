//! KG client errors — grounded on `services/llm/models.rs`'s `LLMError`.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum KgClientError {
    #[error("KG service timed out after {0}s")]
    Timeout(u64),

    #[error("KG service transport error: {0}")]
    Transport(String),

    #[error("KG service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("KG service returned a non-JSON response ({error_type})")]
    NonJson { error_type: String },

    #[error("KG service call failed after exhausting retries: {0}")]
    RetriesExhausted(Box<KgClientError>),
}

impl KgClientError {
    /// Transient I/O (spec §7.1): worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_) | Self::Http { .. })
    }

    /// Classification persisted into the `log` collection's `error_type`
    /// field (§11, grounded on `lamAPI.py`'s `error_type` bucketing).
    pub fn error_type(&self) -> String {
        match self {
            Self::Timeout(_) => "timeout".to_string(),
            Self::Transport(_) => "generic".to_string(),
            Self::Http { status: 502, .. } => "Bad Gateway".to_string(),
            Self::Http { status, .. } => format!("http_{status}"),
            Self::NonJson { error_type } => error_type.clone(),
            Self::RetriesExhausted(inner) => inner.error_type(),
        }
    }
}

//! KG client facade — spec §4.1.
//!
//! Grounded on `services/llm/client.rs` (reqwest reuse, status-code
//! branching, timeout handling) generalized to the lookup/labels/types/
//! predicates/objects/literals/column-analysis/literal-recognizer surface of
//! `original_source/api/process/wrapper/lamAPI.py`, with that module's
//! per-call semaphore and `asyncio.Semaphore`-bounded POSTs translated to a
//! `tokio::sync::Semaphore` (spec §9 "Coroutine control flow").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::Semaphore;

use super::error::KgClientError;
use super::models::{unwrap_kg_envelope, ColumnAnalysis, LookupCandidate};
use crate::model::table::LiteralDatatype;
use crate::model::TypeRef;

/// Retry policy (spec §4.1): up to 3 attempts, initial delay 3s, cap 10s.
const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// The KG client facade's operations (spec §4.1). Each call is idempotent;
/// implementations are responsible for retry/backoff and the concurrency
/// bound internally — callers always get `Ok` with possibly-empty data, or
/// `Err` only after retries are exhausted, so upstream stages can log and
/// substitute an empty result per spec §7.
#[async_trait]
pub trait KgClient: Send + Sync {
    async fn lookup(
        &self,
        text: &str,
        provided_id: Option<&str>,
        kg: &str,
        limit: usize,
    ) -> Result<Vec<LookupCandidate>, KgClientError>;

    async fn labels(&self, ids: &[String]) -> Result<HashMap<String, String>, KgClientError>;

    async fn types(&self, ids: &[String]) -> Result<HashMap<String, Vec<TypeRef>>, KgClientError>;

    async fn predicates(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError>;

    async fn objects(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, KgClientError>;

    async fn literals(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError>;

    async fn column_analysis(
        &self,
        columns: &HashMap<usize, Vec<String>>,
    ) -> Result<HashMap<usize, ColumnAnalysis>, KgClientError>;

    async fn literal_recognizer(
        &self,
        cells: &[String],
    ) -> Result<Vec<Option<LiteralDatatype>>, KgClientError>;
}

/// HTTP-backed `KgClient` implementation.
pub struct HttpKgClient {
    http: Client,
    base_url: String,
    token: String,
    semaphore: Arc<Semaphore>,
}

impl HttpKgClient {
    /// `max_concurrent_requests` bounds in-flight requests (spec §4.1,
    /// default 50; some deployments use 4).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, max_concurrent_requests: usize, request_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("failed to build KG client HTTP client");
        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    /// POST `body` to `path`, retried with exponential backoff (spec §4.1).
    /// Permanent failures and non-JSON replies return `Err`; callers decide
    /// whether to substitute an empty result.
    async fn post_with_retry(
        &self,
        path: &str,
        params: &[(&str, String)],
        body: serde_json::Value,
    ) -> Result<serde_json::Value, KgClientError> {
        let _permit = self.semaphore.acquire().await.expect("semaphore closed");
        let url = self.url(path);

        let mut attempt = 0u32;
        let mut backoff = INITIAL_BACKOFF;
        let mut last_err = None;

        while attempt < MAX_ATTEMPTS {
            attempt += 1;
            match self.try_post(&url, params, &body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %err,
                        "KG client request failed, retrying after {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    last_err = Some(err);
                },
                Err(err) => {
                    tracing::error!(url = %url, attempt, error = %err, "KG client request failed permanently");
                    return Err(KgClientError::RetriesExhausted(Box::new(err)));
                },
            }
        }

        Err(KgClientError::RetriesExhausted(Box::new(
            last_err.unwrap_or(KgClientError::Transport("unknown".to_string())),
        )))
    }

    async fn try_post(
        &self,
        url: &str,
        params: &[(&str, String)],
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, KgClientError> {
        let response = self
            .http
            .post(url)
            .header("accept", "application/json")
            .query(params)
            .json(&json!({ "json": body }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    KgClientError::Timeout(0)
                } else {
                    KgClientError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !content_type.contains("application/json") {
            let error_type = if status.as_u16() == 502 { "Bad Gateway" } else { "generic" };
            return Err(KgClientError::NonJson { error_type: error_type.to_string() });
        }

        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(KgClientError::Http { status: status.as_u16(), body: body_text });
        }

        let value: serde_json::Value =
            response.json().await.map_err(|e| KgClientError::Transport(e.to_string()))?;
        Ok(unwrap_kg_envelope(value))
    }

    fn auth_params(&self, kg: Option<&str>) -> Vec<(&'static str, String)> {
        let mut params = vec![("token", self.token.clone())];
        if let Some(kg) = kg {
            params.push(("kg", kg.to_string()));
        }
        params
    }
}

/// Decodes a successful, valid-JSON response body into `T`, logging and
/// falling back to `T::default()` on a schema mismatch (spec §7 taxonomy
/// item 2: malformed upstream data is "treated as empty result; logged").
fn decode_or_log<T: serde::de::DeserializeOwned + Default>(value: serde_json::Value, endpoint: &str) -> T {
    match serde_json::from_value(value) {
        Ok(decoded) => decoded,
        Err(error) => {
            tracing::warn!(endpoint, error = %error, "malformed KG response, treating as empty");
            T::default()
        },
    }
}

#[async_trait]
impl KgClient for HttpKgClient {
    async fn lookup(
        &self,
        text: &str,
        provided_id: Option<&str>,
        kg: &str,
        limit: usize,
    ) -> Result<Vec<LookupCandidate>, KgClientError> {
        let mut params = self.auth_params(Some(kg));
        params.push(("name", text.to_string()));
        params.push(("limit", limit.to_string()));
        if let Some(id) = provided_id {
            params.push(("ids", id.to_string()));
        }
        let value = self.post_with_retry("lookup", &params, json!({})).await?;
        Ok(decode_or_log(value, "lookup"))
    }

    async fn labels(&self, ids: &[String]) -> Result<HashMap<String, String>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("entities/labels", &params, json!(ids)).await?;
        Ok(decode_or_log(value, "entities/labels"))
    }

    async fn types(&self, ids: &[String]) -> Result<HashMap<String, Vec<TypeRef>>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("entities/types", &params, json!(ids)).await?;
        Ok(decode_or_log(value, "entities/types"))
    }

    async fn predicates(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("entities/predicates", &params, json!(ids)).await?;
        Ok(decode_or_log(value, "entities/predicates"))
    }

    async fn objects(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("entities/objects", &params, json!(ids)).await?;
        Ok(decode_or_log(value, "entities/objects"))
    }

    async fn literals(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("entities/literals", &params, json!(ids)).await?;
        Ok(decode_or_log(value, "entities/literals"))
    }

    async fn column_analysis(
        &self,
        columns: &HashMap<usize, Vec<String>>,
    ) -> Result<HashMap<usize, ColumnAnalysis>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("column/analysis", &params, json!(columns)).await?;
        Ok(decode_or_log(value, "column/analysis"))
    }

    async fn literal_recognizer(
        &self,
        cells: &[String],
    ) -> Result<Vec<Option<LiteralDatatype>>, KgClientError> {
        let params = self.auth_params(None);
        let value = self.post_with_retry("literal/recognizer", &params, json!(cells)).await?;
        Ok(decode_or_log(value, "literal/recognizer"))
    }
}

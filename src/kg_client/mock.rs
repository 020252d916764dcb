//! Scripted in-memory `KgClient` for deterministic pipeline tests.
//!
//! Grounded on `services/llm/tests.rs`'s pattern of injecting a test double
//! via an alternate constructor rather than hitting the network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::client::KgClient;
use super::error::KgClientError;
use super::models::{ColumnAnalysis, LookupCandidate};
use crate::model::table::LiteralDatatype;
use crate::model::TypeRef;

#[derive(Default)]
pub struct ScriptedKgClient {
    pub lookups: HashMap<String, Vec<LookupCandidate>>,
    /// Cell texts for which `lookup` should fail permanently.
    pub failing_lookups: Vec<String>,
    pub labels: HashMap<String, String>,
    pub types: HashMap<String, Vec<TypeRef>>,
    pub predicates: HashMap<String, HashMap<String, Vec<String>>>,
    pub objects: HashMap<String, Vec<String>>,
    pub literals: HashMap<String, HashMap<String, Vec<String>>>,
    pub column_analysis: HashMap<usize, ColumnAnalysis>,
    /// Records every lookup call made, for assertions about memoization.
    pub lookup_calls: Mutex<Vec<String>>,
}

#[async_trait]
impl KgClient for ScriptedKgClient {
    async fn lookup(
        &self,
        text: &str,
        _provided_id: Option<&str>,
        _kg: &str,
        limit: usize,
    ) -> Result<Vec<LookupCandidate>, KgClientError> {
        self.lookup_calls.lock().unwrap().push(text.to_string());
        if self.failing_lookups.contains(&text.to_string()) {
            return Err(KgClientError::RetriesExhausted(Box::new(KgClientError::Transport(
                "scripted failure".to_string(),
            ))));
        }
        let mut candidates = self.lookups.get(text).cloned().unwrap_or_default();
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn labels(&self, ids: &[String]) -> Result<HashMap<String, String>, KgClientError> {
        Ok(ids.iter().filter_map(|id| self.labels.get(id).map(|l| (id.clone(), l.clone()))).collect())
    }

    async fn types(&self, ids: &[String]) -> Result<HashMap<String, Vec<TypeRef>>, KgClientError> {
        Ok(ids.iter().filter_map(|id| self.types.get(id).map(|t| (id.clone(), t.clone()))).collect())
    }

    async fn predicates(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.predicates.get(id).map(|p| (id.clone(), p.clone())))
            .collect())
    }

    async fn objects(&self, ids: &[String]) -> Result<HashMap<String, Vec<String>>, KgClientError> {
        Ok(ids.iter().filter_map(|id| self.objects.get(id).map(|o| (id.clone(), o.clone()))).collect())
    }

    async fn literals(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, HashMap<String, Vec<String>>>, KgClientError> {
        Ok(ids.iter().filter_map(|id| self.literals.get(id).map(|l| (id.clone(), l.clone()))).collect())
    }

    async fn column_analysis(
        &self,
        columns: &HashMap<usize, Vec<String>>,
    ) -> Result<HashMap<usize, ColumnAnalysis>, KgClientError> {
        Ok(columns
            .keys()
            .filter_map(|col| self.column_analysis.get(col).map(|a| (*col, a.clone())))
            .collect())
    }

    async fn literal_recognizer(
        &self,
        cells: &[String],
    ) -> Result<Vec<Option<LiteralDatatype>>, KgClientError> {
        Ok(cells.iter().map(|_| None).collect())
    }
}

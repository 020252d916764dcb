//! DTOs exchanged with the KG lookup/features service (spec §4.1, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::table::{ColumnTag, LiteralDatatype};
use crate::model::TypeRef;

/// One candidate as returned by the `lookup` endpoint, in the KG service's
/// own ordering (preserved verbatim per spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupCandidate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub types: Vec<TypeRef>,
    #[serde(default)]
    pub description: Option<String>,
    /// Raw popularity signal, normalized per-cell in `features_initial`.
    #[serde(default)]
    pub popularity: Option<f64>,
    /// Raw KG-service relevance score, normalized per-cell in
    /// `features_initial` (`es_score`).
    #[serde(default)]
    pub es_score: Option<f64>,
}

/// Result of `column_analysis` for one column (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ColumnAnalysis {
    pub tag: Option<ColumnTag>,
    pub datatype: Option<LiteralDatatype>,
    pub classification: Option<String>,
    #[serde(default)]
    pub probabilities: HashMap<String, f64>,
}

/// Wire envelope the KG service nests its payload under, keyed by KG name
/// (spec §6: "Responses may nest under KG-name keys"). `unwrap_kg_envelope`
/// pulls the first matching key out, mirroring `lamAPI.py`'s loop over
/// `["wikidata", "dbpedia", "crunchbase"]`.
pub const KG_ENVELOPE_KEYS: &[&str] = &["wikidata", "dbpedia", "crunchbase"];

pub fn unwrap_kg_envelope(mut value: serde_json::Value) -> serde_json::Value {
    if let Some(obj) = value.as_object_mut() {
        for key in KG_ENVELOPE_KEYS {
            if let Some(inner) = obj.remove(*key) {
                return inner;
            }
        }
    }
    value
}

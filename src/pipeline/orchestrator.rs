//! Wires the seven stages into the linear chain spec §2 describes:
//! `DataPrep -> Lookup -> FeaturesInitial -> PredictInitial(rho)
//! -> FeaturesRevision -> PredictFinal(rho') -> Decision`.

use crate::kg_client::KgClient;
use crate::model::row::Row;
use crate::model::table::TablePage;

use super::decision::{self, CeaEntry, DecisionOutput};
use super::error::PipelineError;
use super::lookup::LookupFailure;
use super::prediction::ScoringModel;
use super::{data_prep, features_initial, features_revision, lookup, prediction};

pub struct PipelineOutcome {
    pub rows: Vec<Row>,
    pub decision: DecisionOutput,
    /// The rho-scored CEA projection taken before Features Revision runs
    /// (supplemented `ceaPrelinking` artifact).
    pub cea_prelinking: Vec<CeaEntry>,
    pub lookup_failures: Vec<LookupFailure>,
}

/// Runs the full pipeline over one table page. `page.column_tags`/`target`
/// are filled in place by Data Preparation; the returned rows and artifacts
/// are the caller's (worker's) responsibility to persist.
pub async fn process_page(
    page: &mut TablePage,
    kg: &dyn KgClient,
    model_initial: &ScoringModel,
    model_revision: &ScoringModel,
) -> Result<PipelineOutcome, PipelineError> {
    data_prep::run(page, kg).await?;

    let outcome = lookup::run(page, kg).await;
    let mut rows = outcome.rows;
    let lookup_failures = outcome.failures;

    features_initial::run(&mut rows, kg).await;
    prediction::run(&mut rows, model_initial, false);

    let cea_prelinking: Vec<CeaEntry> = rows
        .iter()
        .flat_map(|row| {
            row.ne_cells().map(move |ne| CeaEntry {
                id_row: row.id_row,
                column_index: ne.column_index,
                winning_candidates: ne.candidates.clone(),
            })
        })
        .collect();

    let profiles = features_revision::run(&mut rows, &page.target, kg).await;
    prediction::run(&mut rows, model_revision, true);

    let decision = decision::run(&rows, &page.target, &profiles);

    Ok(PipelineOutcome { rows, decision, cea_prelinking, lookup_failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::kg_client::{ColumnAnalysis, LookupCandidate};
    use crate::model::table::{ColumnTag, LiteralDatatype, RawRow, TablePageStatus};
    use crate::pipeline::prediction::{ModelWeights, INITIAL_FEATURE_ORDER};
    use std::collections::HashMap;

    fn constant_model(feature_order: Vec<String>, output: f64) -> ScoringModel {
        // A degenerate single-neuron MLP whose sigmoid output is pinned to
        // `output` regardless of input, via a huge bias and zero weights.
        let bias = (output / (1.0 - output)).ln();
        ScoringModel::from_weights(
            ModelWeights { w1: vec![vec![0.0; feature_order.len()]], b1: vec![0.0], w2: vec![1.0], b2: bias },
            feature_order,
        )
    }

    fn fixture_page() -> TablePage {
        TablePage {
            dataset_name: "ds".into(),
            table_name: "tbl".into(),
            page: 0,
            header: vec!["Actor".into(), "City".into()],
            rows: vec![RawRow { id_row: 0, data: vec!["Zooey Deschanel".into(), "Los Angeles".into()], ids: None }],
            column_tags: HashMap::new(),
            literal_datatypes: HashMap::new(),
            target: Default::default(),
            status: TablePageStatus::Doing,
            kg_reference: "wikidata".into(),
            lookup_limit: 50,
            execution_time_secs: None,
            rss_delta_bytes: None,
            vms_delta_bytes: None,
        }
    }

    fn scripted_kg() -> ScriptedKgClient {
        let mut kg = ScriptedKgClient::default();
        kg.column_analysis.insert(
            0,
            ColumnAnalysis { tag: Some(ColumnTag::Ne), datatype: None, classification: None, probabilities: HashMap::new() },
        );
        kg.column_analysis.insert(
            1,
            ColumnAnalysis { tag: Some(ColumnTag::Ne), datatype: None, classification: None, probabilities: HashMap::new() },
        );
        kg.lookups.insert(
            "Zooey Deschanel".into(),
            vec![LookupCandidate { id: "Q1".into(), name: "Zooey Deschanel".into(), types: vec![], description: None, popularity: Some(1.0), es_score: Some(1.0) }],
        );
        kg.lookups.insert(
            "Los Angeles".into(),
            vec![LookupCandidate { id: "Q65".into(), name: "Los Angeles".into(), types: vec![], description: None, popularity: Some(1.0), es_score: Some(1.0) }],
        );
        kg
    }

    #[tokio::test]
    async fn full_pipeline_produces_consistent_cea_cta_cpa() {
        let mut page = fixture_page();
        let kg = scripted_kg();
        let initial = constant_model(INITIAL_FEATURE_ORDER.iter().map(|s| s.to_string()).collect(), 0.5);
        let revision = constant_model(prediction::revision_feature_order(), 0.5);

        let outcome = process_page(&mut page, &kg, &initial, &revision).await.unwrap();
        assert_eq!(outcome.decision.cea.len(), 2);
        assert_eq!(outcome.cea_prelinking.len(), 2);
        assert!(outcome.lookup_failures.is_empty());
    }
}

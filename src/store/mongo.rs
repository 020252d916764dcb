//! Mongo-backed `DocumentStore` (spec §6).
//!
//! Collection layout mirrors the logical schemas verbatim: `dataset`,
//! `table`, `row` (holds the `TablePage` document), `candidateScored`,
//! `cea`, `ceaPrelinking` (§11 supplement), `cta`, `cpa`, `log`.

use async_trait::async_trait;
use bson::doc;
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::config::MongoConfig;
use crate::model::table::TablePage;
use crate::pipeline::PipelineOutcome;

use super::error::StoreError;
use super::{CpaDoc, CtaDoc, DocumentStore, LogDoc, ScoredCellDoc};

pub struct MongoStore {
    database: Database,
    row: Collection<TablePage>,
    candidate_scored: Collection<ScoredCellDoc>,
    cea: Collection<ScoredCellDoc>,
    cea_prelinking: Collection<ScoredCellDoc>,
    cta: Collection<CtaDoc>,
    cpa: Collection<CpaDoc>,
    log: Collection<LogDoc>,
}

impl MongoStore {
    pub async fn connect(config: &MongoConfig) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(&config.uri).await?;
        let database = client.database(&config.database);
        let store = Self {
            row: database.collection("row"),
            candidate_scored: database.collection("candidateScored"),
            cea: database.collection("cea"),
            cea_prelinking: database.collection("ceaPrelinking"),
            cta: database.collection("cta"),
            cpa: database.collection("cpa"),
            log: database.collection("log"),
            database,
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Unique and query indexes per spec §6: `dataset.datasetName`,
    /// `table.(datasetName,tableName)` are unique; every artifact collection
    /// gets a query index on `(datasetName, tableName [, page])`.
    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let dataset: Collection<bson::Document> = self.database.collection("dataset");
        dataset
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "datasetName": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        let table: Collection<bson::Document> = self.database.collection("table");
        table
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "datasetName": 1, "tableName": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        self.row
            .create_index(IndexModel::builder().keys(doc! { "datasetName": 1, "tableName": 1, "page": 1 }).build())
            .await?;
        for collection in [&self.candidate_scored, &self.cea, &self.cea_prelinking] {
            collection
                .create_index(IndexModel::builder().keys(doc! { "datasetName": 1, "tableName": 1, "page": 1 }).build())
                .await?;
        }
        self.cta
            .create_index(IndexModel::builder().keys(doc! { "datasetName": 1, "tableName": 1, "page": 1 }).build())
            .await?;
        self.cpa
            .create_index(IndexModel::builder().keys(doc! { "datasetName": 1, "tableName": 1, "page": 1 }).build())
            .await?;
        self.log
            .create_index(IndexModel::builder().keys(doc! { "datasetName": 1, "tableName": 1 }).build())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn claim_next_page(&self) -> Result<Option<TablePage>, StoreError> {
        let filter = doc! { "status": "TODO" };
        let update = doc! { "$set": { "status": "DOING" } };
        let options = FindOneAndUpdateOptions::builder().return_document(ReturnDocument::After).build();
        let page = self.row.find_one_and_update(filter, update).with_options(options).await?;
        Ok(page)
    }

    async fn persist_success(
        &self,
        page: &TablePage,
        outcome: &PipelineOutcome,
        execution_time_secs: f64,
        rss_delta_bytes: i64,
        vms_delta_bytes: i64,
    ) -> Result<(), StoreError> {
        let candidate_scored_docs: Vec<ScoredCellDoc> = outcome
            .decision
            .candidate_scored
            .iter()
            .map(|entry| ScoredCellDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                page: page.page,
                id_row: entry.id_row,
                column_index: entry.column_index,
                candidates: entry.winning_candidates.clone(),
            })
            .collect();
        if !candidate_scored_docs.is_empty() {
            self.candidate_scored.insert_many(&candidate_scored_docs).await?;
        }

        let cea_docs: Vec<ScoredCellDoc> = outcome
            .decision
            .cea
            .iter()
            .map(|entry| ScoredCellDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                page: page.page,
                id_row: entry.id_row,
                column_index: entry.column_index,
                candidates: entry.winning_candidates.clone(),
            })
            .collect();
        if !cea_docs.is_empty() {
            self.cea.insert_many(&cea_docs).await?;
        }

        let cea_prelinking_docs: Vec<ScoredCellDoc> = outcome
            .cea_prelinking
            .iter()
            .map(|entry| ScoredCellDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                page: page.page,
                id_row: entry.id_row,
                column_index: entry.column_index,
                candidates: entry.winning_candidates.clone(),
            })
            .collect();
        if !cea_prelinking_docs.is_empty() {
            self.cea_prelinking.insert_many(&cea_prelinking_docs).await?;
        }

        self.cta
            .insert_one(CtaDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                page: page.page,
                cta: outcome.decision.cta.clone(),
            })
            .await?;

        self.cpa
            .insert_one(CpaDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                page: page.page,
                cpa: outcome.decision.cpa.clone(),
            })
            .await?;

        for failure in &outcome.lookup_failures {
            self.log
                .insert_one(LogDoc {
                    dataset_name: page.dataset_name.clone(),
                    table_name: page.table_name.clone(),
                    error: failure.error.to_string(),
                    stack_trace: None,
                    error_type: Some(failure.error.error_type()),
                })
                .await?;
        }

        let filter = doc! {
            "datasetName": &page.dataset_name,
            "tableName": &page.table_name,
            "page": page.page,
        };
        let update = doc! { "$set": {
            "status": "DONE",
            "executionTimeSecs": execution_time_secs,
            "rssDeltaBytes": rss_delta_bytes,
            "vmsDeltaBytes": vms_delta_bytes,
        } };
        self.row.update_one(filter, update).await?;
        Ok(())
    }

    async fn mark_error(&self, page: &TablePage, error: &str, error_type: Option<&str>) -> Result<(), StoreError> {
        let filter = doc! {
            "datasetName": &page.dataset_name,
            "tableName": &page.table_name,
            "page": page.page,
        };
        let update = doc! { "$set": { "status": "ERROR" } };
        self.row.update_one(filter, update).await?;

        self.log
            .insert_one(LogDoc {
                dataset_name: page.dataset_name.clone(),
                table_name: page.table_name.clone(),
                error: error.to_string(),
                stack_trace: None,
                error_type: error_type.map(str::to_string),
            })
            .await?;
        Ok(())
    }
}

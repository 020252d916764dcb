//! The worker loop (spec §5 "Scheduling model", §6 "Job signal"): claim one
//! `TablePage`, run it to completion, persist its artifacts, repeat.
//!
//! Grounded on `utils::scheduled_executor`'s poll-sleep-repeat shape,
//! generalized from a fixed-interval task runner to a claim-or-sleep loop
//! gated on the `STOP` job signal.

use std::sync::Arc;
use std::time::Instant;

use sysinfo::{Pid, System};

use crate::config::WorkerConfig;
use crate::kg_client::KgClient;
use crate::pipeline::prediction::ScoringModel;
use crate::store::{DocumentStore, JobSignal};

pub struct Worker {
    config: WorkerConfig,
    store: Arc<dyn DocumentStore>,
    signal: Arc<dyn JobSignal>,
    kg: Arc<dyn KgClient>,
    model_initial: Arc<ScoringModel>,
    model_revision: Arc<ScoringModel>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn DocumentStore>,
        signal: Arc<dyn JobSignal>,
        kg: Arc<dyn KgClient>,
        model_initial: Arc<ScoringModel>,
        model_revision: Arc<ScoringModel>,
    ) -> Self {
        Self { config, store, signal, kg, model_initial, model_revision }
    }

    /// Runs the claim/process/persist loop until `STOP` is observed with no
    /// work left (if `exit_on_stop_when_idle`), or forever otherwise.
    pub async fn run(&self) -> Result<(), anyhow::Error> {
        loop {
            match self.store.claim_next_page().await {
                Ok(Some(mut page)) => {
                    let span = tracing::info_span!(
                        "page",
                        dataset_name = %page.dataset_name,
                        table_name = %page.table_name,
                        page = page.page
                    );
                    let _enter = span.enter();
                    self.process_one(&mut page).await;
                },
                Ok(None) => {
                    if self.config.exit_on_stop_when_idle && self.signal.is_stopped().await? {
                        tracing::info!("no pages left and STOP observed, exiting");
                        return Ok(());
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(self.config.poll_interval_secs)).await;
                },
                Err(err) => {
                    tracing::error!(error = %err, "failed to claim next page, retrying after poll interval");
                    tokio::time::sleep(std::time::Duration::from_secs(self.config.poll_interval_secs)).await;
                },
            }
        }
    }

    async fn process_one(&self, page: &mut crate::model::table::TablePage) {
        let mut sys = System::new();
        let pid = Pid::from_u32(std::process::id());
        sys.refresh_process(pid);
        let (rss_before, vms_before) =
            sys.process(pid).map(|p| (p.memory(), p.virtual_memory())).unwrap_or((0, 0));

        let started = Instant::now();
        let result = crate::pipeline::process_page(page, self.kg.as_ref(), &self.model_initial, &self.model_revision).await;
        let execution_time_secs = started.elapsed().as_secs_f64();

        sys.refresh_process(pid);
        let (rss_after, vms_after) =
            sys.process(pid).map(|p| (p.memory(), p.virtual_memory())).unwrap_or((0, 0));
        let rss_delta_bytes = rss_after as i64 - rss_before as i64;
        let vms_delta_bytes = vms_after as i64 - vms_before as i64;

        match result {
            Ok(outcome) => {
                tracing::info!(execution_time_secs, "page processed");
                if let Err(err) = self
                    .store
                    .persist_success(page, &outcome, execution_time_secs, rss_delta_bytes, vms_delta_bytes)
                    .await
                {
                    tracing::error!(error = %err, "failed to persist page outcome");
                }
            },
            Err(err) => {
                tracing::error!(error = %err, "pipeline failed on page, marking ERROR");
                if let Err(store_err) = self.store.mark_error(page, &err.to_string(), None).await {
                    tracing::error!(error = %store_err, "failed to record page error");
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kg_client::mock::ScriptedKgClient;
    use crate::pipeline::prediction::{ModelWeights, INITIAL_FEATURE_ORDER};
    use crate::pipeline::PipelineOutcome;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct EmptyStore {
        claims: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for EmptyStore {
        async fn claim_next_page(&self) -> Result<Option<crate::model::table::TablePage>, StoreError> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn persist_success(
            &self,
            _page: &crate::model::table::TablePage,
            _outcome: &PipelineOutcome,
            _execution_time_secs: f64,
            _rss_delta_bytes: i64,
            _vms_delta_bytes: i64,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn mark_error(
            &self,
            _page: &crate::model::table::TablePage,
            _error: &str,
            _error_type: Option<&str>,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct FlagSignal {
        stopped: Mutex<bool>,
    }

    #[async_trait]
    impl JobSignal for FlagSignal {
        async fn is_stopped(&self) -> Result<bool, StoreError> {
            Ok(*self.stopped.lock().unwrap())
        }
    }

    fn degenerate_model() -> ScoringModel {
        let feature_order: Vec<String> = INITIAL_FEATURE_ORDER.iter().map(|s| s.to_string()).collect();
        ScoringModel::from_weights(
            ModelWeights { w1: vec![vec![0.0; feature_order.len()]], b1: vec![0.0], w2: vec![1.0], b2: -1.0 },
            feature_order,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn exits_once_stop_is_observed_with_no_pages_left() {
        let store = Arc::new(EmptyStore { claims: AtomicUsize::new(0) });
        let signal = Arc::new(FlagSignal { stopped: Mutex::new(true) });
        let worker = Worker::new(
            WorkerConfig { poll_interval_secs: 1, exit_on_stop_when_idle: true },
            store.clone(),
            signal,
            Arc::new(ScriptedKgClient::default()),
            Arc::new(degenerate_model()),
            Arc::new(degenerate_model()),
        );

        worker.run().await.unwrap();
        assert_eq!(store.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn keeps_polling_while_stop_is_not_observed() {
        let store = Arc::new(EmptyStore { claims: AtomicUsize::new(0) });
        let signal = Arc::new(FlagSignal { stopped: Mutex::new(false) });
        let worker = Worker::new(
            WorkerConfig { poll_interval_secs: 1, exit_on_stop_when_idle: true },
            store.clone(),
            signal.clone(),
            Arc::new(ScriptedKgClient::default()),
            Arc::new(degenerate_model()),
            Arc::new(degenerate_model()),
        );

        let handle = tokio::spawn(async move { worker.run().await });
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        assert!(store.claims.load(Ordering::SeqCst) >= 2);

        *signal.stopped.lock().unwrap() = true;
        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        handle.await.unwrap().unwrap();
    }
}

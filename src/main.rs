use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use alligator::config::Config;
use alligator::kg_client::{HttpKgClient, KgClient};
use alligator::pipeline::prediction::{revision_feature_order, ScoringModel, INITIAL_FEATURE_ORDER};
use alligator::store::{DocumentStore, JobSignal, MongoStore, RedisJobSignal};
use alligator::Worker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);

    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("alligator-worker.log");

        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("alligator worker starting up");
    tracing::info!("configuration loaded successfully");

    let kg: Arc<dyn KgClient> = Arc::new(HttpKgClient::new(
        config.lamapi.endpoint.clone(),
        config.lamapi.token.clone(),
        config.lamapi.max_concurrent_requests,
        std::time::Duration::from_secs(config.lamapi.request_timeout_secs),
    ));
    tracing::info!("KG client configured against {}", config.lamapi.endpoint);

    let model_initial = Arc::new(ScoringModel::load(
        std::path::Path::new(&config.model.pn_model_path),
        INITIAL_FEATURE_ORDER.iter().map(|s| s.to_string()).collect(),
    )?);
    let model_revision = Arc::new(ScoringModel::load(
        std::path::Path::new(&config.model.rn_model_path),
        revision_feature_order(),
    )?);
    tracing::info!("scoring models loaded");

    let store: Arc<dyn DocumentStore> = Arc::new(MongoStore::connect(&config.mongo).await?);
    tracing::info!("connected to document store at {}", config.mongo.uri);

    let signal: Arc<dyn JobSignal> = Arc::new(RedisJobSignal::connect(&config.redis)?);

    let worker = Worker::new(config.worker.clone(), store, signal, kg, model_initial, model_revision);
    worker.run().await?;

    Ok(())
}

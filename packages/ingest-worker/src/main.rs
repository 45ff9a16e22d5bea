//! Binary entrypoint: wires the engine's collaborators together and runs
//! the four queue consumer loops plus the stale-batch recovery sweep
//! (§4.9) as concurrent tasks, shutting down gracefully on Ctrl+C.

mod config;
mod content_loader;
mod metadata;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ai_client::{AiClient, AiClientConfig};
use graph_core::{NatsBroker, StagingStore, WorkerDeps};
use graph_extract::{ModelClient, RateLimitedModelClient};
use graph_loaders::{ApproximateEncoder, InMemoryObjectStore, PostgresProcessTimeStats};

use crate::config::Config;
use crate::content_loader::PlainTextContentLoader;
use crate::metadata::ModelMetadataExtractor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,graph_core=debug,ingest_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).with_line_number(true))
        .init();

    tracing::info!("starting ingest worker");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let nats_client = async_nats::connect(&config.nats_url)
        .await
        .context("failed to connect to NATS")?;
    let broker: Arc<dyn graph_core::Broker> = Arc::new(NatsBroker::new(nats_client));

    let ai_config = AiClientConfig::from_env().context("failed to load AI client config")?;
    let max_parallel: usize = std::env::var("AI_PARALLEL_REQ")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    let model: Arc<dyn ModelClient> = Arc::new(RateLimitedModelClient::new(
        AiClient::new(ai_config),
        max_parallel,
    ));

    let object_store = Arc::new(InMemoryObjectStore::new());
    let content_loader = Arc::new(PlainTextContentLoader);
    let metadata_extractor = Arc::new(ModelMetadataExtractor::new(model.clone()));
    let encoder = Arc::new(ApproximateEncoder::o200k_base());
    let process_time_stats = Arc::new(PostgresProcessTimeStats::new(pool.clone()));
    let staging = StagingStore::new(pool.clone());

    let deps = WorkerDeps {
        pool,
        broker,
        object_store,
        content_loader,
        metadata_extractor,
        encoder,
        process_time_stats,
        model,
        staging,
        parallel_files: config.parallel_files,
        max_tokens_per_unit: config.max_tokens_per_unit,
        preprocess_claim_timeout_secs: config.preprocess_claim_timeout_secs,
        graph_claim_timeout_secs: config.graph_claim_timeout_secs,
        lease_ttl_secs: config.lease_ttl_secs,
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received shutdown signal");
        shutdown.cancel();
    });

    let recovery_interval = Duration::from_secs(config.recovery_interval_secs);
    let stale_threshold = Duration::from_secs(config.stale_batch_threshold_secs);

    tokio::join!(
        graph_core::run_preprocess_consumer(deps.clone(), cancel.clone()),
        graph_core::run_graph_consumer(deps.clone(), cancel.clone()),
        graph_core::run_description_consumer(deps.clone(), cancel.clone()),
        graph_core::run_delete_consumer(deps.clone(), cancel.clone()),
        graph_core::run_recovery_loop(
            deps.pool.clone(),
            deps.broker.clone(),
            recovery_interval,
            stale_threshold,
            cancel.clone()
        ),
    );

    tracing::info!("ingest worker stopped");
    Ok(())
}

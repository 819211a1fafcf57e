use std::sync::Arc;

use common::{
    events::EventBus,
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::{config::get_config, embedding::EmbeddingProvider},
};
use ingestion::{
    fingerprint::FingerprintLock,
    pipeline::{DefaultPipelineServices, IngestionConfig, IngestionPipeline, IngestionTuning},
    run_worker_loop,
};
use main::app::{build_router, AppState};
use retrieval::reranking::RerankerPool;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Combined process: HTTP contract routes and the ingestion worker loop in
/// one binary, for deployments that don't want to run `server` and `worker`
/// as separate processes. Identical wiring to both; see those binaries for
/// the split form.
#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;
    common::storage::indexes::ensure_runtime_indexes(&db, config.embedding_dimensions as usize).await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()));
    let reranker = RerankerPool::maybe_from_config(&config)?;

    let tuning = IngestionTuning::from(&config);
    let storage = StorageManager::new(&config).await?;
    let services = Arc::new(DefaultPipelineServices::new(
        openai_client,
        config.clone(),
        storage,
        embedding_provider.clone(),
        tuning,
    ));
    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        IngestionConfig::from(&config),
        services,
        FingerprintLock::new(),
    ));

    let state = AppState {
        db: db.clone(),
        config: config.clone(),
        embedding_provider,
        reranker,
        events: Arc::new(EventBus::new()),
    };
    let app = build_router(state);
    let serve_address = format!("0.0.0.0:{}", config.http_port);

    info!(address = %serve_address, "starting combined server+worker process");
    let server_handle = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(serve_address).await?;
        axum::serve(listener, app).await
    });
    let worker_handle = tokio::spawn(async move {
        if let Err(err) = run_worker_loop(db, ingestion_pipeline).await {
            error!(%err, "worker loop exited with error");
        }
    });

    tokio::select! {
        result = server_handle => {
            result??;
            error!("http server task exited unexpectedly");
        }
        result = worker_handle => {
            result?;
            error!("worker loop task exited unexpectedly");
        }
    }

    Ok(())
}

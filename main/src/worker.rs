use std::sync::Arc;

use common::{
    storage::db::SurrealDbClient, storage::store::StorageManager, utils::config::get_config,
    utils::embedding::EmbeddingProvider,
};
use ingestion::{
    fingerprint::FingerprintLock,
    pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning, DefaultPipelineServices},
    run_worker_loop,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
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

    let tuning = IngestionTuning::from(&config);
    let embedding_provider = Arc::new(EmbeddingProvider::from_config(&config, openai_client.clone()));
    let storage = StorageManager::new(&config).await?;

    let services = Arc::new(DefaultPipelineServices::new(
        openai_client,
        config.clone(),
        storage,
        embedding_provider,
        tuning.clone(),
    ));

    let pipeline_config = IngestionConfig::from(&config);
    let fingerprint_lock = FingerprintLock::new();

    let ingestion_pipeline = Arc::new(IngestionPipeline::new(
        db.clone(),
        pipeline_config,
        services,
        fingerprint_lock,
    ));

    run_worker_loop(db, ingestion_pipeline).await
}

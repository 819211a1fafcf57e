use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::resource::Resource},
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::fingerprint::FingerprintLock;

use super::{
    config::{IngestionConfig, IngestionTuning},
    context::{FetchedContent, ParsedContent},
    enrichment_result::EnrichmentResult,
    services::PipelineServices,
    IngestionPipeline,
};
use common::storage::types::ingestion_job::{IngestionJob, JobState};

struct MockServices {
    parsed: ParsedContent,
    enrichment: EnrichmentResult,
    dense_embedding: Vec<f32>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockServices {
    fn new() -> Self {
        Self {
            parsed: ParsedContent {
                text: "Example document for ingestion pipeline.".into(),
                title: Some("Example Document".into()),
            },
            enrichment: EnrichmentResult {
                description: Some("A short description.".into()),
                subjects: vec!["testing".into()],
                classification: None,
                citations: Vec::new(),
                scholarly: None,
            },
            dense_embedding: vec![0.1; 8],
            calls: Mutex::new(Vec::new()),
        }
    }

    async fn record(&self, stage: &'static str) {
        self.calls.lock().await.push(stage);
    }
}

#[async_trait]
impl PipelineServices for MockServices {
    async fn fetch(&self, _url: &str) -> Result<FetchedContent, AppError> {
        self.record("fetch").await;
        Ok(FetchedContent {
            bytes: b"<html><body>example</body></html>".to_vec(),
            content_type: Some("text/html".into()),
        })
    }

    fn parse(&self, _fetched: &FetchedContent) -> Result<ParsedContent, AppError> {
        Ok(self.parsed.clone())
    }

    async fn archive(&self, _fetched: &FetchedContent) -> Result<String, AppError> {
        self.record("archive").await;
        Ok("cas/ab/cdef".into())
    }

    async fn run_enrichment(&self, _title: &str, _text: &str) -> Result<EnrichmentResult, AppError> {
        self.record("enrich").await;
        Ok(self.enrichment.clone())
    }

    async fn dense_embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
        self.record("dense_embed").await;
        Ok(self.dense_embedding.clone())
    }

    fn sparse_embed(&self, _input: &str) -> HashMap<u32, f32> {
        HashMap::from([(42, 0.5), (7, 0.25)])
    }
}

struct FailingEnrichmentServices {
    inner: MockServices,
}

#[async_trait]
impl PipelineServices for FailingEnrichmentServices {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        self.inner.fetch(url).await
    }

    fn parse(&self, fetched: &FetchedContent) -> Result<ParsedContent, AppError> {
        self.inner.parse(fetched)
    }

    async fn archive(&self, fetched: &FetchedContent) -> Result<String, AppError> {
        self.inner.archive(fetched).await
    }

    async fn run_enrichment(&self, _title: &str, _text: &str) -> Result<EnrichmentResult, AppError> {
        Err(AppError::Transient("mock enrichment model unavailable".into()))
    }

    async fn dense_embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
        Err(AppError::Transient("mock embedding model unavailable".into()))
    }

    fn sparse_embed(&self, input: &str) -> HashMap<u32, f32> {
        self.inner.sparse_embed(input)
    }
}

struct FetchFailingServices;

#[async_trait]
impl PipelineServices for FetchFailingServices {
    async fn fetch(&self, _url: &str) -> Result<FetchedContent, AppError> {
        Err(AppError::Validation("blocked by SSRF guard".into()))
    }

    fn parse(&self, _fetched: &FetchedContent) -> Result<ParsedContent, AppError> {
        unreachable!("parse should not run when fetch fails")
    }

    async fn archive(&self, _fetched: &FetchedContent) -> Result<String, AppError> {
        unreachable!("archive should not run when fetch fails")
    }

    async fn run_enrichment(&self, _title: &str, _text: &str) -> Result<EnrichmentResult, AppError> {
        unreachable!("run_enrichment should not run when fetch fails")
    }

    async fn dense_embed(&self, _input: &str) -> Result<Vec<f32>, AppError> {
        unreachable!("dense_embed should not run when fetch fails")
    }

    fn sparse_embed(&self, _input: &str) -> HashMap<u32, f32> {
        unreachable!("sparse_embed should not run when fetch fails")
    }
}

async fn setup_db() -> SurrealDbClient {
    let namespace = "pipeline_test";
    let database = Uuid::new_v4().to_string();
    let db = SurrealDbClient::memory(namespace, &database)
        .await
        .expect("failed to create in-memory surrealdb");
    db.ensure_initialized()
        .await
        .expect("failed to initialize schema");
    db
}

fn pipeline_config() -> IngestionConfig {
    IngestionConfig {
        tuning: IngestionTuning {
            worker_pool_size: 1,
            max_attempts: 3,
            backoff_base_ms: 10,
            max_backoff_ms: 100,
            fetch_timeout_ms: 5_000,
            model_timeout_ms: 5_000,
            index_write_timeout_ms: 5_000,
        },
        quality_weights: [0.2, 0.2, 0.2, 0.2, 0.2],
    }
}

async fn seed_job(db: &SurrealDbClient, url: &str) -> (IngestionJob, Resource) {
    let resource = Resource::new(url.into(), format!("fp-{url}"), "article".into());
    resource.clone().store(db).await.expect("store resource");

    let job = IngestionJob::new(resource.id.clone());
    let job = job.upsert(db).await.expect("store job");
    (job, resource)
}

#[tokio::test]
async fn ingestion_pipeline_happy_path_persists_resource() {
    let db = Arc::new(setup_db().await);
    let services = Arc::new(MockServices::new());
    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        pipeline_config(),
        services.clone(),
        FingerprintLock::new(),
    );

    let (mut job, resource) = seed_job(&db, "https://example.com/article").await;
    job.mark_processing();

    pipeline.process(job.clone(), resource.clone()).await;

    let stored_job = IngestionJob::latest_for_resource(&db, &resource.id)
        .await
        .expect("lookup job")
        .expect("job present");
    assert_eq!(stored_job.state, JobState::Succeeded);

    let stored_resource: Resource = db
        .get_item(&resource.id)
        .await
        .expect("retrieve resource")
        .expect("resource present");
    assert!(stored_resource.archive_path.is_some());
    assert!(stored_resource.embedding.is_some());
    assert!(stored_resource.sparse_embedding.is_some());
    assert_eq!(
        stored_resource.ingestion_status,
        common::storage::types::resource::IngestionStatus::Completed
    );

    let call_log = services.calls.lock().await.clone();
    assert_eq!(call_log, vec!["fetch", "archive", "enrich", "dense_embed"]);
}

#[tokio::test]
async fn ingestion_pipeline_degraded_enrichment_still_persists() {
    let db = Arc::new(setup_db().await);
    let services = Arc::new(FailingEnrichmentServices {
        inner: MockServices::new(),
    });
    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        pipeline_config(),
        services,
        FingerprintLock::new(),
    );

    let (mut job, resource) = seed_job(&db, "https://example.com/degraded").await;
    job.mark_processing();

    pipeline.process(job.clone(), resource.clone()).await;

    let stored_job = IngestionJob::latest_for_resource(&db, &resource.id)
        .await
        .expect("lookup job")
        .expect("job present");
    assert_eq!(stored_job.state, JobState::Succeeded);

    let stored_resource: Resource = db
        .get_item(&resource.id)
        .await
        .expect("retrieve resource")
        .expect("resource present");
    assert!(stored_resource.embedding.is_none());
    assert!(stored_resource.needs_review);
}

#[tokio::test]
async fn ingestion_pipeline_fetch_failure_retries_until_dead_letter() {
    let db = Arc::new(setup_db().await);
    let services = Arc::new(FetchFailingServices);
    let mut tuning = pipeline_config();
    tuning.tuning.max_attempts = 1;
    let pipeline = IngestionPipeline::new(
        Arc::clone(&db),
        tuning,
        services,
        FingerprintLock::new(),
    );

    let (mut job, resource) = seed_job(&db, "https://example.com/blocked").await;
    job.mark_processing();

    pipeline.process(job.clone(), resource.clone()).await;

    let stored_job = IngestionJob::latest_for_resource(&db, &resource.id)
        .await
        .expect("lookup job")
        .expect("job present");
    assert_eq!(stored_job.state, JobState::DeadLetter);

    let stored_resource: Resource = db
        .get_item(&resource.id)
        .await
        .expect("retrieve resource")
        .expect("resource present");
    assert_eq!(
        stored_resource.ingestion_status,
        common::storage::types::resource::IngestionStatus::Failed
    );
}

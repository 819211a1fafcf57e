use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::citation::Citation, types::resource::Resource},
};
use tracing::error;

use super::{
    config::IngestionConfig, enrichment_result::EnrichmentResult, services::PipelineServices,
};

/// Raw bytes plus the subset of response metadata the Parse stage needs,
/// produced by Fetch.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Normalized text plus the page metadata Parse could recover, produced by
/// Parse.
#[derive(Debug, Clone, Default)]
pub struct ParsedContent {
    pub text: String,
    pub title: Option<String>,
}

/// Per-attempt scratch state threaded through the pipeline stage
/// functions. One `PipelineContext` exists per `drive_pipeline` call; it
/// does not survive across retries.
pub struct PipelineContext<'a> {
    pub resource: &'a mut Resource,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub fetched: Option<FetchedContent>,
    pub parsed: Option<ParsedContent>,
    pub enrichment: Option<EnrichmentResult>,
    pub dense_embedding: Option<Vec<f32>>,
    pub sparse_embedding: Option<std::collections::HashMap<u32, f32>>,
    pub citations: Vec<Citation>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        resource: &'a mut Resource,
        attempt: u32,
        db: &'a SurrealDbClient,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        Self {
            resource,
            attempt,
            db,
            pipeline_config,
            services,
            fetched: None,
            parsed: None,
            enrichment: None,
            dense_embedding: None,
            sparse_embedding: None,
            citations: Vec::new(),
        }
    }

    pub fn fetched(&self) -> Result<&FetchedContent, AppError> {
        self.fetched
            .as_ref()
            .ok_or_else(|| AppError::InternalError("fetched content expected to be available".into()))
    }

    pub fn parsed(&self) -> Result<&ParsedContent, AppError> {
        self.parsed
            .as_ref()
            .ok_or_else(|| AppError::InternalError("parsed content expected to be available".into()))
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            resource_id = %self.resource.id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}

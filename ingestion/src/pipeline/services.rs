use std::{collections::HashMap, sync::Arc, time::Duration};

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::store::StorageManager,
    utils::{
        config::AppConfig,
        embedding::{generate_sparse_embedding, EmbeddingProvider},
    },
};
use sha2::{Digest, Sha256};

use super::{config::IngestionTuning, context::FetchedContent, enrichment_result::EnrichmentResult};
use crate::utils::{
    fetch::{fetch_url, parse_content},
    llm_instructions::{get_enrichment_schema, ENRICHMENT_SYSTEM_MESSAGE},
};

use super::context::ParsedContent;

#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError>;

    fn parse(&self, fetched: &FetchedContent) -> Result<ParsedContent, AppError>;

    /// Writes raw bytes content-addressed by their hash and returns the
    /// archive path.
    async fn archive(&self, fetched: &FetchedContent) -> Result<String, AppError>;

    /// The single structured-output call covering Summarize/Tag/Classify/
    /// ExtractCitations/ScholarlyExtract. Degradable: callers treat
    /// any error here as "use `EnrichmentResult::empty()`".
    async fn run_enrichment(&self, title: &str, text: &str) -> Result<EnrichmentResult, AppError>;

    /// Dense embed, degradable to `None` on failure.
    async fn dense_embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    /// Sparse embed. Never fails: the lexical extractor has no
    /// network dependency, so this stage is degradable in name only.
    fn sparse_embed(&self, input: &str) -> HashMap<u32, f32>;
}

pub struct DefaultPipelineServices {
    openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    config: AppConfig,
    storage: StorageManager,
    embedding_provider: Arc<EmbeddingProvider>,
    tuning: IngestionTuning,
}

impl DefaultPipelineServices {
    pub fn new(
        openai_client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
        config: AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
        tuning: IngestionTuning,
    ) -> Self {
        Self {
            openai_client,
            config,
            storage,
            embedding_provider,
            tuning,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        fetch_url(url, Duration::from_millis(self.tuning.fetch_timeout_ms)).await
    }

    fn parse(&self, fetched: &FetchedContent) -> Result<ParsedContent, AppError> {
        parse_content(fetched)
    }

    async fn archive(&self, fetched: &FetchedContent) -> Result<String, AppError> {
        let digest = Sha256::digest(&fetched.bytes);
        let hex = format!("{digest:x}");
        let path = format!("cas/{}/{}", &hex[0..2], &hex[2..]);
        self.storage
            .put(&path, Bytes::from(fetched.bytes.clone()))
            .await
            .map_err(|e| AppError::InternalError(format!("archive write failed: {e}")))?;
        Ok(path)
    }

    async fn run_enrichment(&self, title: &str, text: &str) -> Result<EnrichmentResult, AppError> {
        let user_message = format!("Title:\n{title}\n\nText:\n{text}");

        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Structured enrichment of an ingested resource".into()),
                name: "resource_enrichment".into(),
                schema: Some(get_enrichment_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.config.processing_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(ENRICHMENT_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = tokio::time::timeout(
            Duration::from_millis(self.tuning.model_timeout_ms),
            self.openai_client.chat().create(request),
        )
        .await
        .map_err(|_| AppError::Transient("enrichment model call timed out".into()))??;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        serde_json::from_str::<EnrichmentResult>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response into analysis: {e}"))
        })
    }

    async fn dense_embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        tokio::time::timeout(
            Duration::from_millis(self.tuning.model_timeout_ms),
            self.embedding_provider.embed(input),
        )
        .await
        .map_err(|_| AppError::Transient("dense embedding call timed out".into()))?
    }

    fn sparse_embed(&self, input: &str) -> HashMap<u32, f32> {
        generate_sparse_embedding(input)
    }
}

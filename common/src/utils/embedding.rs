use std::collections::HashMap;
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use sha2::{Digest, Sha256};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::{error::AppError, utils::config::AppConfig};

/// Dense embedding model name and output dimensionality, resolved once at
/// startup from configuration rather than read back from storage on every
/// call.
#[derive(Clone, Debug)]
pub struct EmbeddingProvider {
    model: String,
    dimensions: u32,
    client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
}

impl EmbeddingProvider {
    pub fn from_config(
        config: &AppConfig,
        client: Arc<async_openai::Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        Self {
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
            client,
        }
    }

    pub fn dimension(&self) -> u32 {
        self.dimensions
    }

    /// Generates a dense embedding for `input`. Degradable: the Dense
    /// embed stage catches failure here and stores a null `embedding`
    /// rather than failing the whole job.
    pub async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        generate_embedding_with_params(&self.client, input, &self.model, self.dimensions).await
    }
}

/// Generates a dense embedding vector using a specific model and dimension.
pub async fn generate_embedding_with_params(
    client: &async_openai::Client<async_openai::config::OpenAIConfig>,
    input: &str,
    model: &str,
    dimensions: u32,
) -> Result<Vec<f32>, AppError> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input([input])
        .dimensions(dimensions)
        .build()?;

    let response = client.embeddings().create(request).await?;

    let embedding = response
        .data
        .first()
        .ok_or_else(|| AppError::LLMParsing("No embedding data received from API".into()))?
        .embedding
        .clone();

    debug!(
        "Embedding was created with {:?} dimensions",
        embedding.len()
    );

    Ok(embedding)
}

const SPARSE_VOCAB_SIZE: u32 = 1 << 18;

/// Label stamped on `SparseEmbedding::model` by callers of
/// `generate_sparse_embedding`, so stored rows record which extractor
/// produced them.
pub const SPARSE_EMBEDDING_MODEL: &str = "lexical-hashing-trick-v1";

/// Derives a learned-sparse-style `{token_id: weight}` map from raw text.
///
/// No model in the stack produces true learned sparse vectors (e.g.
/// SPLADE), so this stands in with a deterministic lexical weighting:
/// tokens are lowercased, NFC-normalized, split on Unicode word boundaries,
/// stopworded, hashed into a fixed vocabulary space, and weighted by
/// log-scaled term frequency. This keeps the Sparse Index's `{token_id:
/// weight}` contract satisfiable without a network call, so the
/// Sparse embed stage never needs to be degradable.
pub fn generate_sparse_embedding(text: &str) -> HashMap<u32, f32> {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for raw in text.nfc().collect::<String>().to_lowercase().split_whitespace() {
        let token: String = raw
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if token.is_empty() || is_stopword(&token) {
            continue;
        }
        let token_id = hash_token(&token);
        *counts.entry(token_id).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(id, count)| (id, 1.0 + (count as f32).ln()))
        .collect()
}

fn hash_token(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest[..4]);
    u32::from_be_bytes(bytes) % SPARSE_VOCAB_SIZE
}

fn is_stopword(token: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is",
        "it", "its", "of", "on", "that", "the", "to", "was", "were", "will", "with", "this",
        "but", "or", "not", "have", "had", "can",
    ];
    STOPWORDS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_embedding_ignores_stopwords_and_case() {
        let a = generate_sparse_embedding("The Quick Brown Fox");
        let b = generate_sparse_embedding("quick brown fox");
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn sparse_embedding_weights_repeated_terms_higher() {
        let single = generate_sparse_embedding("archive");
        let repeated = generate_sparse_embedding("archive archive archive");
        let single_weight = *single.values().next().unwrap();
        let repeated_weight = *repeated.values().next().unwrap();
        assert!(repeated_weight > single_weight);
    }

    #[test]
    fn sparse_embedding_empty_text_is_empty_map() {
        assert!(generate_sparse_embedding("the a of").is_empty());
    }
}

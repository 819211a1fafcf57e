use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

/// Process configuration, loaded once at startup and handed to every
/// component that needs a tunable. Defaults mirror the configuration
/// table in the design document.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    #[serde(default = "default_index_write_timeout_ms")]
    pub index_write_timeout_ms: u64,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,
    #[serde(default = "default_candidate_pool")]
    pub candidate_pool: usize,
    #[serde(default = "default_rerank_top")]
    pub rerank_top: usize,
    #[serde(default = "default_hybrid_weight")]
    pub default_hybrid_weight: f32,
    #[serde(default = "default_vector_min_sim_hybrid")]
    pub vector_min_sim_hybrid: f32,
    #[serde(default = "default_vector_min_sim_graph")]
    pub vector_min_sim_graph: f32,

    #[serde(default = "default_graph_w_v")]
    pub graph_w_v: f32,
    #[serde(default = "default_graph_w_t")]
    pub graph_w_t: f32,
    #[serde(default = "default_graph_w_c")]
    pub graph_w_c: f32,
    #[serde(default = "default_pagerank_damping")]
    pub pagerank_damping: f32,

    #[serde(default = "default_quality_weights")]
    pub quality_weights: [f32; 5],

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_processing_model")]
    pub processing_model: String,

    #[serde(default)]
    pub reranking_enabled: bool,
    pub reranking_pool_size: Option<usize>,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_mul(2))
        .unwrap_or(4)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_fetch_timeout_ms() -> u64 {
    30_000
}

fn default_model_timeout_ms() -> u64 {
    60_000
}

fn default_index_write_timeout_ms() -> u64 {
    10_000
}

fn default_query_timeout_ms() -> u64 {
    2_000
}

fn default_rrf_k() -> f32 {
    60.0
}

fn default_candidate_pool() -> usize {
    200
}

fn default_rerank_top() -> usize {
    50
}

fn default_hybrid_weight() -> f32 {
    0.5
}

fn default_vector_min_sim_hybrid() -> f32 {
    0.0
}

fn default_vector_min_sim_graph() -> f32 {
    0.85
}

fn default_graph_w_v() -> f32 {
    0.6
}

fn default_graph_w_t() -> f32 {
    0.3
}

fn default_graph_w_c() -> f32 {
    0.1
}

fn default_pagerank_damping() -> f32 {
    0.85
}

fn default_quality_weights() -> [f32; 5] {
    [0.2, 0.2, 0.2, 0.2, 0.2]
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_processing_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            surrealdb_address: String::new(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: String::new(),
            surrealdb_database: String::new(),
            data_dir: default_data_dir(),
            http_port: 0,
            openai_base_url: default_base_url(),
            storage: default_storage_kind(),
            worker_pool_size: default_worker_pool_size(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            model_timeout_ms: default_model_timeout_ms(),
            index_write_timeout_ms: default_index_write_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            rrf_k: default_rrf_k(),
            candidate_pool: default_candidate_pool(),
            rerank_top: default_rerank_top(),
            default_hybrid_weight: default_hybrid_weight(),
            vector_min_sim_hybrid: default_vector_min_sim_hybrid(),
            vector_min_sim_graph: default_vector_min_sim_graph(),
            graph_w_v: default_graph_w_v(),
            graph_w_t: default_graph_w_t(),
            graph_w_c: default_graph_w_c(),
            pagerank_damping: default_pagerank_damping(),
            quality_weights: default_quality_weights(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            processing_model: default_processing_model(),
            reranking_enabled: false,
            reranking_pool_size: None,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_design_table() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.rrf_k, 60.0);
        assert_eq!(cfg.candidate_pool, 200);
        assert_eq!(cfg.rerank_top, 50);
        assert_eq!(cfg.default_hybrid_weight, 0.5);
        assert_eq!(cfg.vector_min_sim_hybrid, 0.0);
        assert_eq!(cfg.vector_min_sim_graph, 0.85);
        assert!((cfg.quality_weights.iter().sum::<f32>() - 1.0).abs() < 1e-6);
    }
}

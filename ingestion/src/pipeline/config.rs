use common::utils::config::AppConfig;

/// Ingestion-side tuning, derived from `AppConfig`'s configuration
/// defaults rather than duplicating fields. Chunk-related knobs are gone:
/// Dense embed is one vector per resource over title+desc+text, not
/// per-chunk.
#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub worker_pool_size: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub fetch_timeout_ms: u64,
    pub model_timeout_ms: u64,
    pub index_write_timeout_ms: u64,
}

impl From<&AppConfig> for IngestionTuning {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker_pool_size: config.worker_pool_size,
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            max_backoff_ms: config.max_backoff_ms,
            fetch_timeout_ms: config.fetch_timeout_ms,
            model_timeout_ms: config.model_timeout_ms,
            index_write_timeout_ms: config.index_write_timeout_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
    /// Weights for `Resource::recompute_quality`.
    pub quality_weights: [f32; 5],
}

impl From<&AppConfig> for IngestionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning::from(config),
            quality_weights: config.quality_weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_worker_pool_size_from_app_config() {
        let app_config = AppConfig {
            worker_pool_size: 7,
            ..AppConfig::default()
        };
        let tuning = IngestionTuning::from(&app_config);
        assert_eq!(tuning.worker_pool_size, 7);
    }
}

mod config;
mod context;
mod enrichment_result;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
pub use enrichment_result::{ClassificationGuess, EnrichmentResult, ExtractedCitation, ScholarlyMetadata};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            ingestion_job::{IngestionJob, JobState},
            resource::{IngestionStatus, Resource},
        },
    },
};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::fingerprint::FingerprintLock;

use self::{
    context::PipelineContext,
    stages::{enrich, fetch_parse_archive, persist, resolve_fingerprint},
    state::ready,
};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
    fingerprint_lock: Arc<FingerprintLock>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
        fingerprint_lock: Arc<FingerprintLock>,
    ) -> Self {
        Self {
            db,
            pipeline_config,
            services,
            fingerprint_lock,
        }
    }

    /// Drives one claimed `(job, resource)` pair through fetch → parse →
    /// archive → fingerprint dedup → enrich → persist, taking the
    /// fingerprint build lock for the resource's current
    /// `content_fingerprint` for the duration so two jobs never build the
    /// same content concurrently. Updates and persists the job and
    /// resource terminal state; never panics on pipeline failure.
    #[tracing::instrument(skip_all, fields(resource_id = %resource.id, job_id = %job.id, attempt = job.attempt_count))]
    pub async fn process(&self, mut job: IngestionJob, mut resource: Resource) {
        let _lock = self
            .fingerprint_lock
            .acquire(&resource.content_fingerprint)
            .await;

        resource.ingestion_status = IngestionStatus::Processing;
        if let Err(err) = resource.clone().store(&self.db).await {
            warn!(resource_id = %resource.id, error = %err, "failed to mark resource processing");
        }

        let started = Instant::now();
        let outcome = self.drive_pipeline(&mut resource, job.attempt_count).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(()) => {
                job.mark_succeeded();
                info!(
                    resource_id = %resource.id,
                    job_id = %job.id,
                    elapsed_ms,
                    "ingestion pipeline succeeded"
                );
            }
            Err(err) => {
                warn!(resource_id = %resource.id, job_id = %job.id, error = %err, "ingestion pipeline failed");
                job.mark_failed(&err, self.pipeline_config.tuning.max_attempts);

                resource.ingestion_status = if job.state == JobState::DeadLetter {
                    IngestionStatus::Failed
                } else {
                    IngestionStatus::Pending
                };
                if let Err(store_err) = resource.clone().store(&self.db).await {
                    warn!(resource_id = %resource.id, error = %store_err, "failed to persist resource failure state");
                }

                if job.state == JobState::Failed {
                    self.schedule_retry(job.clone());
                }
            }
        }

        if let Err(err) = job.upsert(&self.db).await {
            warn!(resource_id = %resource.id, error = %err, "failed to persist ingestion job state");
        }
    }

    async fn drive_pipeline(&self, resource: &mut Resource, attempt: u32) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(
            resource,
            attempt,
            self.db.as_ref(),
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();
        let machine = fetch_parse_archive(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = resolve_fingerprint(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let machine = enrich(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;
        let _machine = persist(machine, &mut ctx).await.map_err(|err| ctx.abort(err))?;

        Ok(())
    }

    /// Exponential backoff `base·2^(attempt-1)`, capped at `max_backoff_ms`,
    /// with a small per-job jitter so many jobs failing at once don't all
    /// wake on the same tick.
    fn schedule_retry(&self, mut job: IngestionJob) {
        let tuning = self.pipeline_config.tuning.clone();
        let db = Arc::clone(&self.db);
        let delay = retry_delay(&tuning, &job);

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.requeue();
            if let Err(err) = job.upsert(&db).await {
                warn!(job_id = %job.id, error = %err, "failed to requeue ingestion job after backoff");
            }
        });
    }
}

fn retry_delay(tuning: &IngestionTuning, job: &IngestionJob) -> Duration {
    let exponent = job.attempt_count.saturating_sub(1).min(32);
    let backoff_ms = tuning
        .backoff_base_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(tuning.max_backoff_ms);

    let jitter_seed = Sha256::digest(job.id.as_bytes());
    let jitter_ms = u64::from(jitter_seed[0]) % tuning.backoff_base_ms.max(1);

    Duration::from_millis(backoff_ms.saturating_add(jitter_ms).min(tuning.max_backoff_ms))
}

#[cfg(test)]
mod tests;

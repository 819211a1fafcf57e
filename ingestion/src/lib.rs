#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod fingerprint;
pub mod pipeline;
pub mod utils;

use common::storage::{db::SurrealDbClient, types::ingestion_job::IngestionJob};
pub use pipeline::{IngestionConfig, IngestionPipeline, IngestionTuning};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

/// Polls `ingestion_job` for queued work and hands claimed jobs to the
/// pipeline. One loop per worker; `IngestionPipeline::process` itself
/// takes the fingerprint lock, so any number of these can run concurrently
/// against the same database.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    ingestion_pipeline: Arc<IngestionPipeline>,
) -> Result<(), Box<dyn std::error::Error>> {
    let idle_backoff = Duration::from_millis(500);

    loop {
        match IngestionJob::claim_next_queued(&db).await {
            Ok(Some((job, resource))) => {
                let job_id = job.id.clone();
                let resource_id = resource.id.clone();
                info!(%job_id, %resource_id, attempt = job.attempt_count, "claimed ingestion job");
                ingestion_pipeline.process(job, resource).await;
            }
            Ok(None) => {
                sleep(idle_backoff).await;
            }
            Err(err) => {
                error!(error = %err, "failed to claim ingestion job");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

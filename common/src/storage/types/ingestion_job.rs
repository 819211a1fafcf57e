use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::resource::Resource;

/// The ingestion pipeline's attempt-tracking state, distinct from
/// `Resource::ingestion_status`: a resource has one lifecycle status, but
/// may accumulate several job attempts across retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Succeeded,
    Failed,
    DeadLetter,
}

stored_object!(IngestionJob, "ingestion_job", {
    resource_id: String,
    state: JobState,
    attempt_count: u32,
    last_error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>
});

impl IngestionJob {
    pub fn new(resource_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            resource_id,
            state: JobState::Queued,
            attempt_count: 0,
            last_error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn mark_processing(&mut self) {
        self.state = JobState::Processing;
        self.attempt_count += 1;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self) {
        self.state = JobState::Succeeded;
        self.completed_at = Some(Utc::now());
        self.last_error = None;
    }

    /// Records a failed attempt and routes to `Failed` (retry still
    /// available) or `DeadLetter` (attempts exhausted) per the caller's
    /// configured attempt ceiling.
    pub fn mark_failed(&mut self, error: &AppError, max_attempts: u32) {
        self.last_error = Some(error.to_string());
        if self.can_retry(max_attempts) && error.is_retryable() {
            self.state = JobState::Failed;
        } else {
            self.state = JobState::DeadLetter;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn can_retry(&self, max_attempts: u32) -> bool {
        self.attempt_count < max_attempts
    }

    /// Makes a `Failed` job eligible for claiming again, after the caller's
    /// backoff delay has elapsed.
    pub fn requeue(&mut self) {
        self.state = JobState::Queued;
    }

    pub async fn upsert(self, db: &SurrealDbClient) -> Result<IngestionJob, AppError> {
        let stored: Option<IngestionJob> = db
            .client
            .upsert(("ingestion_job", self.id.clone()))
            .content(self)
            .await?;
        stored.ok_or_else(|| AppError::InternalError("ingestion_job upsert returned no row".into()))
    }

    /// Selects the oldest queued job and marks it processing. Returns
    /// `None` once the queue is empty, or if
    /// the claimed job's resource has since been deleted (the job is
    /// failed out rather than retried, since there is nothing left to
    /// process).
    pub async fn claim_next_queued(
        db: &SurrealDbClient,
    ) -> Result<Option<(IngestionJob, Resource)>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM ingestion_job WHERE state = 'queued' ORDER BY created_at LIMIT 1")
            .await?;
        let candidates: Vec<IngestionJob> = response.take(0)?;
        let Some(mut job) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let Some(resource) = db.get_item::<Resource>(&job.resource_id).await? else {
            job.mark_failed(
                &AppError::Fatal("claimed job's resource no longer exists".into()),
                0,
            );
            job.upsert(db).await?;
            return Ok(None);
        };

        job.mark_processing();
        let job = job.upsert(db).await?;
        Ok(Some((job, resource)))
    }

    pub async fn latest_for_resource(
        db: &SurrealDbClient,
        resource_id: &str,
    ) -> Result<Option<IngestionJob>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM ingestion_job WHERE resource_id = $id \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("id", resource_id.to_string()))
            .await?;
        let jobs: Vec<IngestionJob> = response.take(0)?;
        Ok(jobs.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_failure_under_max_attempts_is_requeued() {
        let mut job = IngestionJob::new("r1".into());
        for _ in 0..2 {
            job.mark_processing();
            job.mark_failed(&AppError::Transient("timeout".into()), 3);
            assert_eq!(job.state, JobState::Failed);
        }
    }

    #[test]
    fn failure_at_max_attempts_goes_to_dead_letter() {
        let mut job = IngestionJob::new("r1".into());
        job.attempt_count = 3;
        job.mark_failed(&AppError::Transient("timeout".into()), 3);
        assert_eq!(job.state, JobState::DeadLetter);
    }

    #[test]
    fn non_retryable_failure_goes_to_dead_letter_immediately() {
        let mut job = IngestionJob::new("r1".into());
        job.mark_processing();
        job.mark_failed(&AppError::Validation("bad url".into()), 3);
        assert_eq!(job.state, JobState::DeadLetter);
    }

    #[test]
    fn succeeded_clears_last_error() {
        let mut job = IngestionJob::new("r1".into());
        job.mark_processing();
        job.mark_failed(&AppError::Transient("timeout".into()), 3);
        job.mark_processing();
        job.mark_succeeded();
        assert!(job.last_error.is_none());
        assert_eq!(job.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn claim_next_queued_marks_oldest_job_processing() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");

        let resource = Resource::new("https://example.com".into(), "fp".into(), "article".into());
        let resource_id = resource.id.clone();
        resource.store(&db).await.expect("failed to store resource");

        let job = IngestionJob::new(resource_id.clone());
        job.upsert(&db).await.expect("failed to store job");

        let (claimed_job, claimed_resource) = IngestionJob::claim_next_queued(&db)
            .await
            .expect("claim failed")
            .expect("expected a queued job");

        assert_eq!(claimed_job.state, JobState::Processing);
        assert_eq!(claimed_job.attempt_count, 1);
        assert_eq!(claimed_resource.id, resource_id);

        assert!(IngestionJob::claim_next_queued(&db)
            .await
            .expect("claim failed")
            .is_none());
    }

    #[tokio::test]
    async fn claim_next_queued_fails_job_when_resource_missing() {
        let db = SurrealDbClient::memory("test_ns", &uuid::Uuid::new_v4().to_string())
            .await
            .expect("failed to start in-memory surrealdb");

        let job = IngestionJob::new("missing-resource".into());
        job.upsert(&db).await.expect("failed to store job");

        let claimed = IngestionJob::claim_next_queued(&db)
            .await
            .expect("claim failed");
        assert!(claimed.is_none());

        let job = IngestionJob::latest_for_resource(&db, "missing-resource")
            .await
            .expect("lookup failed")
            .expect("job should still exist");
        assert_eq!(job.state, JobState::DeadLetter);
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    storage::db::SurrealDbClient,
    stored_object,
};

/// Job/resource lifecycle state. Pending and Processing are
/// transient; Completed and Failed are terminal for a given attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// The five quality dimensions, each constrained to `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QualityDimensions {
    pub accuracy: f32,
    pub completeness: f32,
    pub consistency: f32,
    pub timeliness: f32,
    pub relevance: f32,
}

impl QualityDimensions {
    pub fn as_array(&self) -> [f32; 5] {
        [
            self.accuracy,
            self.completeness,
            self.consistency,
            self.timeliness,
            self.relevance,
        ]
    }

    /// `quality_overall = Σ wᵢ dᵢ`, accurate to within `1e-6`.
    pub fn weighted_mean(&self, weights: &[f32; 5]) -> f32 {
        self.as_array()
            .iter()
            .zip(weights.iter())
            .map(|(d, w)| d * w)
            .sum()
    }
}

impl Default for QualityDimensions {
    fn default() -> Self {
        Self {
            accuracy: 0.0,
            completeness: 0.0,
            consistency: 0.0,
            timeliness: 0.0,
            relevance: 0.0,
        }
    }
}

/// A learned-sparse embedding plus the model that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SparseEmbedding {
    pub weights: HashMap<u32, f32>,
    pub model: String,
    pub updated_at: DateTime<Utc>,
}

const CURRENT_QUALITY_COMPUTATION_VERSION: u32 = 1;

stored_object!(Resource, "resource", {
    source_url: String,
    title: String,
    description: Option<String>,
    creator: Option<String>,
    publisher: Option<String>,
    language: Option<String>,
    resource_type: String,
    subjects: Vec<String>,
    classification_code: Option<String>,
    quality_overall: f32,
    quality_dimensions: QualityDimensions,
    quality_last_computed: Option<DateTime<Utc>>,
    quality_computation_version: u32,
    ingestion_status: IngestionStatus,
    embedding: Option<Vec<f32>>,
    sparse_embedding: Option<SparseEmbedding>,
    archive_path: Option<String>,
    content_fingerprint: String,
    needs_review: bool
});

impl Resource {
    pub fn new(source_url: String, content_fingerprint: String, resource_type: String) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_url,
            title: String::new(),
            description: None,
            creator: None,
            publisher: None,
            language: None,
            resource_type,
            subjects: Vec::new(),
            classification_code: None,
            quality_overall: 0.0,
            quality_dimensions: QualityDimensions::default(),
            quality_last_computed: None,
            quality_computation_version: CURRENT_QUALITY_COMPUTATION_VERSION,
            ingestion_status: IngestionStatus::Pending,
            embedding: None,
            sparse_embedding: None,
            archive_path: None,
            content_fingerprint,
            needs_review: false,
        }
    }

    /// `completed ⇒ archive_path non-null`.
    pub fn check_completed_invariant(&self) -> Result<(), AppError> {
        if matches!(self.ingestion_status, IngestionStatus::Completed) && self.archive_path.is_none()
        {
            return Err(AppError::Fatal(
                "completed resource must have a non-null archive_path".into(),
            ));
        }
        Ok(())
    }

    /// Recomputes `quality_overall` from `quality_dimensions` and stamps
    /// `quality_last_computed`/`quality_computation_version`.
    pub fn recompute_quality(&mut self, weights: &[f32; 5]) {
        self.quality_overall = self.quality_dimensions.weighted_mean(weights);
        self.quality_last_computed = Some(Utc::now());
        self.quality_computation_version = CURRENT_QUALITY_COMPUTATION_VERSION;
        self.needs_review = false;
    }

    /// Degrades quality scoring to null dimensions and flags the resource
    /// for manual review when quality computation cannot run cleanly.
    pub fn mark_quality_needs_review(&mut self) {
        self.quality_dimensions = QualityDimensions::default();
        self.quality_overall = 0.0;
        self.quality_last_computed = None;
        self.needs_review = true;
    }

    /// Finds an existing resource whose fingerprint matches and whose
    /// ingestion is processing or completed, used for ingestion dedup.
    pub async fn find_by_fingerprint(
        db: &SurrealDbClient,
        content_fingerprint: &str,
    ) -> Result<Option<Resource>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM resource WHERE content_fingerprint = $fp \
                 AND ingestion_status IN ['processing', 'completed'] LIMIT 1",
            )
            .bind(("fp", content_fingerprint.to_string()))
            .await?;
        let resources: Vec<Resource> = response.take(0)?;
        Ok(resources.into_iter().next())
    }

    /// Finds an existing resource by normalized source URL, used to make
    /// resource creation idempotent ("200 + existing id" on a repeat URL).
    pub async fn find_by_source_url(
        db: &SurrealDbClient,
        source_url: &str,
    ) -> Result<Option<Resource>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM resource WHERE source_url = $url LIMIT 1")
            .bind(("url", source_url.to_string()))
            .await?;
        let resources: Vec<Resource> = response.take(0)?;
        Ok(resources.into_iter().next())
    }

    /// Upserts the resource row as a single atomic write.
    pub async fn store(self, db: &SurrealDbClient) -> Result<Resource, AppError> {
        self.check_completed_invariant()?;
        let stored: Option<Resource> = db
            .client
            .upsert((Self::table_name(), self.id.clone()))
            .content(self)
            .await?;
        stored.ok_or_else(|| AppError::InternalError("resource upsert returned no row".into()))
    }

    /// Cascade delete: removes citations where this resource is the
    /// source, nulls citations where it is the target, removes membership
    /// rows, removes annotations, then the resource itself, so a deleted
    /// resource leaves no citation/annotation/collection-membership rows
    /// behind.
    pub async fn delete_cascade(db: &SurrealDbClient, id: &str) -> Result<(), AppError> {
        db.client
            .query(
                "BEGIN TRANSACTION;
                 DELETE citation WHERE source_resource_id = $id;
                 UPDATE citation SET target_resource_id = NONE WHERE target_resource_id = $id;
                 DELETE collection_resource WHERE resource_id = $id;
                 DELETE annotation WHERE resource_id = $id;
                 DELETE type::thing('resource', $id);
                 COMMIT TRANSACTION;",
            )
            .bind(("id", id.to_string()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_mean_matches_default_equal_weights() {
        let dims = QualityDimensions {
            accuracy: 1.0,
            completeness: 0.5,
            consistency: 0.5,
            timeliness: 0.0,
            relevance: 1.0,
        };
        let weights = [0.2, 0.2, 0.2, 0.2, 0.2];
        let overall = dims.weighted_mean(&weights);
        assert!((overall - 0.6).abs() < 1e-6);
    }

    #[test]
    fn completed_without_archive_path_violates_invariant() {
        let mut resource = Resource::new("https://example.com".into(), "fp".into(), "article".into());
        resource.ingestion_status = IngestionStatus::Completed;
        assert!(resource.check_completed_invariant().is_err());
        resource.archive_path = Some("cas/ab/cd".into());
        assert!(resource.check_completed_invariant().is_ok());
    }
}

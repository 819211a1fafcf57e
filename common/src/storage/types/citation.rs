use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CitationType {
    Reference,
    Dataset,
    Code,
    #[default]
    General,
}

/// A directed citation edge: `source_resource_id` cites `target_url`,
/// resolved to `target_resource_id` when the target is itself a known
/// resource. Cascades with its source, set-null on target delete.
stored_object!(Citation, "citation", {
    source_resource_id: String,
    target_resource_id: Option<String>,
    target_url: String,
    citation_type: CitationType,
    context: Option<String>,
    position: Option<u32>,
    importance_score: Option<f32>
});

impl Citation {
    pub fn new(
        source_resource_id: String,
        target_url: String,
        citation_type: CitationType,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source_resource_id,
            target_resource_id: None,
            target_url,
            citation_type,
            context: None,
            position: None,
            importance_score: None,
        }
    }

    pub async fn upsert(self, db: &SurrealDbClient) -> Result<Citation, AppError> {
        let stored: Option<Citation> = db
            .client
            .upsert(("citation", self.id.clone()))
            .content(self)
            .await?;
        stored.ok_or_else(|| AppError::InternalError("citation upsert returned no row".into()))
    }

    /// Lists citations where `resource_id` is the source ("outgoing") or
    /// the target ("incoming").
    pub async fn list_by_direction(
        db: &SurrealDbClient,
        resource_id: &str,
        outgoing: bool,
    ) -> Result<Vec<Citation>, AppError> {
        let query = if outgoing {
            "SELECT * FROM citation WHERE source_resource_id = $id"
        } else {
            "SELECT * FROM citation WHERE target_resource_id = $id"
        };
        let mut response = db
            .client
            .query(query)
            .bind(("id", resource_id.to_string()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Resolves a citation's `target_url` against known resources by
    /// normalized URL, linking `target_resource_id` when found.
    pub async fn resolve_target(&mut self, db: &SurrealDbClient) -> Result<(), AppError> {
        if let Some(resource) =
            super::resource::Resource::find_by_source_url(db, &self.target_url).await?
        {
            self.target_resource_id = Some(resource.id);
        }
        Ok(())
    }
}

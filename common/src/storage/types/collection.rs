use serde::{Deserialize, Serialize};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionVisibility {
    Private,
    Shared,
    Public,
}

/// A named grouping of resources, optionally nested under a parent
/// collection (the parent links form a forest, never a cycle).
/// `embedding` is the mean of member resource embeddings, recomputed
/// lazily on membership change.
stored_object!(Collection, "collection", {
    name: String,
    description: Option<String>,
    owner_id: String,
    visibility: CollectionVisibility,
    parent_id: Option<String>,
    embedding: Option<Vec<f32>>
});

impl Collection {
    pub fn new(name: String, owner_id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            name,
            description: None,
            owner_id,
            visibility: CollectionVisibility::Private,
            parent_id: None,
            embedding: None,
        }
    }

    /// Rejects a `parent_id` that would create a cycle by walking the
    /// ancestor chain up to the root.
    pub async fn check_acyclic(
        db: &SurrealDbClient,
        id: &str,
        candidate_parent_id: &str,
    ) -> Result<(), AppError> {
        if id == candidate_parent_id {
            return Err(AppError::Conflict(
                "a collection cannot be its own parent".into(),
            ));
        }
        let mut cursor = Some(candidate_parent_id.to_string());
        while let Some(current) = cursor {
            if current == id {
                return Err(AppError::Conflict(
                    "parent assignment would create a collection cycle".into(),
                ));
            }
            let mut response = db
                .client
                .query("SELECT parent_id FROM type::thing('collection', $id)")
                .bind(("id", current))
                .await?;
            let rows: Vec<ParentIdRow> = response.take(0)?;
            cursor = rows.into_iter().next().and_then(|row| row.parent_id);
        }
        Ok(())
    }

    pub async fn upsert(self, db: &SurrealDbClient) -> Result<Collection, AppError> {
        let stored: Option<Collection> = db
            .client
            .upsert(("collection", self.id.clone()))
            .content(self)
            .await?;
        stored.ok_or_else(|| AppError::InternalError("collection upsert returned no row".into()))
    }

    /// Recomputes `embedding` as the componentwise mean of member resource
    /// embeddings, ignoring members with no embedding yet.
    pub fn mean_embedding(member_embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
        let dim = member_embeddings.first()?.len();
        let mut sum = vec![0.0f32; dim];
        let mut count = 0usize;
        for embedding in member_embeddings {
            if embedding.len() != dim {
                continue;
            }
            for (acc, value) in sum.iter_mut().zip(embedding.iter()) {
                *acc += value;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        for value in &mut sum {
            *value /= count as f32;
        }
        Some(sum)
    }
}

#[derive(Debug, Deserialize)]
struct ParentIdRow {
    parent_id: Option<String>,
}

/// Membership row in the `resource_id`/`collection_id` join table.
stored_object!(CollectionResource, "collection_resource", {
    collection_id: String,
    resource_id: String
});

impl CollectionResource {
    pub fn new(collection_id: String, resource_id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            collection_id,
            resource_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_embedding_averages_componentwise() {
        let embeddings = vec![vec![1.0, 1.0], vec![3.0, 5.0]];
        let mean = Collection::mean_embedding(&embeddings).unwrap();
        assert_eq!(mean, vec![2.0, 3.0]);
    }

    #[test]
    fn mean_embedding_empty_is_none() {
        assert!(Collection::mean_embedding(&[]).is_none());
    }
}

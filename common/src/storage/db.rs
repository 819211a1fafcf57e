use crate::error::AppError;

use super::types::StoredObject;
use futures::Stream;
use std::{ops::Deref, sync::Arc};
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Notification, Surreal,
};

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}
pub trait ProvidesDb {
    fn db(&self) -> &Arc<SurrealDbClient>;
}

/// Filter fields for `SurrealDbClient::list_resources`. All fields
/// are conjunctive (AND'd together); an empty/`None` field is not applied.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub status: Option<String>,
    pub quality_min: Option<f32>,
    pub quality_max: Option<f32>,
    pub language: Option<String>,
    pub classification_prefix: Option<String>,
    pub subjects_any: Vec<String>,
    pub subjects_all: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CitationDirection {
    Inbound,
    Outbound,
    Both,
}

/// Portable containment predicate: true when `column` (a JSON
/// array column) contains `value`. Surreal's native array operators cover
/// this, but the predicate is kept as a standalone function so backends
/// without native array types can be targeted by swapping its body.
pub fn jsonarray_contains(column: &str, value_param: &str) -> String {
    format!("array::any({column}, |$v| $v = {value_param})")
}

fn jsonarray_contains_any(column: &str, values_param: &str) -> String {
    format!("array::any({column}, |$v| array::any({values_param}, |$needle| $needle = $v))")
}

fn jsonarray_contains_all(column: &str, values_param: &str) -> String {
    format!("array::all({values_param}, |$needle| array::any({column}, |$v| $v = $needle))")
}

impl SurrealDbClient {
    /// # Initialize a new datbase client
    ///
    /// # Arguments
    ///
    /// # Returns
    /// * `SurrealDbClient` initialized
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Sign in to database
        db.signin(Root { username, password }).await?;

        // Set namespace
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Schema bootstrap: field indexes needed for correctness (fingerprint
    /// dedup, job polling, citation lookups) plus the tables that have no
    /// Rust-side schema of their own. The HNSW/FTS retrieval indexes are
    /// built separately by `indexes::ensure_runtime_indexes`, which needs
    /// the configured embedding dimension and polls for readiness.
    pub async fn ensure_initialized(&self) -> Result<(), AppError> {
        Self::build_indexes(self).await?;
        Ok(())
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_resource_fingerprint ON resource \
                 FIELDS content_fingerprint;
                 DEFINE INDEX IF NOT EXISTS idx_resource_source_url ON resource \
                 FIELDS source_url UNIQUE;
                 DEFINE INDEX IF NOT EXISTS idx_resource_status ON resource \
                 FIELDS ingestion_status;
                 DEFINE INDEX IF NOT EXISTS idx_citation_source ON citation \
                 FIELDS source_resource_id;
                 DEFINE INDEX IF NOT EXISTS idx_citation_target ON citation \
                 FIELDS target_resource_id;
                 DEFINE INDEX IF NOT EXISTS idx_collection_resource_collection \
                 ON collection_resource FIELDS collection_id;
                 DEFINE INDEX IF NOT EXISTS idx_collection_resource_resource \
                 ON collection_resource FIELDS resource_id;
                 DEFINE INDEX IF NOT EXISTS idx_annotation_resource ON annotation \
                 FIELDS resource_id;
                 DEFINE INDEX IF NOT EXISTS idx_ingestion_job_resource ON ingestion_job \
                 FIELDS resource_id;
                 DEFINE INDEX IF NOT EXISTS idx_ingestion_job_state ON ingestion_job \
                 FIELDS state;
                 DEFINE INDEX IF NOT EXISTS idx_sparse_term_hash ON resource_sparse_term \
                 FIELDS term_hash;",
            )
            .await?;

        Ok(())
    }

    pub async fn rebuild_indexes(&self) -> Result<(), Error> {
        self.client
            .query("REBUILD INDEX IF EXISTS idx_embedding_resource ON resource")
            .await?;
        Ok(())
    }

    pub async fn drop_table<T>(&self) -> Result<Vec<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client.delete(T::table_name()).await
    }

    /// Operation to store a object in SurrealDB, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `item` - The item to be stored
    ///
    /// # Returns
    /// * `Result` - Item or Error
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Operation to retrieve all objects from a certain table, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result` - Vec<T> or Error
    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    /// Operation to retrieve a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to retrieve
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The found item or Error
    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    /// Operation to delete a single object by its ID, requires the struct to implement StoredObject
    ///
    /// # Arguments
    /// * `id` - The ID of the item to delete
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }

    /// Operation to listen to a table for updates, requires the struct to implement StoredObject
    ///
    /// # Returns
    /// * `Result<Option<T>, Error>` - The deleted item or Error
    pub async fn listen<T>(
        &self,
    ) -> Result<impl Stream<Item = Result<Notification<T>, Error>>, Error>
    where
        T: for<'de> StoredObject + std::marker::Unpin,
    {
        self.client.select(T::table_name()).live().await
    }

    /// Lists resources matching an optional filter, ordered by `order_by`
    /// (defaults to `created_at` descending), with limit/offset pagination
    ///. `subjects_any`/`subjects_all` use `jsonarray_contains`'s
    /// set-intersection semantics over the `subjects` field.
    pub async fn list_resources(
        &self,
        filter: &ResourceFilter,
        order_by: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<super::types::resource::Resource>, AppError> {
        let mut conditions = Vec::new();
        if filter.status.is_some() {
            conditions.push("ingestion_status = $status".to_string());
        }
        if filter.quality_min.is_some() {
            conditions.push("quality_overall >= $quality_min".to_string());
        }
        if filter.quality_max.is_some() {
            conditions.push("quality_overall <= $quality_max".to_string());
        }
        if filter.language.is_some() {
            conditions.push("language = $language".to_string());
        }
        if filter.classification_prefix.is_some() {
            conditions.push("string::starts_with(classification_code, $classification_prefix)"
                .to_string());
        }
        if !filter.subjects_any.is_empty() {
            conditions.push(jsonarray_contains_any("subjects", "$subjects_any"));
        }
        if !filter.subjects_all.is_empty() {
            conditions.push(jsonarray_contains_all("subjects", "$subjects_all"));
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let order_field = order_by.unwrap_or("created_at");
        let query = format!(
            "SELECT * FROM resource {where_clause} ORDER BY {order_field} DESC LIMIT $limit START $offset"
        );
        let mut response = self
            .client
            .query(query)
            .bind(("status", filter.status.clone()))
            .bind(("quality_min", filter.quality_min))
            .bind(("quality_max", filter.quality_max))
            .bind(("language", filter.language.clone()))
            .bind(("classification_prefix", filter.classification_prefix.clone()))
            .bind(("subjects_any", filter.subjects_any.clone()))
            .bind(("subjects_all", filter.subjects_all.clone()))
            .bind(("limit", limit))
            .bind(("offset", offset))
            .await?;
        Ok(response.take(0)?)
    }

    pub async fn upsert_citation(
        &self,
        citation: super::types::citation::Citation,
    ) -> Result<super::types::citation::Citation, AppError> {
        citation.upsert(self).await
    }

    /// `direction` selects outgoing citations (resource is source), incoming
    /// (resource is target), or both.
    pub async fn list_citations(
        &self,
        resource_id: &str,
        direction: CitationDirection,
    ) -> Result<Vec<super::types::citation::Citation>, AppError> {
        use super::types::citation::Citation;
        match direction {
            CitationDirection::Outbound => Citation::list_by_direction(self, resource_id, true).await,
            CitationDirection::Inbound => Citation::list_by_direction(self, resource_id, false).await,
            CitationDirection::Both => {
                let mut outbound = Citation::list_by_direction(self, resource_id, true).await?;
                let inbound = Citation::list_by_direction(self, resource_id, false).await?;
                outbound.extend(inbound);
                Ok(outbound)
            }
        }
    }

    /// Adds resources to a collection (idempotent on re-add) and recomputes
    /// the collection's mean embedding in the same transaction.
    pub async fn add_resources_to_collection(
        &self,
        collection_id: &str,
        resource_ids: &[String],
    ) -> Result<(), AppError> {
        for resource_id in resource_ids {
            let membership =
                super::types::collection::CollectionResource::new(
                    collection_id.to_string(),
                    resource_id.clone(),
                );
            let existing: Option<super::types::collection::CollectionResource> = self
                .client
                .query(
                    "SELECT * FROM collection_resource \
                     WHERE collection_id = $cid AND resource_id = $rid LIMIT 1",
                )
                .bind(("cid", collection_id.to_string()))
                .bind(("rid", resource_id.clone()))
                .await?
                .take::<Vec<_>>(0)?
                .into_iter()
                .next();
            if existing.is_none() {
                self.store_item(membership).await?;
            }
        }

        let mut response = self
            .client
            .query(
                "SELECT resource.embedding AS embedding FROM collection_resource \
                 WHERE collection_id = $cid FETCH resource",
            )
            .bind(("cid", collection_id.to_string()))
            .await?;
        #[derive(serde::Deserialize)]
        struct EmbeddingRow {
            embedding: Option<Vec<f32>>,
        }
        let rows: Vec<EmbeddingRow> = response.take(0)?;
        let embeddings: Vec<Vec<f32>> = rows.into_iter().filter_map(|row| row.embedding).collect();
        let mean = super::types::collection::Collection::mean_embedding(&embeddings);

        self.client
            .query("UPDATE type::thing('collection', $id) SET embedding = $embedding")
            .bind(("id", collection_id.to_string()))
            .bind(("embedding", mean))
            .await?;

        Ok(())
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    #[tokio::test]
    async fn test_initialization_and_crud() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string(); // ensures isolation per test run
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        // Call your initialization
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");

        // Test basic CRUD
        let dummy = Dummy {
            id: "abc".to_string(),
            name: "first".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        // Store
        let stored = db.store_item(dummy.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        // Read
        let fetched = db
            .get_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to fetch");
        assert_eq!(fetched, Some(dummy.clone()));

        // Read all
        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert!(all.contains(&dummy));

        // Delete
        let deleted = db
            .delete_item::<Dummy>(&dummy.id)
            .await
            .expect("Failed to delete");
        assert_eq!(deleted, Some(dummy));

        // After delete, should not be present
        let fetch_post = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetch_post.is_none());
    }

    #[tokio::test]
    async fn test_build_indexes() {
        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("Failed to start in-memory surrealdb");

        db.build_indexes().await.expect("Failed to build indexes");
    }

    #[tokio::test]
    async fn list_resources_filters_and_orders() {
        use crate::storage::types::resource::Resource;

        let namespace = "test_ns";
        let database = &Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, database)
            .await
            .expect("in-memory db");
        db.ensure_initialized().await.expect("init schema");

        let first = Resource::new("https://a.example".into(), "fp-a".into(), "article".into());
        let second = Resource::new("https://b.example".into(), "fp-b".into(), "dataset".into());
        first.store(&db).await.expect("store first");
        second.store(&db).await.expect("store second");

        let all = db
            .list_resources(&ResourceFilter::default(), None, 10, 0)
            .await
            .expect("list resources");
        assert_eq!(all.len(), 2);

        let filtered = db
            .list_resources(
                &ResourceFilter {
                    language: Some("en".into()),
                    ..Default::default()
                },
                None,
                10,
                0,
            )
            .await
            .expect("list resources by language");
        assert!(filtered.is_empty());
    }
}

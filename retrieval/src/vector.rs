use serde::Deserialize;
use tracing::debug;

use common::{error::AppError, storage::db::SurrealDbClient};

use crate::scoring::{deserialize_flexible_id, RankedHit};

#[derive(Debug, Deserialize)]
struct VectorScoreRow {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    id: String,
    score: f32,
}

/// Dense retriever. Runs approximate
/// nearest-neighbor search over `resource.embedding` via the HNSW index,
/// then drops any candidate whose cosine similarity is below
/// `min_similarity`. The floor is enforced in application code, not SQL,
/// because `<|k,ef|>` returns an approximate candidate set that can include
/// scores under the floor.
pub async fn search_semantic(
    db: &SurrealDbClient,
    query_embedding: &[f32],
    take: usize,
    min_similarity: f32,
    allowed_ids: Option<&[String]>,
) -> Result<Vec<RankedHit>, AppError> {
    if query_embedding.is_empty() {
        return Ok(Vec::new());
    }

    // Over-fetch past `take` so the post-hoc similarity floor and id filter
    // don't starve the result set below the caller's requested size.
    let ef = (take * 4).max(100);
    let filter_clause = if allowed_ids.is_some() {
        "WHERE embedding <|$take,$ef|> $embedding AND id IN $allowed"
    } else {
        "WHERE embedding <|$take,$ef|> $embedding"
    };

    let sql = format!(
        "SELECT id, vector::similarity::cosine(embedding, $embedding) AS score \
         FROM resource \
         {filter_clause} \
         ORDER BY score DESC \
         LIMIT $limit",
    );

    debug!(take, ef, min_similarity, "executing semantic search");

    let mut request = db
        .query(sql)
        .bind(("embedding", query_embedding.to_vec()))
        .bind(("take", take as i64))
        .bind(("ef", ef as i64))
        .bind(("limit", take as i64));
    if let Some(ids) = allowed_ids {
        request = request.bind(("allowed", ids.to_vec()));
    }

    let rows: Vec<VectorScoreRow> = request.await?.take(0)?;

    Ok(rows
        .into_iter()
        .filter(|row| row.score >= min_similarity)
        .enumerate()
        .map(|(i, row)| RankedHit {
            resource_id: row.id,
            rank: u32::try_from(i + 1).unwrap_or(u32::MAX),
            raw_score: row.score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use common::storage::types::resource::Resource;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "vector_test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("failed to create in-memory surreal");
        db.ensure_initialized().await.expect("init schema");
        ensure_runtime_indexes(&db, 3).await.expect("build indexes");
        db
    }

    #[tokio::test]
    async fn returns_nearest_neighbor_first() {
        let db = memory_db().await;

        let mut close = Resource::new("https://close.example".into(), "fp_close".into(), "article".into());
        close.embedding = Some(vec![1.0, 0.0, 0.0]);
        let close = close.store(&db).await.expect("store close");

        let mut far = Resource::new("https://far.example".into(), "fp_far".into(), "article".into());
        far.embedding = Some(vec![0.0, 1.0, 0.0]);
        far.store(&db).await.expect("store far");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let hits = search_semantic(&db, &[0.9, 0.1, 0.0], 10, 0.0, None)
            .await
            .expect("search");
        assert!(!hits.is_empty());
        assert_eq!(hits[0].resource_id, close.id);
    }

    #[tokio::test]
    async fn similarity_floor_drops_distant_candidates() {
        let db = memory_db().await;

        let mut close = Resource::new("https://close.example".into(), "fp_close".into(), "article".into());
        close.embedding = Some(vec![1.0, 0.0, 0.0]);
        close.store(&db).await.expect("store close");

        let mut orthogonal = Resource::new("https://far.example".into(), "fp_far".into(), "article".into());
        orthogonal.embedding = Some(vec![0.0, 1.0, 0.0]);
        orthogonal.store(&db).await.expect("store orthogonal");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let hits = search_semantic(&db, &[1.0, 0.0, 0.0], 10, 0.85, None)
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn empty_query_embedding_returns_no_hits() {
        let db = memory_db().await;
        let hits = search_semantic(&db, &[], 10, 0.0, None).await.expect("search");
        assert!(hits.is_empty());
    }
}

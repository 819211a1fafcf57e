use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use common::{error::AppError, storage::db::SurrealDbClient, utils::embedding::generate_sparse_embedding};

use crate::scoring::{min_max_normalize, RankedHit};

#[derive(Debug, Deserialize)]
struct SparsePostingRow {
    resource_id: String,
    term_hash: u32,
    weight: f32,
}

/// Sparse retriever. Extracts the query's
/// own sparse weights with the same lexical hashing scheme the ingestion
/// pipeline uses to index resources, fetches every posting row whose
/// `term_hash` appears in the query, and scores each resource by the inner
/// product of query weight × stored weight.
pub async fn search_sparse(
    db: &SurrealDbClient,
    query: &str,
    take: usize,
    allowed_ids: Option<&[String]>,
) -> Result<Vec<RankedHit>, AppError> {
    let query_weights = generate_sparse_embedding(query);
    if query_weights.is_empty() {
        return Ok(Vec::new());
    }

    let term_hashes: Vec<u32> = query_weights.keys().copied().collect();

    let filter_clause = if allowed_ids.is_some() {
        "WHERE term_hash IN $hashes AND resource_id IN $allowed"
    } else {
        "WHERE term_hash IN $hashes"
    };

    let sql = format!("SELECT resource_id, term_hash, weight FROM resource_sparse_term {filter_clause}");

    debug!(terms = term_hashes.len(), "executing sparse search");

    let mut request = db.query(sql).bind(("hashes", term_hashes));
    if let Some(ids) = allowed_ids {
        request = request.bind(("allowed", ids.to_vec()));
    }

    let rows: Vec<SparsePostingRow> = request.await?.take(0)?;

    let mut scores: HashMap<String, f32> = HashMap::new();
    for row in rows {
        if let Some(query_weight) = query_weights.get(&row.term_hash) {
            *scores.entry(row.resource_id).or_insert(0.0) += query_weight * row.weight;
        }
    }

    let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(take);

    let raw_scores: Vec<f32> = ranked.iter().map(|(_, score)| *score).collect();
    let normalized = min_max_normalize(&raw_scores);

    Ok(ranked
        .into_iter()
        .zip(normalized)
        .enumerate()
        .map(|(i, ((resource_id, _), normalized_score))| RankedHit {
            resource_id,
            rank: u32::try_from(i + 1).unwrap_or(u32::MAX),
            raw_score: normalized_score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "sparse_test_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("failed to create in-memory surreal");
        db.ensure_initialized().await.expect("init schema");
        db
    }

    async fn store_terms(db: &SurrealDbClient, resource_id: &str, weights: &HashMap<u32, f32>) {
        for (&term_hash, &weight) in weights {
            db.query("CREATE resource_sparse_term CONTENT {resource_id: $resource_id, term_hash: $term_hash, weight: $weight}")
                .bind(("resource_id", resource_id.to_string()))
                .bind(("term_hash", term_hash))
                .bind(("weight", weight))
                .await
                .expect("insert posting");
        }
    }

    #[tokio::test]
    async fn ranks_by_inner_product() {
        let db = memory_db().await;
        let query_weights = generate_sparse_embedding("distributed systems consensus");

        store_terms(&db, "res_exact", &query_weights).await;

        let mut partial = query_weights.clone();
        partial.retain(|k, _| Some(k) == query_weights.keys().next());
        store_terms(&db, "res_partial", &partial).await;

        let hits = search_sparse(&db, "distributed systems consensus", 10, None)
            .await
            .expect("search");

        assert!(!hits.is_empty());
        assert_eq!(hits[0].resource_id, "res_exact");
    }

    #[tokio::test]
    async fn empty_query_returns_no_hits() {
        let db = memory_db().await;
        let hits = search_sparse(&db, "", 10, None).await.expect("search");
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn allowed_ids_restricts_results() {
        let db = memory_db().await;
        let query_weights = generate_sparse_embedding("graph neural networks");
        store_terms(&db, "res_a", &query_weights).await;
        store_terms(&db, "res_b", &query_weights).await;

        let hits = search_sparse(&db, "graph neural networks", 10, Some(&["res_a".to_string()]))
            .await
            .expect("search");

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].resource_id, "res_a");
    }
}

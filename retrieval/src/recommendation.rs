use common::{error::AppError, storage::db::SurrealDbClient};

use crate::{
    graph::{discover_neighbors, GraphWeights},
    scoring::min_max_normalize,
    vector::search_semantic,
};

/// A recommended resource and the signals that produced it.
#[derive(Debug, Clone)]
pub struct Recommendation {
    pub resource_id: String,
    pub vector_similarity: f32,
    pub graph_score: f32,
    pub combined: f32,
}

/// Composes dense similarity and the hybrid graph score into a single
/// "more like this" ranking, built on the same neighbor discovery the
/// graph endpoint uses rather than a separate codepath. Each signal is
/// min-max normalized within this call's candidate set before combining,
/// matching the normalize-then-fuse shape the three retrievers use.
pub async fn recommend_similar(
    db: &SurrealDbClient,
    resource_id: &str,
    query_embedding: &[f32],
    limit: usize,
    graph_weights: GraphWeights,
) -> Result<Vec<Recommendation>, AppError> {
    let neighbors = discover_neighbors(db, resource_id, limit.max(50), graph_weights).await?;
    if neighbors.is_empty() {
        return Ok(Vec::new());
    }

    let vector_hits = search_semantic(db, query_embedding, limit.max(50), 0.0, None).await?;
    let vector_similarity: std::collections::HashMap<String, f32> = vector_hits
        .into_iter()
        .map(|hit| (hit.resource_id, hit.raw_score))
        .collect();

    let graph_scores: Vec<f32> = neighbors.iter().map(|(_, score)| *score).collect();
    let normalized_graph = min_max_normalize(&graph_scores);

    let mut recommendations: Vec<Recommendation> = neighbors
        .into_iter()
        .zip(normalized_graph)
        .map(|((resource, raw_graph_score), normalized_graph_score)| {
            let vector_similarity = vector_similarity.get(&resource.id).copied().unwrap_or(0.0);
            Recommendation {
                resource_id: resource.id,
                vector_similarity,
                graph_score: raw_graph_score,
                combined: 0.5 * vector_similarity + 0.5 * normalized_graph_score,
            }
        })
        .collect();

    recommendations.sort_by(|a, b| b.combined.partial_cmp(&a.combined).unwrap_or(std::cmp::Ordering::Equal));
    recommendations.truncate(limit);

    Ok(recommendations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use common::storage::types::resource::Resource;
    use uuid::Uuid;

    fn weights() -> GraphWeights {
        GraphWeights {
            w_v: 0.6,
            w_t: 0.3,
            w_c: 0.1,
            vector_floor: 0.85,
        }
    }

    #[tokio::test]
    async fn combines_vector_and_graph_signals() {
        let namespace = "recommend_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database).await.expect("memory db");
        db.ensure_initialized().await.expect("init schema");
        ensure_runtime_indexes(&db, 2).await.expect("build indexes");

        let mut subject = Resource::new("https://subject.example".into(), "fp_subject".into(), "article".into());
        subject.embedding = Some(vec![1.0, 0.0]);
        let subject = subject.store(&db).await.expect("store subject");

        let mut close = Resource::new("https://close.example".into(), "fp_close".into(), "article".into());
        close.embedding = Some(vec![0.95, (1.0 - 0.95_f32 * 0.95).sqrt()]);
        let close = close.store(&db).await.expect("store close");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let recommendations = recommend_similar(&db, &subject.id, &[1.0, 0.0], 5, weights())
            .await
            .expect("recommend");

        assert_eq!(recommendations.len(), 1);
        assert_eq!(recommendations[0].resource_id, close.id);
        assert!(recommendations[0].combined > 0.0);
    }
}

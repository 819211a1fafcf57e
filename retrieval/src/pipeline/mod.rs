mod config;

pub use config::{FacetCounts, RetrievalStrategy, SearchFilters, SearchRequest, SortDirection};

use std::collections::HashMap;

use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    storage::types::{resource::Resource, StoredObject},
    utils::{config::AppConfig, embedding::generate_sparse_embedding},
};
use surrealdb::sql::Thing;
use tracing::{debug, warn};

use crate::{
    fts::search_lexical,
    fusion::{adaptive_weights, merge_ranks, renormalize_weights, rrf_score, RetrieverAvailability},
    reranking::RerankerPool,
    scoring::{sort_candidates, MethodRanks, Scored},
    sparse::search_sparse,
    vector::search_semantic,
};
use std::sync::Arc;

/// Upper bound on how many resources `list_resources` will fetch to build
/// the filtered candidate universe. Large enough for any realistic personal
/// collection; not the `limit`/`offset` the caller asked for.
const FILTER_UNIVERSE_CAP: u32 = 100_000;

/// One fused-and-ranked hit in a `SearchResponse`.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub resource: Resource,
    pub ranks: MethodRanks,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub items: Vec<SearchHit>,
    pub total: usize,
    pub facets: FacetCounts,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            facets: FacetCounts::new(),
        }
    }
}

/// Executes the engine's 7-step retrieval plan:
/// filter → candidate universe; scatter-gather the requested retrievers;
/// RRF-fuse; adaptively weight (or honor an explicit `hybrid_weight`);
/// optionally rerank the head of the fused order; apply a presentation
/// sort override if requested; paginate and facet.
pub async fn run_search(
    db: &SurrealDbClient,
    config: &AppConfig,
    request: &SearchRequest,
    query_embedding: Option<&[f32]>,
    reranker: Option<&Arc<RerankerPool>>,
) -> Result<SearchResponse, AppError> {
    let filtered_universe = if request.filters.is_empty() {
        None
    } else {
        let filter = request.filters.to_resource_filter();
        let candidates = db.list_resources(&filter, None, FILTER_UNIVERSE_CAP, 0).await?;
        if candidates.is_empty() {
            return Ok(SearchResponse::empty());
        }
        Some(candidates)
    };
    let allowed_ids: Option<Vec<String>> = filtered_universe
        .as_ref()
        .map(|resources| resources.iter().map(|r| r.id.clone()).collect());

    let candidate_pool = config.candidate_pool.max(request.limit.saturating_mul(10)).max(200);
    let weights = adaptive_weights(&request.text, request.hybrid_weight, config.default_hybrid_weight);

    let allowed_ref = allowed_ids.as_deref();

    let lexical_result = if request.strategy.runs_lexical() {
        Some(search_lexical(db, &request.text, candidate_pool, allowed_ref).await)
    } else {
        None
    };
    let semantic_result = if request.strategy.runs_semantic() {
        match query_embedding {
            Some(embedding) => Some(
                search_semantic(db, embedding, candidate_pool, config.vector_min_sim_hybrid, allowed_ref).await,
            ),
            None => Some(Ok(Vec::new())),
        }
    } else {
        None
    };
    let sparse_result = if request.strategy.runs_sparse() {
        Some(search_sparse(db, &request.text, candidate_pool, allowed_ref).await)
    } else {
        None
    };

    let mut availability = RetrieverAvailability::default();
    let mut any_attempted = false;
    let mut any_succeeded = false;

    let lexical_hits = match lexical_result {
        Some(Ok(hits)) => {
            any_attempted = true;
            any_succeeded = true;
            availability.lexical = true;
            hits
        }
        Some(Err(err)) => {
            any_attempted = true;
            warn!(error = %err, "lexical retriever failed; proceeding without it");
            Vec::new()
        }
        None => Vec::new(),
    };
    let semantic_hits = match semantic_result {
        Some(Ok(hits)) => {
            any_attempted = true;
            any_succeeded = true;
            availability.semantic = true;
            hits
        }
        Some(Err(err)) => {
            any_attempted = true;
            warn!(error = %err, "semantic retriever failed; proceeding without it");
            Vec::new()
        }
        None => Vec::new(),
    };
    let sparse_hits = match sparse_result {
        Some(Ok(hits)) => {
            any_attempted = true;
            any_succeeded = true;
            availability.sparse = true;
            hits
        }
        Some(Err(err)) => {
            any_attempted = true;
            warn!(error = %err, "sparse retriever failed; proceeding without it");
            Vec::new()
        }
        None => Vec::new(),
    };

    if any_attempted && !any_succeeded {
        return Err(AppError::RetrievalUnavailable(
            "all requested retrievers failed".into(),
        ));
    }

    let weights = renormalize_weights(weights, availability);
    let merged = merge_ranks(&lexical_hits, &semantic_hits, &sparse_hits);

    if merged.is_empty() {
        return Ok(match filtered_universe {
            Some(resources) => filter_only_response(resources, request),
            None => SearchResponse::empty(),
        });
    }

    let resources = fetch_resources(db, merged.keys().cloned().collect()).await?;

    let mut scored: Vec<Scored> = resources
        .into_iter()
        .filter_map(|resource| {
            let ranks = *merged.get(&resource.id)?;
            let fused = rrf_score(&ranks, weights, config.rrf_k);
            let mut item = Scored::new(resource, ranks);
            item.fused = fused;
            Some(item)
        })
        .collect();

    sort_candidates(&mut scored);

    if let Some(pool) = reranker {
        apply_rerank(pool, &request.text, config.rerank_top, &mut scored).await?;
    }

    let facets = compute_facets(&scored);
    let total = scored.len();

    if request.sort_by != "relevance" {
        apply_presentation_sort(&mut scored, &request.sort_by, request.sort_dir);
    }

    let items = scored
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .map(|item| SearchHit {
            ranks: item.ranks,
            fused_score: item.fused,
            rerank_score: item.rerank_score,
            resource: item.item,
        })
        .collect();

    Ok(SearchResponse { items, total, facets })
}

async fn fetch_resources(db: &SurrealDbClient, ids: Vec<String>) -> Result<Vec<Resource>, AppError> {
    let things: Vec<Thing> = ids.iter().map(|id| Thing::from(("resource", id.as_str()))).collect();
    let mut response = db
        .query("SELECT * FROM resource WHERE id IN $things")
        .bind(("things", things))
        .await?;
    Ok(response.take(0)?)
}

/// Reranks the top `rerank_top` candidates with a cross-encoder pass,
/// replacing `fused` for ordering within that prefix only.
async fn apply_rerank(
    pool: &Arc<RerankerPool>,
    query: &str,
    rerank_top: usize,
    scored: &mut [Scored],
) -> Result<(), AppError> {
    let prefix_len = scored.len().min(rerank_top);
    if prefix_len == 0 {
        return Ok(());
    }

    let documents: Vec<String> = scored[..prefix_len]
        .iter()
        .map(|item| format!("{} {}", item.item.title, item.item.description.clone().unwrap_or_default()))
        .collect();

    let lease = pool.checkout().await;
    let results = match lease.rerank(query, documents).await {
        Ok(results) => results,
        Err(err) => {
            warn!(error = %err, "reranker failed; keeping fused order");
            return Ok(());
        }
    };

    for result in results {
        if let Some(item) = scored.get_mut(result.index as usize) {
            item.rerank_score = Some(result.score);
        }
    }

    sort_candidates(&mut scored[..prefix_len]);
    Ok(())
}

fn apply_presentation_sort(scored: &mut [Scored], sort_by: &str, direction: SortDirection) {
    scored.sort_by(|a, b| {
        let ordering = match sort_by {
            "quality_overall" => a.item.quality_overall.partial_cmp(&b.item.quality_overall),
            "updated_at" => Some(a.item.updated_at.cmp(&b.item.updated_at)),
            "created_at" => Some(a.item.created_at.cmp(&b.item.created_at)),
            "title" => Some(a.item.title.cmp(&b.item.title)),
            _ => None,
        }
        .unwrap_or(std::cmp::Ordering::Equal);

        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

/// Builds a response straight from the filtered candidate universe when no
/// retriever produced a hit (an empty query, or every attempted retriever
/// came back empty against the filter). Falls back to `updated_at desc`
/// when the request left `sort_by` at its relevance default, since there
/// is no fused order left to sort by.
fn filter_only_response(resources: Vec<Resource>, request: &SearchRequest) -> SearchResponse {
    let mut scored: Vec<Scored> = resources
        .into_iter()
        .map(|resource| Scored::new(resource, MethodRanks::default()))
        .collect();

    let sort_by = if request.sort_by == "relevance" {
        "updated_at"
    } else {
        request.sort_by.as_str()
    };
    apply_presentation_sort(&mut scored, sort_by, request.sort_dir);

    let facets = compute_facets(&scored);
    let total = scored.len();

    let items = scored
        .into_iter()
        .skip(request.offset)
        .take(request.limit)
        .map(|item| SearchHit {
            ranks: item.ranks,
            fused_score: item.fused,
            rerank_score: item.rerank_score,
            resource: item.item,
        })
        .collect();

    SearchResponse { items, total, facets }
}

fn compute_facets(scored: &[Scored]) -> FacetCounts {
    let mut facets: FacetCounts = HashMap::new();

    for item in scored {
        *facets
            .entry("resource_type".to_string())
            .or_default()
            .entry(item.item.resource_type.clone())
            .or_insert(0) += 1;

        if let Some(language) = &item.item.language {
            *facets
                .entry("language".to_string())
                .or_default()
                .entry(language.clone())
                .or_insert(0) += 1;
        }
    }

    facets
}

/// Derives the sparse query-term weights the sparse retriever would use,
/// exposed for callers that want to short-circuit when a query has no
/// extractable lexical terms (e.g. a stopword-only query).
pub fn query_has_sparse_terms(query: &str) -> bool {
    !generate_sparse_embedding(query).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use uuid::Uuid;

    async fn memory_db() -> SurrealDbClient {
        let namespace = "search_pipeline_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database).await.expect("memory db");
        db.ensure_initialized().await.expect("init schema");
        ensure_runtime_indexes(&db, 3).await.expect("build indexes");
        db
    }

    #[tokio::test]
    async fn empty_text_and_empty_filters_returns_empty() {
        let db = memory_db().await;

        let mut a = Resource::new("https://a.example".into(), "fp_a".into(), "article".into());
        a.title = "first".into();
        a.store(&db).await.expect("store a");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let config = AppConfig::default();
        let request = SearchRequest::new("");

        let response = run_search(&db, &config, &request, None, None).await.expect("search");
        assert!(response.items.is_empty());
    }

    #[tokio::test]
    async fn empty_text_with_filters_falls_back_to_filter_only_sort() {
        let db = memory_db().await;

        let mut older = Resource::new("https://a.example".into(), "fp_a".into(), "article".into());
        older.title = "first".into();
        older.language = Some("en".into());
        older = older.store(&db).await.expect("store a");

        let mut newer = Resource::new("https://b.example".into(), "fp_b".into(), "article".into());
        newer.title = "second".into();
        newer.language = Some("en".into());
        newer = newer.store(&db).await.expect("store b");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let config = AppConfig::default();
        let mut request = SearchRequest::new("");
        request.filters.language = Some("en".into());
        request.sort_by = "created_at".to_string();
        request.sort_dir = SortDirection::Asc;

        let response = run_search(&db, &config, &request, None, None).await.expect("search");
        assert_eq!(response.total, 2);
        let ids: Vec<String> = response.items.iter().map(|hit| hit.resource.id.clone()).collect();
        assert_eq!(ids, vec![older.id, newer.id]);
    }

    #[tokio::test]
    async fn filter_with_no_matches_short_circuits_without_invoking_retrievers() {
        let db = memory_db().await;
        let config = AppConfig::default();

        let mut request = SearchRequest::new("anything");
        request.filters.status = Some("completed".to_string());

        let response = run_search(&db, &config, &request, None, None).await.expect("search");
        assert!(response.items.is_empty());
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn hybrid_strategy_fuses_lexical_and_semantic_hits() {
        let db = memory_db().await;

        let mut a = Resource::new("https://a.example".into(), "fp_a".into(), "article".into());
        a.title = "rust async runtimes".into();
        a.embedding = Some(vec![0.9, 0.1, 0.0]);
        a.store(&db).await.expect("store a");

        let mut b = Resource::new("https://b.example".into(), "fp_b".into(), "article".into());
        b.title = "gardening tips".into();
        b.embedding = Some(vec![0.0, 0.0, 1.0]);
        b.store(&db).await.expect("store b");

        db.rebuild_indexes().await.expect("rebuild indexes");

        let config = AppConfig::default();
        let request = SearchRequest::new("rust async runtimes");

        let response = run_search(&db, &config, &request, Some(&[0.9, 0.1, 0.0]), None)
            .await
            .expect("search");

        assert!(!response.items.is_empty());
        assert_eq!(response.items[0].resource.title, "rust async runtimes");
    }
}

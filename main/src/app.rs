use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use common::{
    error::AppError,
    events::{DomainEvent, EventBus},
    storage::{
        db::{CitationDirection, SurrealDbClient},
        types::{
            annotation::Annotation, citation::Citation, collection::Collection,
            ingestion_job::IngestionJob, resource::Resource,
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion::fingerprint::{canonical_url, url_only_fingerprint};
use retrieval::{
    graph::{discover_neighbors, GraphWeights},
    reranking::RerankerPool,
    run_search, SearchRequest, SearchResponse,
};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub embedding_provider: Arc<EmbeddingProvider>,
    pub reranker: Option<Arc<RerankerPool>>,
    pub events: Arc<EventBus>,
}

impl AppState {
    fn graph_weights(&self) -> GraphWeights {
        GraphWeights {
            w_v: self.config.graph_w_v,
            w_t: self.config.graph_w_t,
            w_c: self.config.graph_w_c,
            vector_floor: self.config.vector_min_sim_graph,
        }
    }
}

/// Thin axum contract surface: only the routes the external interface
/// names, no auth middleware, no OpenAPI generation, no UI.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/resources", post(create_resource))
        .route("/resources/{id}", get(get_resource))
        .route("/resources/{id}/status", get(get_resource_status))
        .route("/search", post(search))
        .route("/graph/resource/{id}/neighbors", get(graph_neighbors))
        .route("/collections", post(create_collection))
        .route("/resources/{id}/annotations", post(create_annotation))
        .route("/resources/{id}/citations", post(create_citation))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateResourceRequest {
    url: String,
}

/// `POST /resources {url}`: creates a pending resource and queues its
/// ingestion job. Idempotent on source URL: an existing resource for the
/// same URL is returned rather than duplicated.
async fn create_resource(
    State(state): State<AppState>,
    Json(request): Json<CreateResourceRequest>,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let url = url::Url::parse(&request.url)
        .map_err(|err| AppError::Validation(format!("invalid url: {err}")))?;
    let canonical = canonical_url(&url);

    if let Some(existing) = Resource::find_by_source_url(&state.db, &canonical).await? {
        return Ok((StatusCode::OK, Json(existing)));
    }

    let fingerprint = url_only_fingerprint(&canonical);
    let resource = Resource::new(canonical, fingerprint, "unknown".to_string())
        .store(&state.db)
        .await?;

    let job = IngestionJob::new(resource.id.clone());
    state.db.store_item(job).await?;

    state.events.publish(DomainEvent::ResourceCreated {
        resource_id: resource.id.clone(),
        timestamp: resource.created_at,
    });

    Ok((StatusCode::CREATED, Json(resource)))
}

async fn get_resource(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Resource>, ApiError> {
    let resource: Option<Resource> = state.db.get_item(&id).await?;
    resource
        .map(Json)
        .ok_or_else(|| ApiError::from(AppError::NotFound(format!("resource {id} not found"))))
}

#[derive(Debug, Serialize)]
struct ResourceStatus {
    id: String,
    ingestion_status: common::storage::types::resource::IngestionStatus,
    needs_review: bool,
}

async fn get_resource_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResourceStatus>, ApiError> {
    let resource: Option<Resource> = state.db.get_item(&id).await?;
    let resource = resource.ok_or_else(|| AppError::NotFound(format!("resource {id} not found")))?;
    Ok(Json(ResourceStatus {
        id: resource.id,
        ingestion_status: resource.ingestion_status,
        needs_review: resource.needs_review,
    }))
}

#[derive(Debug, Serialize)]
struct SearchResponseBody {
    items: Vec<SearchHitBody>,
    total: usize,
    facets: retrieval::FacetCounts,
}

#[derive(Debug, Serialize)]
struct SearchHitBody {
    resource: Resource,
    fused_score: f32,
    rerank_score: Option<f32>,
}

impl From<SearchResponse> for SearchResponseBody {
    fn from(response: SearchResponse) -> Self {
        Self {
            items: response
                .items
                .into_iter()
                .map(|hit| SearchHitBody {
                    resource: hit.resource,
                    fused_score: hit.fused_score,
                    rerank_score: hit.rerank_score,
                })
                .collect(),
            total: response.total,
            facets: response.facets,
        }
    }
}

/// `POST /search`: runs the hybrid retrieval engine and returns
/// `{items, total, facets}`.
async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponseBody>, ApiError> {
    let query_embedding = if request.strategy.runs_semantic() && !request.text.trim().is_empty() {
        Some(state.embedding_provider.embed(&request.text).await?)
    } else {
        None
    };

    let response = run_search(
        &state.db,
        &state.config,
        &request,
        query_embedding.as_deref(),
        state.reranker.as_ref(),
    )
    .await?;

    Ok(Json(response.into()))
}

#[derive(Debug, Deserialize)]
struct NeighborsQuery {
    #[serde(default = "default_neighbor_limit")]
    limit: usize,
}

fn default_neighbor_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
struct NeighborEntry {
    resource_id: String,
    score: f32,
}

/// `GET /graph/resource/{id}/neighbors?limit=N`.
async fn graph_neighbors(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<NeighborsQuery>,
) -> Result<Json<Vec<NeighborEntry>>, ApiError> {
    let neighbors = discover_neighbors(&state.db, &id, query.limit, state.graph_weights()).await?;
    Ok(Json(
        neighbors
            .into_iter()
            .map(|(resource, score)| NeighborEntry {
                resource_id: resource.id,
                score,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
struct CreateCollectionRequest {
    name: String,
    #[serde(default = "default_owner")]
    owner_id: String,
}

fn default_owner() -> String {
    "local".to_string()
}

/// `POST /collections`.
async fn create_collection(
    State(state): State<AppState>,
    Json(request): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<Collection>), ApiError> {
    let collection = Collection::new(request.name, request.owner_id)
        .store(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

#[derive(Debug, Deserialize)]
struct CreateAnnotationRequest {
    #[serde(default = "default_owner")]
    owner_id: String,
    start_offset: u32,
    end_offset: u32,
    highlighted_text: String,
    text_len: u32,
}

async fn create_annotation(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    Json(request): Json<CreateAnnotationRequest>,
) -> Result<(StatusCode, Json<Annotation>), ApiError> {
    let annotation = Annotation::new(
        resource_id,
        request.owner_id,
        request.start_offset,
        request.end_offset,
        request.highlighted_text,
    )
    .upsert(&state.db, request.text_len)
    .await?;
    Ok((StatusCode::CREATED, Json(annotation)))
}

#[derive(Debug, Deserialize)]
struct CreateCitationRequest {
    target_url: String,
    citation_type: common::storage::types::citation::CitationType,
}

async fn create_citation(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    Json(request): Json<CreateCitationRequest>,
) -> Result<(StatusCode, Json<Citation>), ApiError> {
    let mut citation = Citation::new(resource_id, request.target_url, request.citation_type);
    citation.resolve_target(&state.db).await?;
    let citation = citation.upsert(&state.db).await?;
    Ok((StatusCode::CREATED, Json(citation)))
}

#[allow(dead_code)]
async fn list_citations_for(state: &AppState, resource_id: &str) -> Result<Vec<Citation>, AppError> {
    state.db.list_citations(resource_id, CitationDirection::Both).await
}

struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(value: AppError) -> Self {
        Self(value)
    }
}

impl From<surrealdb::Error> for ApiError {
    fn from(value: surrealdb::Error) -> Self {
        Self(AppError::from(value))
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RetrievalTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::RetrievalUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self.0, "request failed");
        (status, self.0.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::storage::indexes::ensure_runtime_indexes;
    use tower::ServiceExt;
    use uuid::Uuid;

    async fn test_state() -> AppState {
        let namespace = "server_test_ns";
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory(namespace, &database)
                .await
                .expect("failed to start in-memory surrealdb"),
        );
        db.ensure_initialized().await.expect("init schema");
        ensure_runtime_indexes(&db, 3).await.expect("build indexes");

        let mut config = AppConfig::default();
        config.embedding_dimensions = 3;

        let openai_client = Arc::new(async_openai::Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("https://example.com"),
        ));

        AppState {
            db,
            config: config.clone(),
            embedding_provider: Arc::new(EmbeddingProvider::from_config(&config, openai_client)),
            reranker: None,
            events: Arc::new(EventBus::new()),
        }
    }

    #[tokio::test]
    async fn create_resource_queues_an_ingestion_job() {
        let state = test_state().await;
        let db = state.db.clone();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/resources")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"url":"https://example.com/article"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);

        let jobs: Vec<IngestionJob> = db.get_all_stored_items().await.expect("jobs");
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn create_resource_is_idempotent_on_source_url() {
        let state = test_state().await;
        let db = state.db.clone();
        let app = build_router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/resources")
                        .header("content-type", "application/json")
                        .body(Body::from(r#"{"url":"https://example.com/dup"}"#))
                        .expect("request"),
                )
                .await
                .expect("response");
            assert!(response.status().is_success());
        }

        let resources: Vec<Resource> = db.get_all_stored_items().await.expect("resources");
        assert_eq!(resources.len(), 1);
    }

    #[tokio::test]
    async fn get_resource_returns_404_for_unknown_id() {
        let state = test_state().await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/resources/does-not-exist")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_collection_defaults_owner_when_omitted() {
        let state = test_state().await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/collections")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name":"reading list"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::CREATED);
    }
}

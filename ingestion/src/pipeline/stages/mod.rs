use common::{
    error::AppError,
    storage::types::{
        citation::Citation,
        resource::{QualityDimensions, Resource, SparseEmbedding},
    },
    utils::embedding::SPARSE_EMBEDDING_MODEL,
};
use serde::Serialize;
use state_machines::core::GuardError;
use tracing::{debug, instrument, warn};

use crate::fingerprint::{canonical_url, content_fingerprint};

use super::{
    context::PipelineContext,
    state::{ContentPrepared, Enriched, IngestionMachine, Persisted, Ready, Retrieved},
};

const STORE_SPARSE_TERMS: &str = r"
    BEGIN TRANSACTION;
    DELETE resource_sparse_term WHERE resource_id = $resource_id;
    FOR $term IN $terms {
        CREATE resource_sparse_term CONTENT {
            resource_id: $resource_id,
            term_hash: $term.term_hash,
            weight: $term.weight
        };
    };
    COMMIT TRANSACTION;
";

#[derive(Serialize)]
struct SparseTermRow {
    term_hash: u32,
    weight: f32,
}

/// Fetch, Parse, Archive: the three non-degradable stages, run
/// serially. Any failure here aborts the attempt; none of the three is
/// safe to skip.
#[instrument(level = "trace", skip_all, fields(resource_id = %ctx.resource.id, attempt = ctx.attempt))]
pub async fn fetch_parse_archive(
    machine: IngestionMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), ContentPrepared>, AppError> {
    let fetched = ctx.services.fetch(&ctx.resource.source_url).await?;
    let parsed = ctx.services.parse(&fetched)?;
    let archive_path = ctx.services.archive(&fetched).await?;

    if ctx.resource.title.is_empty() {
        if let Some(title) = parsed.title.clone() {
            ctx.resource.title = title;
        }
    }
    ctx.resource.archive_path = Some(archive_path);

    debug!(
        resource_id = %ctx.resource.id,
        attempt = ctx.attempt,
        bytes = fetched.bytes.len(),
        text_chars = parsed.text.chars().count(),
        "ingestion content fetched and parsed"
    );

    ctx.fetched = Some(fetched);
    ctx.parsed = Some(parsed);

    machine
        .prepare()
        .map_err(|(_, guard)| map_guard_error("prepare", &guard))
}

/// Content-identity dedup: recomputes the final
/// `content_fingerprint` now that the raw bytes are known and short-circuits
/// if another resource already holds that fingerprint. The lock taken at
/// submission only covers the canonical URL; two different URLs can still
/// resolve to byte-identical content, which is what this stage catches.
#[instrument(level = "trace", skip_all, fields(resource_id = %ctx.resource.id, attempt = ctx.attempt))]
pub async fn resolve_fingerprint(
    machine: IngestionMachine<(), ContentPrepared>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Retrieved>, AppError> {
    let url = url::Url::parse(&ctx.resource.source_url)
        .map_err(|_| AppError::Validation("Invalid URL".to_string()))?;
    let fingerprint = content_fingerprint(&canonical_url(&url), &ctx.fetched()?.bytes);

    if let Some(existing) = Resource::find_by_fingerprint(ctx.db, &fingerprint).await? {
        if existing.id != ctx.resource.id {
            return Err(AppError::Conflict(format!(
                "content is identical to already-ingested resource {}",
                existing.id
            )));
        }
    }

    ctx.resource.content_fingerprint = fingerprint;

    machine
        .retrieve()
        .map_err(|(_, guard)| map_guard_error("retrieve", &guard))
}

/// The enrichment DAG: Summarize/Tag/Classify/ExtractCitations/
/// ScholarlyExtract run as one structured-output call; Dense embed and
/// Sparse embed run alongside it. All are degradable — a failure here
/// never aborts the attempt, it just leaves the corresponding field null.
/// Quality score is computed last since it depends on the others.
#[instrument(level = "trace", skip_all, fields(resource_id = %ctx.resource.id, attempt = ctx.attempt))]
pub async fn enrich(
    machine: IngestionMachine<(), Retrieved>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Enriched>, AppError> {
    let parsed = ctx.parsed()?.clone();
    let title = ctx.resource.title.clone();
    let embed_input = format!("{title}\n\n{}", parsed.text);

    let (enrichment_result, dense_result) = tokio::join!(
        ctx.services.run_enrichment(&title, &parsed.text),
        ctx.services.dense_embed(&embed_input),
    );

    let enrichment = match enrichment_result {
        Ok(result) => Some(result),
        Err(err) => {
            warn!(resource_id = %ctx.resource.id, error = %err, "enrichment degraded to empty result");
            None
        }
    };

    ctx.dense_embedding = match dense_result {
        Ok(embedding) => Some(embedding),
        Err(err) => {
            warn!(resource_id = %ctx.resource.id, error = %err, "dense embed degraded to null");
            None
        }
    };
    ctx.sparse_embedding = Some(ctx.services.sparse_embed(&embed_input));

    if let Some(result) = &enrichment {
        ctx.resource.description = result.description.clone();
        ctx.resource.subjects = result.subjects.clone();
        ctx.resource.classification_code = result.classification.as_ref().map(|c| c.code.clone());

        for extracted in &result.citations {
            let mut citation = Citation::new(
                ctx.resource.id.clone(),
                extracted.target_url.clone(),
                extracted.citation_type,
            );
            citation.context = extracted.context.clone();
            citation.position = extracted.position;
            citation.resolve_target(ctx.db).await?;
            ctx.citations.push(citation);
        }

        if let Some(scholarly) = &result.scholarly {
            if ctx.resource.creator.is_none() && !scholarly.authors.is_empty() {
                ctx.resource.creator = Some(scholarly.authors.join(", "));
            }
            debug!(
                resource_id = %ctx.resource.id,
                doi = scholarly.doi.as_deref().unwrap_or(""),
                equation_count = scholarly.equation_count,
                table_count = scholarly.table_count,
                "scholarly metadata extracted"
            );
        }
    }
    ctx.enrichment = enrichment;

    let dimensions = compute_quality_dimensions(ctx);
    if ctx.enrichment.is_none() && ctx.dense_embedding.is_none() {
        ctx.resource.mark_quality_needs_review();
    } else {
        ctx.resource.quality_dimensions = dimensions;
        ctx.resource
            .recompute_quality(&ctx.pipeline_config.quality_weights);
    }

    machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

fn compute_quality_dimensions(ctx: &PipelineContext<'_>) -> QualityDimensions {
    let enrichment = ctx.enrichment.as_ref();
    let has_description = enrichment.and_then(|e| e.description.as_ref()).is_some();
    let has_subjects = enrichment.is_some_and(|e| !e.subjects.is_empty());
    let classification = enrichment.and_then(|e| e.classification.as_ref());
    let has_dense = ctx.dense_embedding.is_some();
    let has_sparse = ctx
        .sparse_embedding
        .as_ref()
        .is_some_and(|s| !s.is_empty());

    let present = [
        has_description,
        has_subjects,
        classification.is_some(),
        has_dense,
        has_sparse,
    ];
    let completeness = present.iter().filter(|p| **p).count() as f32 / present.len() as f32;

    QualityDimensions {
        accuracy: classification.map_or(0.5, |c| c.confidence),
        completeness,
        consistency: if enrichment.is_some() { 1.0 } else { 0.0 },
        timeliness: 1.0,
        relevance: if has_subjects { 1.0 } else { 0.5 },
    }
}

/// Persist: writes the resource row (maintaining the Vector/Text
/// indexes, which SurrealDB updates in lock-step with the `embedding`/
/// `title`/`description`/`subjects` fields) and the Sparse index's posting
/// rows, then the resolved citations. The sparse-term write happens inside
/// its own transaction first so a failure there leaves the resource
/// untouched and the attempt simply retries instead of leaving a partial
/// write behind.
#[instrument(level = "trace", skip_all, fields(resource_id = %ctx.resource.id, attempt = ctx.attempt))]
pub async fn persist(
    machine: IngestionMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Persisted>, AppError> {
    if let Some(weights) = ctx.sparse_embedding.clone() {
        store_sparse_terms(ctx, &weights).await?;
        ctx.resource.sparse_embedding = Some(SparseEmbedding {
            weights,
            model: SPARSE_EMBEDDING_MODEL.to_string(),
            updated_at: chrono::Utc::now(),
        });
    }
    ctx.resource.embedding = ctx.dense_embedding.clone();
    ctx.resource.ingestion_status = common::storage::types::resource::IngestionStatus::Completed;

    for citation in std::mem::take(&mut ctx.citations) {
        citation.upsert(ctx.db).await?;
    }

    ctx.resource.check_completed_invariant()?;
    ctx.resource.clone().store(ctx.db).await?;

    debug!(
        resource_id = %ctx.resource.id,
        attempt = ctx.attempt,
        "ingestion persistence flushed to database"
    );

    machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))
}

async fn store_sparse_terms(
    ctx: &PipelineContext<'_>,
    weights: &std::collections::HashMap<u32, f32>,
) -> Result<(), AppError> {
    let terms: Vec<SparseTermRow> = weights
        .iter()
        .map(|(&term_hash, &weight)| SparseTermRow { term_hash, weight })
        .collect();

    ctx.db
        .client
        .query(STORE_SPARSE_TERMS)
        .bind(("resource_id", ctx.resource.id.clone()))
        .bind(("terms", terms))
        .await?;

    Ok(())
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}

use std::{cmp::Ordering, fmt};

use common::storage::types::{resource::Resource, StoredObject};
use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer,
};
use surrealdb::sql::Thing;

/// Record ids come back as a `Thing` from raw `SELECT id, ... FROM table`
/// queries; accept either that or a plain string (same shape SurrealDB
/// uses for both raw queries and `RETURN id`). Shared by every retriever
/// that runs a raw query against `resource` or `resource_sparse_term`.
struct FlexibleIdVisitor;

impl<'de> Visitor<'de> for FlexibleIdVisitor {
    type Value = String;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a Thing")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value.to_string())
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
    where
        A: de::MapAccess<'de>,
    {
        let thing = Thing::deserialize(de::value::MapAccessDeserializer::new(map))?;
        Ok(thing.id.to_raw())
    }
}

pub fn deserialize_flexible_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(FlexibleIdVisitor)
}

/// Per-retriever rank for one candidate. `None` means the candidate never
/// appeared in that retriever's result list and contributes nothing to its
/// fused score.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodRanks {
    pub lexical: Option<u32>,
    pub semantic: Option<u32>,
    pub sparse: Option<u32>,
}

impl MethodRanks {
    pub const fn signal_count(&self) -> usize {
        self.lexical.is_some() as usize + self.semantic.is_some() as usize + self.sparse.is_some() as usize
    }
}

/// A single retriever's hit: the candidate id, its 1-based rank within that
/// retriever's result list, and a raw score kept for diagnostics/facets.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub resource_id: String,
    pub rank: u32,
    pub raw_score: f32,
}

/// A resource plus the ranks it earned from each retriever, its fused RRF
/// score, and an optional reranker score that replaces `fused` for ordering
/// once a cross-encoder pass has run.
#[derive(Debug, Clone)]
pub struct Scored {
    pub item: Resource,
    pub ranks: MethodRanks,
    pub fused: f32,
    pub rerank_score: Option<f32>,
}

impl Scored {
    pub const fn new(item: Resource, ranks: MethodRanks) -> Self {
        Self {
            item,
            ranks,
            fused: 0.0,
            rerank_score: None,
        }
    }

    /// Effective ordering score: the reranker score when present, else the
    /// fused RRF score. Reranking replaces the fused rank for the prefix
    /// it covers.
    pub fn ordering_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.fused)
    }
}

pub const fn clamp_unit(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Min-max normalizes `scores` to `[0, 1]` within the given batch, the
/// shape each retriever uses to bound its raw score before it is handed to
/// fusion.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }

    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for s in scores {
        if !s.is_finite() {
            continue;
        }
        if *s < min {
            min = *s;
        }
        if *s > max {
            max = *s;
        }
    }

    if !min.is_finite() || !max.is_finite() {
        return scores.iter().map(|_| 0.0).collect();
    }

    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|score| {
            if score.is_finite() {
                clamp_unit((score - min) / (max - min))
            } else {
                0.0
            }
        })
        .collect()
}

/// Tie-breaking comparator: higher `quality_overall`, then newer
/// `updated_at`, then lexicographic `id`. Applied only among candidates
/// whose ordering score is equal.
pub fn sort_candidates(items: &mut [Scored]) {
    items.sort_by(|a, b| {
        b.ordering_score()
            .partial_cmp(&a.ordering_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.item
                    .quality_overall
                    .partial_cmp(&a.item.quality_overall)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.item.updated_at.cmp(&a.item.updated_at))
            .then_with(|| a.item.get_id().cmp(b.item.get_id()))
    });
}

use std::collections::HashMap;

use crate::scoring::{MethodRanks, RankedHit};

/// Per-retriever weight used by Reciprocal Rank Fusion.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalWeights {
    pub lexical: f32,
    pub semantic: f32,
    pub sparse: f32,
}

impl RetrievalWeights {
    pub const fn uniform() -> Self {
        Self {
            lexical: 1.0,
            semantic: 1.0,
            sparse: 1.0,
        }
    }
}

/// Query-adaptive weighting. `explicit_hybrid_weight`, when
/// set, overrides adaptation entirely. `default_hybrid_weight` is
/// `AppConfig::default_hybrid_weight`.
///
/// `hybrid_weight` biases the lexical side of the query; `1 - hybrid_weight`
/// biases semantic. The sparse retriever is a learned lexical signal and is
/// grouped with the lexical weight (an Open Question this spec leaves
/// unresolved; see DESIGN.md).
pub fn adaptive_weights(
    query: &str,
    explicit_hybrid_weight: Option<f32>,
    default_hybrid_weight: f32,
) -> RetrievalWeights {
    if let Some(weight) = explicit_hybrid_weight {
        let lexical = weight.clamp(0.0, 1.0);
        return RetrievalWeights {
            lexical,
            semantic: 1.0 - lexical,
            sparse: lexical,
        };
    }

    let mut lexical = default_hybrid_weight;
    let token_count = query.split_whitespace().count();

    if token_count > 0 && token_count <= 2 {
        lexical += 0.2;
    } else if token_count >= 6 {
        lexical -= 0.2;
    }

    if has_quoted_phrase(query) {
        lexical = lexical.max(0.6);
    }

    lexical = lexical.clamp(0.0, 1.0);
    RetrievalWeights {
        lexical,
        semantic: (1.0 - lexical).clamp(0.0, 1.0),
        sparse: lexical,
    }
}

fn has_quoted_phrase(query: &str) -> bool {
    query.matches('"').count() >= 2
}

/// Which retrievers actually returned results this query, for renormalizing
/// weights after a partial failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetrieverAvailability {
    pub lexical: bool,
    pub semantic: bool,
    pub sparse: bool,
}

/// Scales weights so the available retrievers' weights sum to the same
/// total the full set would have summed to, so a retriever dropping out
/// still leaves the remaining ones proportioned correctly.
pub fn renormalize_weights(
    weights: RetrievalWeights,
    availability: RetrieverAvailability,
) -> RetrievalWeights {
    let total = weights.lexical + weights.semantic + weights.sparse;
    let available_total = (if availability.lexical { weights.lexical } else { 0.0 })
        + (if availability.semantic { weights.semantic } else { 0.0 })
        + (if availability.sparse { weights.sparse } else { 0.0 });

    if available_total <= f32::EPSILON || total <= f32::EPSILON {
        return RetrievalWeights {
            lexical: if availability.lexical { weights.lexical } else { 0.0 },
            semantic: if availability.semantic { weights.semantic } else { 0.0 },
            sparse: if availability.sparse { weights.sparse } else { 0.0 },
        };
    }

    let scale = total / available_total;
    RetrievalWeights {
        lexical: if availability.lexical { weights.lexical * scale } else { 0.0 },
        semantic: if availability.semantic { weights.semantic * scale } else { 0.0 },
        sparse: if availability.sparse { weights.sparse * scale } else { 0.0 },
    }
}

/// `RRF(d) = Σ_m w_m · 1 / (k_rrf + rank_m(d))`.
pub fn rrf_score(ranks: &MethodRanks, weights: RetrievalWeights, k_rrf: f32) -> f32 {
    let mut score = 0.0;
    if let Some(rank) = ranks.lexical {
        score += weights.lexical / (k_rrf + rank as f32);
    }
    if let Some(rank) = ranks.semantic {
        score += weights.semantic / (k_rrf + rank as f32);
    }
    if let Some(rank) = ranks.sparse {
        score += weights.sparse / (k_rrf + rank as f32);
    }
    score
}

/// Builds the per-candidate `MethodRanks` map from the three retrievers'
/// hit lists. Permutation-invariant in the retriever lists themselves: the
/// order the three `Vec<RankedHit>` are passed in does not affect the
/// resulting map, only which method each rank is attributed to.
pub fn merge_ranks(
    lexical: &[RankedHit],
    semantic: &[RankedHit],
    sparse: &[RankedHit],
) -> HashMap<String, MethodRanks> {
    let mut merged: HashMap<String, MethodRanks> = HashMap::new();

    for hit in lexical {
        merged.entry(hit.resource_id.clone()).or_default().lexical = Some(hit.rank);
    }
    for hit in semantic {
        merged.entry(hit.resource_id.clone()).or_default().semantic = Some(hit.rank);
    }
    for hit in sparse {
        merged.entry(hit.resource_id.clone()).or_default().sparse = Some(hit.rank);
    }

    merged
}

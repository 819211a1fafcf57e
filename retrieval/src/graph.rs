use std::collections::{HashMap, HashSet};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            citation::Citation,
            resource::Resource,
            StoredObject,
        },
    },
};

/// Weights for the hybrid relationship score.
#[derive(Debug, Clone, Copy)]
pub struct GraphWeights {
    pub w_v: f32,
    pub w_t: f32,
    pub w_c: f32,
    pub vector_floor: f32,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let set_a: HashSet<&String> = a.iter().collect();
    let set_b: HashSet<&String> = b.iter().collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// `score = w_v · cos(e_a,e_b) · 𝟙[cos ≥ τ_v] + w_t · |S_a∩S_b|/|S_a∪S_b| + w_c · 𝟙[class_a=class_b]`.
pub fn hybrid_relationship_score(a: &Resource, b: &Resource, weights: GraphWeights) -> f32 {
    let vector_term = match (&a.embedding, &b.embedding) {
        (Some(ea), Some(eb)) => {
            let cos = cosine_similarity(ea, eb);
            if cos >= weights.vector_floor {
                weights.w_v * cos
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let subject_term = weights.w_t * jaccard(&a.subjects, &b.subjects);

    let classification_term = match (&a.classification_code, &b.classification_code) {
        (Some(ca), Some(cb)) if ca == cb => weights.w_c,
        _ => 0.0,
    };

    vector_term + subject_term + classification_term
}

/// Neighbor discovery: scores `resource` against every other
/// resource with the hybrid relationship score, keeps only candidates
/// with a strictly positive score (i.e. at least one signal cleared its
/// floor/match condition), and returns the top `limit` by score.
pub async fn discover_neighbors(
    db: &SurrealDbClient,
    resource_id: &str,
    limit: usize,
    weights: GraphWeights,
) -> Result<Vec<(Resource, f32)>, AppError> {
    let Some(subject): Option<Resource> = db.get_item(resource_id).await? else {
        return Ok(Vec::new());
    };

    let candidates: Vec<Resource> = db.get_all_stored_items().await?;

    let mut scored: Vec<(Resource, f32)> = candidates
        .into_iter()
        .filter(|candidate| candidate.id != subject.id)
        .map(|candidate| {
            let score = hybrid_relationship_score(&subject, &candidate, weights);
            (candidate, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    Ok(scored)
}

/// PageRank over the resolved citation graph: nodes are resource
/// ids that appear as a citation's source or resolved target, edges point
/// from citing to cited resource. Dangling nodes (no outgoing edges)
/// redistribute their mass uniformly, matching the standard random-surfer
/// formulation; cycles are tolerated by construction.
pub fn pagerank(citations: &[Citation], damping: f32, max_iterations: u32, convergence: f32) -> HashMap<String, f32> {
    let mut nodes: HashSet<String> = HashSet::new();
    let mut out_edges: HashMap<String, Vec<String>> = HashMap::new();

    for citation in citations {
        let Some(target) = &citation.target_resource_id else {
            continue;
        };
        nodes.insert(citation.source_resource_id.clone());
        nodes.insert(target.clone());
        out_edges
            .entry(citation.source_resource_id.clone())
            .or_default()
            .push(target.clone());
    }

    let n = nodes.len();
    if n == 0 {
        return HashMap::new();
    }

    let mut scores: HashMap<String, f32> = nodes.iter().map(|id| (id.clone(), 1.0 / n as f32)).collect();
    let teleport = (1.0 - damping) / n as f32;

    for _ in 0..max_iterations {
        let dangling_mass: f32 = nodes
            .iter()
            .filter(|id| out_edges.get(*id).is_none_or(Vec::is_empty))
            .map(|id| scores[id])
            .sum();
        let dangling_redistribution = damping * dangling_mass / n as f32;

        let mut next: HashMap<String, f32> = nodes.iter().map(|id| (id.clone(), teleport + dangling_redistribution)).collect();

        for (source, targets) in &out_edges {
            if targets.is_empty() {
                continue;
            }
            let share = damping * scores[source] / targets.len() as f32;
            for target in targets {
                *next.entry(target.clone()).or_insert(0.0) += share;
            }
        }

        let delta: f32 = nodes.iter().map(|id| (next[id] - scores[id]).abs()).sum();
        scores = next;
        if delta < convergence {
            break;
        }
    }

    let max_score = scores.values().copied().fold(0.0_f32, f32::max);
    if max_score <= f32::EPSILON {
        return scores;
    }
    scores.into_iter().map(|(id, score)| (id, score / max_score)).collect()
}

/// Recomputes PageRank over the whole citation graph and writes the
/// normalized score of each citation's resolved target back onto
/// `Citation.importance_score`. Run offline/batched; retrieval only ever
/// reads the stored value.
pub async fn recompute_citation_importance(
    db: &SurrealDbClient,
    damping: f32,
    max_iterations: u32,
    convergence: f32,
) -> Result<(), AppError> {
    let citations: Vec<Citation> = db.get_all_stored_items().await?;
    let scores = pagerank(&citations, damping, max_iterations, convergence);

    for mut citation in citations {
        let Some(target) = citation.target_resource_id.clone() else {
            continue;
        };
        let Some(&score) = scores.get(&target) else {
            continue;
        };
        citation.importance_score = Some(score);
        citation.upsert(db).await?;
    }

    Ok(())
}

use serde::{Deserialize, Serialize};

use common::storage::types::citation::CitationType;

/// A citation extracted from text before URL normalization/resolution
///. `resolve_target` (via `Citation`) fills in
/// `target_resource_id` once the URL is looked up in the Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCitation {
    pub target_url: String,
    #[serde(default)]
    pub citation_type: CitationType,
    pub context: Option<String>,
    pub position: Option<u32>,
}

/// Scholarly metadata, present only for academic content. Absent
/// entirely (rather than null-filled) for non-academic resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScholarlyMetadata {
    pub authors: Vec<String>,
    pub doi: Option<String>,
    pub equation_count: u32,
    pub table_count: u32,
}

/// One classification guess with its confidence, kept apart so a
/// low-confidence classification can be distinguished from "no opinion"
/// (both fold to `classification_code: None` on the `Resource`, but the
/// distinction is useful for the `needs_review` flag downstream).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationGuess {
    pub code: String,
    pub confidence: f32,
}

/// Structured output of the single enrichment chat completion covering
/// Summarize/Tag/Classify/ExtractCitations/ScholarlyExtract. Dense
/// and Sparse embed are independent calls, not part of this schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub classification: Option<ClassificationGuess>,
    #[serde(default)]
    pub citations: Vec<ExtractedCitation>,
    pub scholarly: Option<ScholarlyMetadata>,
}

impl EnrichmentResult {
    /// The all-null result used when the enrichment model call itself is
    /// degraded away (every constituent stage is individually degradable).
    pub fn empty() -> Self {
        Self {
            description: None,
            subjects: Vec::new(),
            classification: None,
            citations: Vec::new(),
            scholarly: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_has_no_opinions() {
        let result = EnrichmentResult::empty();
        assert!(result.description.is_none());
        assert!(result.subjects.is_empty());
        assert!(result.classification.is_none());
        assert!(result.citations.is_empty());
        assert!(result.scholarly.is_none());
    }
}

use std::{collections::HashMap, fmt, str::FromStr};

use common::storage::db::ResourceFilter;
use serde::{Deserialize, Serialize};

/// Which retriever(s) a request runs. `Hybrid` runs lexical+semantic;
/// `ThreeWay` adds sparse into the fusion as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    Keyword,
    Semantic,
    Sparse,
    Hybrid,
    ThreeWay,
}

impl Default for RetrievalStrategy {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl RetrievalStrategy {
    pub const fn runs_lexical(self) -> bool {
        matches!(self, Self::Keyword | Self::Hybrid | Self::ThreeWay)
    }

    pub const fn runs_semantic(self) -> bool {
        matches!(self, Self::Semantic | Self::Hybrid | Self::ThreeWay)
    }

    pub const fn runs_sparse(self) -> bool {
        matches!(self, Self::Sparse | Self::ThreeWay)
    }
}

impl FromStr for RetrievalStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "keyword" => Ok(Self::Keyword),
            "semantic" => Ok(Self::Semantic),
            "sparse" => Ok(Self::Sparse),
            "hybrid" => Ok(Self::Hybrid),
            "three_way" => Ok(Self::ThreeWay),
            other => Err(format!("unknown retrieval strategy '{other}'")),
        }
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Keyword => "keyword",
            Self::Semantic => "semantic",
            Self::Sparse => "sparse",
            Self::Hybrid => "hybrid",
            Self::ThreeWay => "three_way",
        };
        f.write_str(label)
    }
}

/// Sort direction for `SearchRequest::sort_by`. `Relevance` keeps
/// the fused/reranked order; any other field discards that order only for
/// presentation, the candidate set itself is unaffected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Desc,
    Asc,
}

/// `POST /search` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub text: String,
    #[serde(default)]
    pub hybrid_weight: Option<f32>,
    #[serde(default)]
    pub strategy: RetrievalStrategy,
    #[serde(default)]
    pub filters: SearchFilters,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    #[serde(default)]
    pub sort_dir: SortDirection,
}

fn default_limit() -> usize {
    20
}

fn default_sort_by() -> String {
    "relevance".to_string()
}

impl SearchRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            hybrid_weight: None,
            strategy: RetrievalStrategy::default(),
            filters: SearchFilters::default(),
            limit: default_limit(),
            offset: 0,
            sort_by: default_sort_by(),
            sort_dir: SortDirection::default(),
        }
    }
}

/// Request-level filter predicates, mapped onto `ResourceFilter` to compute
/// the filtered candidate universe. A filter that matches nothing short-
/// circuits the search to an empty response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub status: Option<String>,
    pub quality_min: Option<f32>,
    pub quality_max: Option<f32>,
    pub language: Option<String>,
    pub classification_prefix: Option<String>,
    #[serde(default)]
    pub subjects_any: Vec<String>,
    #[serde(default)]
    pub subjects_all: Vec<String>,
}

impl SearchFilters {
    pub const fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.quality_min.is_none()
            && self.quality_max.is_none()
            && self.language.is_none()
            && self.classification_prefix.is_none()
            && self.subjects_any.is_empty()
            && self.subjects_all.is_empty()
    }

    pub fn to_resource_filter(&self) -> ResourceFilter {
        ResourceFilter {
            status: self.status.clone(),
            quality_min: self.quality_min,
            quality_max: self.quality_max,
            language: self.language.clone(),
            classification_prefix: self.classification_prefix.clone(),
            subjects_any: self.subjects_any.clone(),
            subjects_all: self.subjects_all.clone(),
        }
    }
}

/// Facet counts computed over the pre-paginated fused candidate set.
pub type FacetCounts = HashMap<String, HashMap<String, usize>>;

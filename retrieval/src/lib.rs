pub mod fts;
pub mod fusion;
pub mod graph;
pub mod pipeline;
pub mod recommendation;
pub mod reranking;
pub mod scoring;
pub mod sparse;
pub mod vector;

pub use pipeline::{run_search, FacetCounts, RetrievalStrategy, SearchFilters, SearchHit, SearchRequest, SearchResponse, SortDirection};

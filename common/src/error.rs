use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

/// Unified error taxonomy.
///
/// Variants are grouped by how callers are expected to react: retryable
/// (`Transient`), absorbable-with-null-field (`Degradable`),
/// terminal-without-retry (`Validation`, `NotFound`, `Conflict`, `Fatal`),
/// and the two variants used only at the retrieval boundary.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Transient error: {0}")]
    Transient(String),
    #[error("Degradable stage failure: {0}")]
    Degradable(String),
    #[error("Fatal error: {0}")]
    Fatal(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("DOM smoothie error: {0}")]
    DomSmoothie(#[from] dom_smoothie::ReadabilityError),
    #[error("Internal service error: {0}")]
    InternalError(String),
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),
    #[error("Retrieval timed out: {0}")]
    RetrievalTimeout(String),
}

impl AppError {
    /// Whether a job-level retry should be attempted for this failure.
    ///
    /// Network/5xx/transient-store errors are retryable; malformed input
    /// and fatal store errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_)
                | AppError::Reqwest(_)
                | AppError::Io(_)
                | AppError::Database(_)
        )
    }

    /// Whether this failure should be absorbed as a null field rather than
    /// failing the enclosing job.
    pub fn is_degradable(&self) -> bool {
        matches!(self, AppError::Degradable(_) | AppError::OpenAI(_))
    }

    /// Short, caller-safe classification used at the HTTP boundary
    /// alongside a correlation id; internals are not exposed.
    pub fn public_kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation_error",
            AppError::Transient(_) | AppError::Reqwest(_) | AppError::Io(_) => "transient",
            AppError::Degradable(_) => "degradable",
            AppError::RetrievalUnavailable(_) => "retrieval_unavailable",
            AppError::RetrievalTimeout(_) => "retrieval_timeout",
            _ => "internal_error",
        }
    }
}

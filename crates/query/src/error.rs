use index::SourceKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    /// A single retrieval source failed or timed out.
    #[error("{store} source unavailable: {reason}")]
    SourceUnavailable { store: SourceKind, reason: String },

    #[error("All retrieval sources are unavailable")]
    AllSourcesUnavailable,

    #[error("No relevant passages found")]
    NoResultsFound,

    #[error("Graph expansion failed: {0}")]
    GraphExpansion(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Answer generation failed: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;

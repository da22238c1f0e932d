pub mod config;
pub mod context;
pub mod error;
pub mod expander;
pub mod fusion;
pub mod global_search;
pub mod llm;
pub mod local_search;
pub mod orchestrator;
pub mod prompt;
pub mod retry;
pub mod strategy;

pub use config::{ExpansionConfig, FusionConfig, QueryConfig, RetrievalConfig, RetryConfig};
pub use context::{GraphContext, RelatedChunk, Triple};
pub use error::{QueryError, Result};
pub use expander::{ExpandOptions, GraphContextExpander};
pub use fusion::{Contribution, FusedResult, RrfFusion, fuse};
pub use llm::{AnswerGenerator, GenerationRequest, QueryLLM};
pub use orchestrator::{
    Answer, AnswerRequest, AnswerTrace, ChunkReference, Complexity, Message, Orchestrator, Role,
    Stores, insufficient_information_message,
};
pub use retry::{RetryError, RetryPolicy};
pub use strategy::{GraphStrategy, ResolvedStrategy, detect_strategy};

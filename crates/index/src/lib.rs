pub mod embeddings;
pub mod lexical_index;
pub mod memory_graph;
pub mod neo4j_index;
pub mod qdrant_index;
pub mod types;

pub use embeddings::EmbeddingClient;
pub use lexical_index::ElasticLexicalStore;
pub use memory_graph::{GraphSnapshot, InMemoryGraph};
pub use neo4j_index::{GraphStats, Neo4jGraphStore};
pub use qdrant_index::QdrantVectorStore;
pub use types::{
    Chunk, Entity, Hit, RankedList, RankedResult, Relationship, SimilarChunk, SourceKind,
};

use anyhow::Result;
use async_trait::async_trait;

/// Full-text (BM25) search over the chunk corpus.
#[async_trait]
pub trait LexicalStore: Send + Sync {
    /// Hits ordered by descending BM25 score, at most `limit`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>>;

    /// Name of the field holding the chunk identifier.
    fn id_field(&self) -> &str;
}

/// Nearest-neighbour search over chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Hits ordered by descending similarity, at most `limit`.
    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<Hit>>;

    /// Name of the payload field holding the chunk identifier.
    fn id_field(&self) -> &str;
}

/// Turns query text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Read-only access to the medical knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Entities whose name or one of whose aliases occurs in `text`
    /// (case-insensitive). Longer names come first.
    async fn match_entities(&self, text: &str, limit: usize) -> Result<Vec<Entity>>;

    /// One hop of typed relationships touching any of `names`, in either
    /// direction. Chunk and document nodes and structural edges are excluded.
    async fn neighborhood(&self, names: &[String], limit: usize) -> Result<Vec<Relationship>>;

    /// Chunks linked to `chunk_id` by a SIMILAR edge, most similar first.
    async fn similar_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<SimilarChunk>>;
}

/// Relationship types that describe document structure rather than medicine.
pub const STRUCTURAL_RELATIONS: &[&str] = &[
    "SIMILAR",
    "PART_OF",
    "NEXT_CHUNK",
    "FIRST_CHUNK",
    "HAS_ENTITY",
];

pub const SIMILAR_RELATION: &str = "SIMILAR";

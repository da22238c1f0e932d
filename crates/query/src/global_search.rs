use anyhow::{Context, Result};
use index::GraphStore;
use std::collections::HashSet;
use tracing::debug;

use crate::context::{RelatedChunk, snippet};
use crate::fusion::FusedResult;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalOutcome {
    pub related: Vec<RelatedChunk>,
    /// Entities mentioned by the related chunks, first seen first.
    pub entities: Vec<String>,
}

/// Semantic navigation over SIMILAR chunk edges.
#[derive(Debug, Clone)]
pub struct GlobalSearch {
    seed_chunks: usize,
    per_chunk: usize,
    snippet_chars: usize,
}

impl GlobalSearch {
    pub fn new(seed_chunks: usize, per_chunk: usize, snippet_chars: usize) -> Self {
        Self {
            seed_chunks,
            per_chunk,
            snippet_chars,
        }
    }

    pub async fn search<G>(&self, graph: &G, fused: &[FusedResult]) -> Result<GlobalOutcome>
    where
        G: GraphStore + ?Sized,
    {
        let fused_ids: HashSet<&str> = fused.iter().map(|r| r.chunk_id.as_str()).collect();
        let mut entity_set: HashSet<String> = HashSet::new();
        let mut emitted: HashSet<String> = HashSet::new();
        let mut outcome = GlobalOutcome::default();

        for seed in fused.iter().take(self.seed_chunks) {
            // Fused chunks are skipped, so ask for enough to still fill `per_chunk`.
            let limit = self.per_chunk + fused.len() + emitted.len();
            let similar = graph
                .similar_chunks(&seed.chunk_id, limit)
                .await
                .with_context(|| format!("Failed to load similar chunks for {}", seed.chunk_id))?;

            let mut taken = 0;
            for chunk in similar {
                if taken >= self.per_chunk {
                    break;
                }
                if fused_ids.contains(chunk.chunk_id.as_str()) || emitted.contains(&chunk.chunk_id) {
                    continue;
                }

                for entity in &chunk.entities {
                    if entity_set.insert(entity.clone()) {
                        outcome.entities.push(entity.clone());
                    }
                }
                emitted.insert(chunk.chunk_id.clone());
                outcome.related.push(RelatedChunk {
                    snippet: snippet(&chunk.text, self.snippet_chars),
                    chunk_id: chunk.chunk_id,
                    similarity: chunk.score,
                    via: seed.chunk_id.clone(),
                    entities: chunk.entities,
                });
                taken += 1;
            }

            debug!(seed = %seed.chunk_id, related = taken, "Followed SIMILAR edges");
        }

        Ok(outcome)
    }
}

impl Default for GlobalSearch {
    fn default() -> Self {
        Self::new(3, 3, 150)
    }
}

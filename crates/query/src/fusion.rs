//! Reciprocal Rank Fusion of lexical and semantic result lists.
//!
//! `score(chunk) = Σ weight(source) / (k + rank)` over every list containing
//! the chunk. Only rank positions are used, so BM25 scores and cosine
//! similarities never need to be normalised against each other.

use index::{Chunk, RankedList, SourceKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::collections::hash_map::Entry;

use crate::config::FusionConfig;

/// One store's vote for a fused chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source: SourceKind,
    pub rank: usize,
    pub raw_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    pub chunk_id: String,
    pub score: f64,
    /// Stores that returned this chunk, in the order the lists were given.
    pub provenance: Vec<Contribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Chunk>,
}

impl FusedResult {
    pub fn best_rank(&self) -> usize {
        self.provenance
            .iter()
            .map(|c| c.rank)
            .min()
            .unwrap_or(usize::MAX)
    }

    pub fn rank_in(&self, source: SourceKind) -> Option<usize> {
        self.provenance
            .iter()
            .find(|c| c.source == source)
            .map(|c| c.rank)
    }

    pub fn raw_score_in(&self, source: SourceKind) -> Option<f32> {
        self.provenance
            .iter()
            .find(|c| c.source == source)
            .map(|c| c.raw_score)
    }

    pub fn text(&self) -> &str {
        self.chunk.as_ref().map(|c| c.text.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RrfFusion {
    config: FusionConfig,
}

impl RrfFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn weight(&self, source: SourceKind) -> f64 {
        match source {
            SourceKind::Lexical => self.config.lexical_weight,
            SourceKind::Semantic => self.config.semantic_weight,
        }
    }

    /// Fuse ranked lists into one list of at most `top_n` chunks.
    ///
    /// Ordering: fused score descending, then best single-list rank
    /// ascending, then first appearance across the lists as given.
    pub fn fuse(&self, lists: &[RankedList], top_n: usize) -> Vec<FusedResult> {
        let mut fused: Vec<FusedResult> = Vec::new();
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut counted: HashSet<(usize, &str)> = HashSet::new();

        for (list_idx, list) in lists.iter().enumerate() {
            let weight = self.weight(list.source);

            for result in &list.results {
                // A repeated id within one list only counts at its best position.
                if !counted.insert((list_idx, result.chunk_id.as_str())) {
                    continue;
                }
                let contribution = weight / (self.config.k + result.rank as f64);

                let idx = match positions.entry(result.chunk_id.as_str()) {
                    Entry::Occupied(entry) => *entry.get(),
                    Entry::Vacant(entry) => {
                        entry.insert(fused.len());
                        fused.push(FusedResult {
                            chunk_id: result.chunk_id.clone(),
                            score: 0.0,
                            provenance: Vec::new(),
                            chunk: None,
                        });
                        fused.len() - 1
                    }
                };

                let entry = &mut fused[idx];
                entry.score += contribution;
                entry.provenance.push(Contribution {
                    source: list.source,
                    rank: result.rank,
                    raw_score: result.score,
                });
                if entry.chunk.is_none() {
                    entry.chunk = result.chunk.clone();
                }
            }
        }

        // `fused` is in first-encountered order and sort_by is stable.
        fused.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.best_rank().cmp(&b.best_rank()))
        });
        fused.truncate(top_n);
        fused
    }
}

/// Unweighted RRF with smoothing constant `k`.
pub fn fuse(lists: &[RankedList], k: f64, top_n: usize) -> Vec<FusedResult> {
    RrfFusion::new(FusionConfig {
        k,
        ..FusionConfig::default()
    })
    .fuse(lists, top_n)
}

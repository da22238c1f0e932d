//! Best-effort knowledge graph enrichment for fused passages.
//!
//! The expander never fails: a store error or timeout is logged, marks the
//! context as degraded and contributes nothing from the affected branch.

use index::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::ExpansionConfig;
use crate::context::{
    ContextBuilder, GraphContext, RELATED_CHUNKS_HEADER, RELATIONS_HEADER, RelatedChunk, Triple,
};
use crate::error::QueryError;
use crate::fusion::FusedResult;
use crate::global_search::{GlobalOutcome, GlobalSearch};
use crate::local_search::{LocalOutcome, LocalSearch};
use crate::strategy::{GraphStrategy, ResolvedStrategy};

/// Per-call knobs of an expansion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpandOptions {
    pub strategy: GraphStrategy,
    pub max_hops: usize,
    pub max_context_chars: usize,
}

impl ExpandOptions {
    pub fn from_config(config: &ExpansionConfig) -> Self {
        Self {
            strategy: config.strategy,
            max_hops: config.max_hops,
            max_context_chars: config.max_context_chars,
        }
    }

    pub fn with_strategy(mut self, strategy: GraphStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self::from_config(&ExpansionConfig::default())
    }
}

pub struct GraphContextExpander {
    graph: Arc<dyn GraphStore>,
    local: LocalSearch,
    global: GlobalSearch,
    timeout: Duration,
}

impl GraphContextExpander {
    pub fn new(graph: Arc<dyn GraphStore>, config: &ExpansionConfig) -> Self {
        Self {
            graph,
            local: LocalSearch::new(config.max_seed_entities, config.fan_out_cap),
            global: GlobalSearch::new(
                config.similar_seed_chunks,
                config.similar_per_chunk,
                config.snippet_chars,
            ),
            timeout: config.timeout(),
        }
    }

    pub async fn expand(
        &self,
        query: &str,
        fused: &[FusedResult],
        options: &ExpandOptions,
    ) -> GraphContext {
        let resolved = options.strategy.resolve(query);

        let (local, global) = match resolved {
            ResolvedStrategy::Local => (Some(self.run_local(query, options.max_hops).await), None),
            ResolvedStrategy::Global => (None, Some(self.run_global(fused).await)),
            ResolvedStrategy::Hybrid => {
                let (local, global) = tokio::join!(
                    self.run_local(query, options.max_hops),
                    self.run_global(fused)
                );
                (Some(local), Some(global))
            }
        };

        let context = assemble(resolved, local, global, options.max_context_chars);

        info!(
            strategy = %resolved,
            entities = context.entities.len(),
            triples = context.triples.len(),
            related_chunks = context.related_chunks.len(),
            context_chars = context.char_count(),
            truncated = context.truncated,
            degraded = context.degraded,
            "Graph context expanded"
        );

        context
    }

    async fn run_local(&self, query: &str, max_hops: usize) -> Option<LocalOutcome> {
        self.guarded(
            "local",
            self.local.search(self.graph.as_ref(), query, max_hops),
        )
        .await
    }

    async fn run_global(&self, fused: &[FusedResult]) -> Option<GlobalOutcome> {
        self.guarded("global", self.global.search(self.graph.as_ref(), fused))
            .await
    }

    /// `None` when the branch failed or overran the expansion deadline.
    async fn guarded<T, F>(&self, branch: &str, work: F) -> Option<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let error = match timeout(self.timeout, work).await {
            Ok(Ok(outcome)) => return Some(outcome),
            Ok(Err(e)) => QueryError::GraphExpansion(format!("{e:#}")),
            Err(_) => QueryError::GraphExpansion(format!("timed out after {:?}", self.timeout)),
        };

        warn!(
            branch = branch,
            error = %error,
            "Graph expansion branch unavailable, continuing without it"
        );
        None
    }
}

/// Local triples take precedence; global lines fill what budget is left.
fn assemble(
    strategy: ResolvedStrategy,
    local: Option<Option<LocalOutcome>>,
    global: Option<Option<GlobalOutcome>>,
    max_context_chars: usize,
) -> GraphContext {
    let mut context = GraphContext::empty(strategy);
    let mut builder = ContextBuilder::new(max_context_chars);
    let mut entity_set: HashSet<String> = HashSet::new();

    match local {
        Some(Some(outcome)) => {
            builder.section(RELATIONS_HEADER, outcome.triples.iter().map(Triple::to_line));
            let endpoints = outcome
                .triples
                .iter()
                .flat_map(|t| [t.source.clone(), t.target.clone()]);
            for entity in outcome.seeds.into_iter().chain(endpoints) {
                if entity_set.insert(entity.clone()) {
                    context.entities.push(entity);
                }
            }
            context.triples = outcome.triples;
        }
        Some(None) => context.degraded = true,
        None => {}
    }

    match global {
        Some(Some(outcome)) => {
            builder.section(
                RELATED_CHUNKS_HEADER,
                outcome.related.iter().map(RelatedChunk::to_line),
            );
            for entity in outcome.entities {
                if entity_set.insert(entity.clone()) {
                    context.entities.push(entity);
                }
            }
            context.related_chunks = outcome.related;
        }
        Some(None) => context.degraded = true,
        None => {}
    }

    let (text, truncated) = builder.finish();
    context.text = text;
    context.truncated = truncated;
    context
}

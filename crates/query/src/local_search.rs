use anyhow::{Context, Result};
use index::{Entity, GraphStore};
use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use tracing::debug;

use crate::context::Triple;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalOutcome {
    pub seeds: Vec<String>,
    pub triples: Vec<Triple>,
    /// Traversal stopped at the fan-out cap.
    pub capped: bool,
}

/// Entity-focused breadth-first traversal.
#[derive(Debug, Clone)]
pub struct LocalSearch {
    max_seed_entities: usize,
    fan_out_cap: usize,
}

impl LocalSearch {
    pub fn new(max_seed_entities: usize, fan_out_cap: usize) -> Self {
        Self {
            max_seed_entities,
            fan_out_cap,
        }
    }

    /// Entities named in the query, by name or alias, longest first.
    pub async fn find_seeds<G>(&self, graph: &G, query: &str) -> Result<Vec<Entity>>
    where
        G: GraphStore + ?Sized,
    {
        // The store matches substrings; over-fetch so the boundary filter has room.
        let candidates = graph
            .match_entities(query, self.max_seed_entities * 4)
            .await
            .context("Failed to match query entities")?;

        let seeds: Vec<Entity> = candidates
            .into_iter()
            .filter(|entity| entity.names().any(|name| mentions(query, name)))
            .take(self.max_seed_entities)
            .collect();

        Ok(seeds)
    }

    pub async fn search<G>(&self, graph: &G, query: &str, max_hops: usize) -> Result<LocalOutcome>
    where
        G: GraphStore + ?Sized,
    {
        let seeds = self.find_seeds(graph, query).await?;
        if seeds.is_empty() {
            debug!(query = query, "No graph entities in query");
            return Ok(LocalOutcome::default());
        }

        let seed_names: Vec<String> = seeds.into_iter().map(|e| e.name).collect();
        self.traverse(graph, seed_names, max_hops).await
    }

    /// Expand hop by hop from `seeds`. Hop `h` only follows edges touching
    /// nodes first reached at hop `h - 1`, so nothing beyond `max_hops` is read.
    pub async fn traverse<G>(&self, graph: &G, seeds: Vec<String>, max_hops: usize) -> Result<LocalOutcome>
    where
        G: GraphStore + ?Sized,
    {
        let mut visited: HashSet<String> = seeds.iter().cloned().collect();
        let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();
        let mut triples: Vec<Triple> = Vec::new();
        let mut frontier = seeds.clone();
        let mut capped = false;

        for hop in 1..=max_hops {
            if frontier.is_empty() {
                break;
            }
            if triples.len() >= self.fan_out_cap {
                capped = true;
                break;
            }

            let remaining = self.fan_out_cap.saturating_sub(triples.len());
            // Edges found at earlier hops come back, leave room for them.
            let limit = remaining + seen_edges.len();

            let mut edges = graph
                .neighborhood(&frontier, limit)
                .await
                .with_context(|| format!("Failed to expand graph at hop {}", hop))?;

            edges.sort_by(|a, b| {
                b.confidence
                    .unwrap_or(0.0)
                    .total_cmp(&a.confidence.unwrap_or(0.0))
            });

            let mut next_frontier = Vec::new();
            for edge in edges {
                let key = (edge.source.clone(), edge.relation.clone(), edge.target.clone());
                if seen_edges.contains(&key) {
                    continue;
                }
                if triples.len() >= self.fan_out_cap {
                    capped = true;
                    break;
                }

                for endpoint in [&edge.source, &edge.target] {
                    if visited.insert(endpoint.clone()) {
                        next_frontier.push(endpoint.clone());
                    }
                }
                seen_edges.insert(key);
                triples.push(Triple {
                    source: edge.source,
                    relation: edge.relation,
                    target: edge.target,
                    hop,
                });
            }

            debug!(
                hop = hop,
                frontier = frontier.len(),
                triples = triples.len(),
                "Local traversal hop"
            );
            frontier = next_frontier;
        }

        Ok(LocalOutcome {
            seeds,
            triples,
            capped,
        })
    }
}

impl Default for LocalSearch {
    fn default() -> Self {
        Self::new(5, 40)
    }
}

/// Case-insensitive match of `name` in `text` on word boundaries, so that
/// "RDS" is not found inside "words".
pub fn mentions(text: &str, name: &str) -> bool {
    let name = name.trim();
    if name.chars().count() < 2 {
        return false;
    }

    let starts_with_word = name.chars().next().is_some_and(is_word_char);
    let ends_with_word = name.chars().last().is_some_and(is_word_char);
    let pattern = format!(
        "{}{}{}",
        if starts_with_word { r"\b" } else { "" },
        regex::escape(name),
        if ends_with_word { r"\b" } else { "" },
    );

    build_case_insensitive(&pattern)
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn build_case_insensitive(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern).case_insensitive(true).build().ok()
}

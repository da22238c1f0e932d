use anyhow::{Context, Result};
use async_trait::async_trait;
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::{Entity, GraphStore, Relationship, SIMILAR_RELATION, STRUCTURAL_RELATIONS, SimilarChunk};

#[derive(Debug, Clone)]
enum Node {
    Entity(Entity),
    Chunk {
        id: String,
        text: String,
        entities: Vec<String>,
    },
}

#[derive(Debug, Clone)]
struct Edge {
    relation: String,
    confidence: Option<f64>,
}

/// Serialized form of a graph, e.g. an export of the Neo4j database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub chunks: Vec<SnapshotChunk>,
    #[serde(default)]
    pub similar: Vec<SimilarEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotChunk {
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarEdge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub score: f64,
}

/// A knowledge graph held in memory, answering the same queries as Neo4j.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    graph: DiGraph<Node, Edge>,
    entities: HashMap<String, NodeIndex>,
    chunks: HashMap<String, NodeIndex>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for entity in snapshot.entities {
            graph.add_entity(entity);
        }
        for relationship in snapshot.relationships {
            graph.add_relationship(relationship);
        }
        for chunk in snapshot.chunks {
            graph.add_chunk(&chunk.id, &chunk.text, chunk.entities);
        }
        for edge in snapshot.similar {
            graph.add_similar(&edge.source, &edge.target, edge.score);
        }
        graph
    }

    pub async fn load_json(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read graph snapshot: {:?}", path))?;
        let snapshot: GraphSnapshot =
            serde_json::from_str(&content).context("Failed to parse graph snapshot")?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Insert or replace an entity, keyed by name.
    pub fn add_entity(&mut self, entity: Entity) -> NodeIndex {
        if let Some(&idx) = self.entities.get(&entity.name) {
            self.graph[idx] = Node::Entity(entity);
            return idx;
        }
        let name = entity.name.clone();
        let idx = self.graph.add_node(Node::Entity(entity));
        self.entities.insert(name, idx);
        idx
    }

    fn ensure_entity(&mut self, name: &str) -> NodeIndex {
        match self.entities.get(name) {
            Some(&idx) => idx,
            None => self.add_entity(Entity::new(name)),
        }
    }

    /// Add a typed edge, creating bare endpoint entities when missing.
    pub fn add_relationship(&mut self, relationship: Relationship) {
        let source = self.ensure_entity(&relationship.source);
        let target = self.ensure_entity(&relationship.target);
        self.graph.add_edge(
            source,
            target,
            Edge {
                relation: relationship.relation,
                confidence: relationship.confidence,
            },
        );
    }

    pub fn add_chunk(&mut self, id: &str, text: &str, entities: Vec<String>) {
        let node = Node::Chunk {
            id: id.to_string(),
            text: text.to_string(),
            entities,
        };
        match self.chunks.get(id) {
            Some(&idx) => self.graph[idx] = node,
            None => {
                let idx = self.graph.add_node(node);
                self.chunks.insert(id.to_string(), idx);
            }
        }
    }

    /// Link two existing chunks with an undirected SIMILAR edge.
    pub fn add_similar(&mut self, a: &str, b: &str, score: f64) {
        if let (Some(&ia), Some(&ib)) = (self.chunks.get(a), self.chunks.get(b)) {
            self.graph.add_edge(
                ia,
                ib,
                Edge {
                    relation: SIMILAR_RELATION.to_string(),
                    confidence: Some(score),
                },
            );
        }
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Typed entity relationships, structural edges excluded.
    pub fn relation_count(&self) -> usize {
        self.graph
            .edge_references()
            .filter(|edge| !STRUCTURAL_RELATIONS.contains(&edge.weight().relation.as_str()))
            .count()
    }

    fn entity_name(&self, idx: NodeIndex) -> Option<&str> {
        match &self.graph[idx] {
            Node::Entity(entity) => Some(entity.name.as_str()),
            Node::Chunk { .. } => None,
        }
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn match_entities(&self, text: &str, limit: usize) -> Result<Vec<Entity>> {
        let haystack = text.to_lowercase();

        let mut matched: Vec<&Entity> = self
            .graph
            .node_indices()
            .filter_map(|idx| match &self.graph[idx] {
                Node::Entity(entity) => Some(entity),
                Node::Chunk { .. } => None,
            })
            .filter(|entity| {
                entity.names().any(|name| {
                    name.chars().count() >= 2 && haystack.contains(&name.to_lowercase())
                })
            })
            .collect();

        matched.sort_by(|a, b| {
            b.name
                .chars()
                .count()
                .cmp(&a.name.chars().count())
                .then_with(|| a.name.cmp(&b.name))
        });

        Ok(matched.into_iter().take(limit).cloned().collect())
    }

    async fn neighborhood(&self, names: &[String], limit: usize) -> Result<Vec<Relationship>> {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();

        let mut relationships: Vec<Relationship> = self
            .graph
            .edge_references()
            .filter(|edge| !STRUCTURAL_RELATIONS.contains(&edge.weight().relation.as_str()))
            .filter_map(|edge| {
                let source = self.entity_name(edge.source())?;
                let target = self.entity_name(edge.target())?;
                if !wanted.contains(source) && !wanted.contains(target) {
                    return None;
                }
                Some(Relationship {
                    source: source.to_string(),
                    relation: edge.weight().relation.clone(),
                    target: target.to_string(),
                    confidence: edge.weight().confidence,
                })
            })
            .collect();

        relationships.sort_by(|a, b| {
            b.confidence
                .unwrap_or(0.0)
                .total_cmp(&a.confidence.unwrap_or(0.0))
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.relation.cmp(&b.relation))
                .then_with(|| a.target.cmp(&b.target))
        });
        relationships.truncate(limit);

        Ok(relationships)
    }

    async fn similar_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<SimilarChunk>> {
        let Some(&start) = self.chunks.get(chunk_id) else {
            return Ok(Vec::new());
        };

        let mut best: HashMap<NodeIndex, f64> = HashMap::new();
        for direction in [Direction::Outgoing, Direction::Incoming] {
            for edge in self.graph.edges_directed(start, direction) {
                if edge.weight().relation != SIMILAR_RELATION {
                    continue;
                }
                let other = if edge.source() == start {
                    edge.target()
                } else {
                    edge.source()
                };
                if other == start {
                    continue;
                }
                let score = edge.weight().confidence.unwrap_or(0.0);
                best.entry(other)
                    .and_modify(|s| *s = s.max(score))
                    .or_insert(score);
            }
        }

        let mut similar: Vec<SimilarChunk> = best
            .into_iter()
            .filter_map(|(idx, score)| match &self.graph[idx] {
                Node::Chunk { id, text, entities } => Some(SimilarChunk {
                    chunk_id: id.clone(),
                    text: text.clone(),
                    score,
                    entities: entities.clone(),
                }),
                Node::Entity(_) => None,
            })
            .collect();

        similar.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        similar.truncate(limit);

        Ok(similar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryGraph {
        let mut graph = InMemoryGraph::new();
        graph.add_entity(
            Entity::new("Persistent pulmonary hypertension")
                .with_label("Condition")
                .with_alias("PPHN"),
        );
        graph.add_relationship(
            Relationship::new("nitric oxide", "TREATS", "Persistent pulmonary hypertension")
                .with_confidence(0.9),
        );
        graph.add_relationship(Relationship::new(
            "Persistent pulmonary hypertension",
            "CAUSES",
            "hypoxia",
        ));
        graph.add_relationship(Relationship::new("hypoxia", "ASSOCIATED_WITH", "cyanosis"));

        graph.add_chunk("c1", "PPHN management", vec!["PPHN".to_string()]);
        graph.add_chunk("c2", "Nitric oxide therapy", vec!["nitric oxide".to_string()]);
        graph.add_chunk("c3", "ECMO criteria", vec![]);
        graph.add_similar("c1", "c2", 0.8);
        graph.add_similar("c3", "c1", 0.9);
        graph
    }

    #[tokio::test]
    async fn match_entities_by_alias_case_insensitive() {
        let graph = sample();
        let found = graph.match_entities("what is the treatment for pphn?", 5).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Persistent pulmonary hypertension");
    }

    #[tokio::test]
    async fn neighborhood_returns_both_directions_highest_confidence_first() {
        let graph = sample();
        let edges = graph
            .neighborhood(&["Persistent pulmonary hypertension".to_string()], 10)
            .await
            .unwrap();

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].relation, "TREATS");
        assert_eq!(edges[0].source, "nitric oxide");
        assert_eq!(edges[1].relation, "CAUSES");
    }

    #[tokio::test]
    async fn similar_chunks_are_undirected_and_sorted() {
        let graph = sample();
        let similar = graph.similar_chunks("c1", 5).await.unwrap();
        let ids: Vec<_> = similar.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c2"]);
        assert_eq!(similar[1].entities, vec!["nitric oxide".to_string()]);

        assert!(graph.similar_chunks("missing", 5).await.unwrap().is_empty());
    }

    #[test]
    fn snapshot_loads_from_json() {
        let json = r#"{
            "entities": [{"name": "sepsis", "labels": ["Condition"]}],
            "relationships": [{"source": "ampicillin", "relation": "TREATS", "target": "sepsis"}],
            "chunks": [{"id": "c1", "text": "Neonatal sepsis"}]
        }"#;
        let snapshot: GraphSnapshot = serde_json::from_str(json).unwrap();
        let graph = InMemoryGraph::from_snapshot(snapshot);
        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relation_count(), 1);
    }
}

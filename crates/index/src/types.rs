use serde::{Deserialize, Serialize};
use std::fmt;

/// A retrievable passage of the source textbook.
///
/// The lexical and vector stores index the same chunks under the same
/// `chunk_id`, which is what makes rank fusion between them meaningful.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub document_id: String,
}

/// A single hit returned by a retrieval store, before ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub chunk: Chunk,
    /// Store-specific relevance (BM25 or cosine similarity). Not comparable across stores.
    pub score: f32,
}

impl Hit {
    pub fn new(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.chunk_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Lexical,
    Semantic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Lexical => "lexical",
            SourceKind::Semantic => "semantic",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An entry of one store's ranked result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub chunk_id: String,
    pub score: f32,
    /// 1-based position in the store's descending-score list.
    pub rank: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<Chunk>,
}

/// All results one store returned for a query, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedList {
    pub source: SourceKind,
    pub results: Vec<RankedResult>,
}

impl RankedList {
    pub fn empty(source: SourceKind) -> Self {
        Self {
            source,
            results: Vec::new(),
        }
    }

    /// Build a list from ids that are already ordered by descending relevance.
    pub fn from_ids<I, S>(source: SourceKind, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let results = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| RankedResult {
                chunk_id: id.into(),
                score: 0.0,
                rank: i + 1,
                chunk: None,
            })
            .collect();

        Self { source, results }
    }

    /// Rank store hits by descending score. Equal scores keep the store's order.
    pub fn from_hits(source: SourceKind, mut hits: Vec<Hit>) -> Self {
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));

        let results = hits
            .into_iter()
            .enumerate()
            .map(|(i, hit)| RankedResult {
                chunk_id: hit.chunk.chunk_id.clone(),
                score: hit.score,
                rank: i + 1,
                chunk: Some(hit.chunk),
            })
            .collect();

        Self { source, results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// A node in the knowledge graph representing a medical concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Entity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: Vec::new(),
            aliases: Vec::new(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// The name followed by every alias.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

/// A typed, directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: String,
    pub relation: String,
    pub target: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        relation: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            relation: relation.into(),
            target: target.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// A chunk reached over a SIMILAR edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarChunk {
    pub chunk_id: String,
    pub text: String,
    pub score: f64,
    /// Entities the chunk mentions.
    #[serde(default)]
    pub entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: format!("text of {id}"),
            page_number: Some(1),
            document_id: "doc".to_string(),
        }
    }

    #[test]
    fn from_hits_ranks_by_descending_score() {
        let list = RankedList::from_hits(
            SourceKind::Lexical,
            vec![
                Hit::new(chunk("a"), 1.5),
                Hit::new(chunk("b"), 7.2),
                Hit::new(chunk("c"), 3.0),
            ],
        );

        let ids: Vec<_> = list.results.iter().map(|r| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert_eq!(list.results[0].rank, 1);
        assert_eq!(list.results[2].rank, 3);
        assert!(list.results[0].chunk.is_some());
    }

    #[test]
    fn from_ids_uses_position_as_rank() {
        let list = RankedList::from_ids(SourceKind::Semantic, ["x", "y"]);
        assert_eq!(list.results[1].chunk_id, "y");
        assert_eq!(list.results[1].rank, 2);
    }

    #[test]
    fn entity_names_include_aliases() {
        let entity = Entity::new("Persistent pulmonary hypertension").with_alias("PPHN");
        let names: Vec<_> = entity.names().collect();
        assert_eq!(names, vec!["Persistent pulmonary hypertension", "PPHN"]);
    }
}

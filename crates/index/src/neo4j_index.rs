use anyhow::{Context, Result};
use async_trait::async_trait;
use neo4rs::{Graph, Query};

use crate::{Entity, GraphStore, Relationship, STRUCTURAL_RELATIONS, SimilarChunk};

/// Shortest entity name or alias considered for matching against query text.
const MIN_NAME_LEN: i64 = 2;

/// Knowledge graph reads against Neo4j.
///
/// Expected layout: entity nodes carry `name` (and optionally `aliases`,
/// `description`); chunk nodes are labelled `Chunk` with `id` and `text`,
/// linked to each other by `SIMILAR {score}` and to entities by `HAS_ENTITY`.
#[derive(Clone)]
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        Ok(Self::new(graph))
    }

    pub async fn ping(&self) -> Result<()> {
        self.graph
            .run(neo4rs::query("RETURN 1"))
            .await
            .context("Neo4j health query failed")?;
        Ok(())
    }

    /// Get graph statistics
    pub async fn get_stats(&self) -> Result<GraphStats> {
        let entity_query = Query::new(
            "MATCH (e) WHERE e.name IS NOT NULL AND NOT e:Chunk AND NOT e:Document RETURN count(e) as count"
                .to_string(),
        );
        let mut result = self.graph.execute(entity_query).await?;
        let entity_count = if let Some(row) = result.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };

        let relation_query = Query::new(
            "MATCH ()-[r]->() WHERE NOT type(r) IN $structural RETURN count(r) as count".to_string(),
        )
        .param("structural", structural_relations());
        let mut result = self.graph.execute(relation_query).await?;
        let relation_count = if let Some(row) = result.next().await? {
            row.get::<i64>("count").unwrap_or(0) as usize
        } else {
            0
        };

        Ok(GraphStats {
            entity_count,
            relation_count,
        })
    }
}

fn structural_relations() -> Vec<String> {
    STRUCTURAL_RELATIONS.iter().map(|r| r.to_string()).collect()
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn match_entities(&self, text: &str, limit: usize) -> Result<Vec<Entity>> {
        if text.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query = Query::new(
            r#"
            MATCH (e)
            WHERE e.name IS NOT NULL
              AND NOT e:Chunk AND NOT e:Document
              AND (
                (size(e.name) >= $min_len AND toLower($text) CONTAINS toLower(e.name))
                OR any(alias IN coalesce(e.aliases, [])
                       WHERE size(alias) >= $min_len AND toLower($text) CONTAINS toLower(alias))
              )
            RETURN e.name AS name,
                   labels(e) AS labels,
                   coalesce(e.aliases, []) AS aliases,
                   e.description AS description
            ORDER BY size(e.name) DESC, e.name
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("text", text.to_string())
        .param("min_len", MIN_NAME_LEN)
        .param("limit", limit as i64);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Entity lookup failed")?;

        let mut entities = Vec::new();
        while let Some(row) = result.next().await? {
            let mut entity = Entity::new(row.get::<String>("name")?);
            entity.labels = row.get::<Vec<String>>("labels").unwrap_or_default();
            entity.aliases = row.get::<Vec<String>>("aliases").unwrap_or_default();
            if let Ok(description) = row.get::<String>("description") {
                entity
                    .properties
                    .insert("description".to_string(), serde_json::Value::String(description));
            }
            entities.push(entity);
        }

        Ok(entities)
    }

    async fn neighborhood(&self, names: &[String], limit: usize) -> Result<Vec<Relationship>> {
        if names.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let query = Query::new(
            r#"
            MATCH (a)-[r]-(b)
            WHERE a.name IN $names
              AND b.name IS NOT NULL
              AND NOT a:Chunk AND NOT a:Document
              AND NOT b:Chunk AND NOT b:Document
              AND NOT type(r) IN $structural
            WITH DISTINCT r
            RETURN startNode(r).name AS source,
                   type(r) AS relation,
                   endNode(r).name AS target,
                   r.confidence AS confidence
            ORDER BY coalesce(confidence, 0.0) DESC, source, relation, target
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("names", names.to_vec())
        .param("structural", structural_relations())
        .param("limit", limit as i64);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("Neighbourhood traversal failed")?;

        let mut relationships = Vec::new();
        while let Some(row) = result.next().await? {
            relationships.push(Relationship {
                source: row.get("source")?,
                relation: row.get("relation")?,
                target: row.get("target")?,
                confidence: row.get::<f64>("confidence").ok(),
            });
        }

        Ok(relationships)
    }

    async fn similar_chunks(&self, chunk_id: &str, limit: usize) -> Result<Vec<SimilarChunk>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query = Query::new(
            r#"
            MATCH (c:Chunk {id: $chunk_id})-[s:SIMILAR]-(o:Chunk)
            WHERE o.id <> $chunk_id
            OPTIONAL MATCH (o)-[:HAS_ENTITY]->(e)
            WITH o, max(coalesce(s.score, 0.0)) AS score, collect(DISTINCT e.name) AS entities
            RETURN o.id AS id, coalesce(o.text, '') AS text, score, entities
            ORDER BY score DESC, id
            LIMIT $limit
            "#
            .to_string(),
        )
        .param("chunk_id", chunk_id.to_string())
        .param("limit", limit as i64);

        let mut result = self
            .graph
            .execute(query)
            .await
            .context("SIMILAR chunk lookup failed")?;

        let mut chunks = Vec::new();
        while let Some(row) = result.next().await? {
            chunks.push(SimilarChunk {
                chunk_id: row.get("id")?,
                text: row.get("text")?,
                score: row.get::<f64>("score").unwrap_or(0.0),
                entities: row.get::<Vec<String>>("entities").unwrap_or_default(),
            });
        }

        Ok(chunks)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct GraphStats {
    pub entity_count: usize,
    pub relation_count: usize,
}

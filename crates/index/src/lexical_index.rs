use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{Chunk, Hit, LexicalStore};

/// BM25 search against an Elasticsearch / OpenSearch index over its REST API.
pub struct ElasticLexicalStore {
    base_url: String,
    index_name: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Deserialize)]
struct HitsEnvelope {
    hits: Vec<RawHit>,
}

#[derive(Deserialize)]
struct RawHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score")]
    score: Option<f32>,
    #[serde(rename = "_source", default)]
    source: serde_json::Value,
}

impl ElasticLexicalStore {
    pub fn new(base_url: String, index_name: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index_name,
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Authenticate with an Elastic Cloud API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn build_query(query: &str, limit: usize) -> serde_json::Value {
        json!({
            "size": limit,
            "query": {
                "match": {
                    "text": {
                        "query": query,
                        "fuzziness": "AUTO"
                    }
                }
            }
        })
    }

    fn parse_hit(raw: RawHit) -> Hit {
        let source = &raw.source;

        // Prefer the indexed chunk_id field; fall back to the document id.
        let chunk_id = source
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(raw.id);

        let chunk = Chunk {
            chunk_id,
            text: source
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            page_number: source
                .get("page_number")
                .and_then(|v| v.as_u64())
                .map(|p| p as u32),
            document_id: source
                .get("document_name")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        };

        Hit::new(chunk, raw.score.unwrap_or(0.0))
    }
}

#[async_trait]
impl LexicalStore for ElasticLexicalStore {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Hit>> {
        if limit == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}/_search", self.base_url, self.index_name);
        let mut request = self.client.post(&url).json(&Self::build_query(query, limit));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("ApiKey {key}"));
        }

        let response = request
            .send()
            .await
            .context("Failed to send search request to Elasticsearch")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Elasticsearch search failed ({}): {}", status, error_text);
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Elasticsearch response")?;

        let mut hits: Vec<Hit> = body.hits.hits.into_iter().map(Self::parse_hit).collect();
        hits.truncate(limit);

        tracing::debug!(index = %self.index_name, hits = hits.len(), "lexical search complete");
        Ok(hits)
    }

    fn id_field(&self) -> &str {
        "chunk_id"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn search_parses_hits_in_order() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/medical_chunks/_search")
                .header("Authorization", "ApiKey secret");
            then.status(200).json_body(json!({
                "hits": {
                    "hits": [
                        {
                            "_id": "es-1",
                            "_score": 7.5,
                            "_source": {
                                "chunk_id": "chunk_001",
                                "text": "Amoxicillin dosing for children",
                                "page_number": 12,
                                "document_name": "pediatrics.pdf"
                            }
                        },
                        {
                            "_id": "chunk_005",
                            "_score": 6.2,
                            "_source": { "text": "Penicillin alternatives" }
                        }
                    ]
                }
            }));
        });

        let store = ElasticLexicalStore::new(server.base_url(), "medical_chunks".to_string())
            .with_api_key("secret");
        let hits = store.search("amoxicillin dose", 10).await.unwrap();

        mock.assert_calls(1);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id(), "chunk_001");
        assert_eq!(hits[0].chunk.page_number, Some(12));
        assert_eq!(hits[0].chunk.document_id, "pediatrics.pdf");
        // Falls back to the document id when chunk_id is not stored.
        assert_eq!(hits[1].chunk_id(), "chunk_005");
    }

    #[tokio::test]
    async fn search_surfaces_http_errors() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/medical_chunks/_search");
            then.status(500).body("boom");
        });

        let store = ElasticLexicalStore::new(server.base_url(), "medical_chunks".to_string());
        let err = store.search("sepsis", 5).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn empty_query_skips_the_request() {
        let store = ElasticLexicalStore::new("http://127.0.0.1:1".to_string(), "x".to_string());
        assert!(store.search("   ", 5).await.unwrap().is_empty());
    }
}

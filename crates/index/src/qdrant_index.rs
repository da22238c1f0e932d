use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Chunk, Hit, VectorStore};

/// Cosine-similarity search over a Qdrant collection via its REST API.
pub struct QdrantVectorStore {
    base_url: String,
    collection_name: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    score: f32,
    #[serde(default)]
    payload: serde_json::Map<String, serde_json::Value>,
}

impl QdrantVectorStore {
    pub fn new(base_url: String, collection_name: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            collection_name,
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn parse_point(point: ScoredPoint) -> Option<Hit> {
        let payload = point.payload;

        let chunk_id = payload
            .get("chunk_id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        // Points without a chunk id cannot take part in fusion.
        if chunk_id.is_empty() {
            return None;
        }

        let chunk = Chunk {
            chunk_id,
            text: payload
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
            page_number: payload
                .get("page_number")
                .and_then(|v| v.as_u64())
                .map(|p| p as u32),
            document_id: payload
                .get("doc_id")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string(),
        };

        Some(Hit::new(chunk, point.score))
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn search(&self, embedding: &[f32], limit: usize) -> Result<Vec<Hit>> {
        if limit == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );

        let body = SearchRequest {
            vector: embedding,
            limit,
            with_payload: true,
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send search request to Qdrant")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            anyhow::bail!("Qdrant search failed: {}", error_text);
        }

        let result: SearchResponse = response
            .json()
            .await
            .context("Failed to parse Qdrant response")?;

        let hits: Vec<Hit> = result
            .result
            .into_iter()
            .filter_map(Self::parse_point)
            .take(limit)
            .collect();

        tracing::debug!(collection = %self.collection_name, hits = hits.len(), "vector search complete");
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
    use serde_json::json;

    #[tokio::test]
    async fn search_parses_payloads_and_skips_points_without_ids() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/collections/medical/points/search")
                .matches(|req| {
                    let body: serde_json::Value =
                        serde_json::from_slice(req.body().as_ref()).unwrap();
                    body["limit"] == 3 && body["with_payload"] == true
                });
            then.status(200).json_body(json!({
                "result": [
                    { "id": 1, "score": 0.89, "payload": {
                        "chunk_id": "chunk_001", "text": "Amoxicillin", "page_number": 4, "doc_id": "d1"
                    }},
                    { "id": 2, "score": 0.80, "payload": { "text": "orphan" }},
                    { "id": 3, "score": 0.75, "payload": { "chunk_id": "chunk_003", "text": "Otitis" }}
                ]
            }));
        });

        let store = QdrantVectorStore::new(server.base_url(), "medical".to_string());
        let hits = store.search(&[0.1, 0.2], 3).await.unwrap();

        mock.assert_calls(1);
        let ids: Vec<_> = hits.iter().map(Hit::chunk_id).collect();
        assert_eq!(ids, vec!["chunk_001", "chunk_003"]);
        assert_eq!(hits[0].chunk.document_id, "d1");
        assert!((hits[0].score - 0.89).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_reports_failures() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/collections/medical/points/search");
            then.status(404).body("collection not found");
        });

        let store = QdrantVectorStore::new(server.base_url(), "medical".to_string());
        let err = store.search(&[0.1], 3).await.unwrap_err();
        assert!(err.to_string().contains("collection not found"));
    }
}

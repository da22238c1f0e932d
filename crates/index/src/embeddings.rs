use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Embedder;

/// Ollama-compatible embedding client.
#[derive(Clone)]
pub struct EmbeddingClient {
    base_url: String,
    model: String,
    query_prefix: Option<String>,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            query_prefix: None,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "multilingual-e5-small".to_string(),
        )
    }

    /// Prefix prepended to every query before embedding.
    /// The e5 family expects `"query: "` on search queries.
    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query_prefix = Some(prefix.into());
        self
    }

    fn prepare(&self, text: &str) -> String {
        match &self.query_prefix {
            Some(prefix) if !text.starts_with(prefix.as_str()) => format!("{prefix}{text}"),
            _ => text.to_string(),
        }
    }

    /// Generate embedding for text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            prompt: self.prepare(text),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Embedding request failed: {}", response.status());
        }

        let embedding_response: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        if embedding_response.embedding.is_empty() {
            anyhow::bail!("Embedding response contained an empty vector");
        }

        Ok(embedding_response.embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        EmbeddingClient::embed(self, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn query_prefix_is_added_once() {
        let client = EmbeddingClient::default().with_query_prefix("query: ");
        assert_eq!(client.prepare("apne nedir"), "query: apne nedir");
        assert_eq!(client.prepare("query: apne nedir"), "query: apne nedir");
    }

    #[tokio::test]
    async fn embed_parses_vector() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embeddings").matches(|req| {
                let body: serde_json::Value =
                    serde_json::from_slice(req.body().as_ref()).unwrap();
                body["prompt"] == "query: sepsis"
            });
            then.status(200).json_body(json!({ "embedding": [0.1, 0.2, 0.3] }));
        });

        let client = EmbeddingClient::new(server.base_url(), "e5".to_string())
            .with_query_prefix("query: ");
        let embedding = client.embed("sepsis").await.unwrap();

        mock.assert_calls(1);
        assert_eq!(embedding.len(), 3);
    }

    #[tokio::test]
    async fn embed_fails_on_server_error() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(503);
        });

        let client = EmbeddingClient::new(server.base_url(), "e5".to_string());
        assert!(client.embed("sepsis").await.is_err());
    }
}

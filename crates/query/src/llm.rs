use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::orchestrator::Complexity;

/// Everything the answer generator sees for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub complexity: Complexity,
    pub language: String,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

#[derive(Clone)]
pub struct QueryLLM {
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl QueryLLM {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            temperature: 0.2,
            client: reqwest::Client::new(),
        }
    }

    pub fn default() -> Self {
        Self::new(
            "http://localhost:11434".to_string(),
            "llama3".to_string(),
        )
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token budget per answer; complex questions get room for longer answers.
    pub fn max_tokens(complexity: Complexity) -> u32 {
        match complexity {
            Complexity::Simple => 512,
            Complexity::Complex => 1500,
        }
    }

    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let request = OllamaRequest {
            model: self.model.clone(),
            prompt: prompt.to_string(),
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: max_tokens,
            },
        };

        let response = self.client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Ollama")?;

        if !response.status().is_success() {
            anyhow::bail!("Ollama request failed: {}", response.status());
        }

        let ollama_response: OllamaResponse = response
            .json()
            .await
            .context("Failed to parse Ollama response")?;

        Ok(ollama_response.response.trim().to_string())
    }
}

#[async_trait]
impl AnswerGenerator for QueryLLM {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.complete(&request.prompt, Self::max_tokens(request.complexity))
            .await
    }
}

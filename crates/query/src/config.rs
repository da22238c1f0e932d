use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{QueryError, Result};
use crate::strategy::GraphStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// RRF smoothing constant.
    pub k: f64,
    pub lexical_weight: f64,
    pub semantic_weight: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: 60.0,
            lexical_weight: 1.0,
            semantic_weight: 1.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.k.is_finite() || self.k < 0.0 {
            return Err(QueryError::Configuration(format!(
                "fusion k must be a non-negative number, got {}",
                self.k
            )));
        }
        for (name, weight) in [
            ("lexical_weight", self.lexical_weight),
            ("semantic_weight", self.semantic_weight),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(QueryError::Configuration(format!(
                    "fusion {name} must be positive, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub lexical_top_k: usize,
    pub semantic_top_k: usize,
    /// Passages kept after fusion.
    pub final_top_n: usize,
    pub fusion: FusionConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_top_k: 10,
            semantic_top_k: 10,
            final_top_n: 3,
            fusion: FusionConfig::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.lexical_top_k == 0 && self.semantic_top_k == 0 {
            return Err(QueryError::Configuration(
                "at least one of lexical_top_k and semantic_top_k must be positive".to_string(),
            ));
        }
        if self.final_top_n == 0 {
            return Err(QueryError::Configuration(
                "final_top_n must be positive".to_string(),
            ));
        }
        self.fusion.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub strategy: GraphStrategy,
    pub max_hops: usize,
    pub max_context_chars: usize,
    /// Upper bound on relationship triples collected by a local traversal.
    pub fan_out_cap: usize,
    pub max_seed_entities: usize,
    /// Fused chunks used as starting points for SIMILAR navigation.
    pub similar_seed_chunks: usize,
    pub similar_per_chunk: usize,
    pub snippet_chars: usize,
    pub timeout_ms: u64,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            strategy: GraphStrategy::Auto,
            max_hops: 2,
            max_context_chars: 2000,
            fan_out_cap: 40,
            max_seed_entities: 5,
            similar_seed_chunks: 3,
            similar_per_chunk: 3,
            snippet_chars: 150,
            timeout_ms: 8000,
        }
    }
}

impl ExpansionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_hops == 0 {
            return Err(QueryError::Configuration(
                "max_hops must be at least 1".to_string(),
            ));
        }
        if self.max_context_chars == 0 {
            return Err(QueryError::Configuration(
                "max_context_chars must be positive".to_string(),
            ));
        }
        if self.fan_out_cap == 0 {
            return Err(QueryError::Configuration(
                "fan_out_cap must be positive".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(QueryError::Configuration(
                "expansion timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Deadline for a single attempt against an external store.
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 250,
            max_backoff_ms: 2000,
            attempt_timeout_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.attempt_timeout_ms == 0 {
            return Err(QueryError::Configuration(
                "attempt timeout must be positive".to_string(),
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(QueryError::Configuration(format!(
                "max_backoff_ms ({}) is below initial_backoff_ms ({})",
                self.max_backoff_ms, self.initial_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Everything the orchestrator is configured with.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub retrieval: RetrievalConfig,
    pub expansion: ExpansionConfig,
    pub retry: RetryConfig,
}

impl QueryConfig {
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()?;
        self.expansion.validate()?;
        self.retry.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        RetrievalConfig::default().validate().unwrap();
        ExpansionConfig::default().validate().unwrap();
        QueryConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_attempt_timeout() {
        let mut config = QueryConfig::default();
        config.retry.attempt_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(QueryError::Configuration(_))));
    }

    #[test]
    fn rejects_backoff_ceiling_below_initial() {
        let config = RetryConfig {
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
            ..RetryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_weights() {
        let config = FusionConfig {
            semantic_weight: 0.0,
            ..FusionConfig::default()
        };
        assert!(matches!(config.validate(), Err(QueryError::Configuration(_))));
    }

    #[test]
    fn rejects_zero_hops() {
        let config = ExpansionConfig {
            max_hops: 0,
            ..ExpansionConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ExpansionConfig =
            serde_json::from_str(r#"{"strategy": "hybrid", "max_hops": 3}"#).unwrap();
        assert_eq!(config.strategy, GraphStrategy::Hybrid);
        assert_eq!(config.max_hops, 3);
        assert_eq!(config.max_context_chars, 2000);
    }
}

use anyhow::{Context, Result};
use query::{GraphStrategy, QueryConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub stores: StoreConfig,
    pub cache: CacheConfig,
    pub query: QueryConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // Short deadlines, narrow retrieval, aggressive caching
    Accurate,  // Patient retries, wider retrieval, no caching
    Balanced,  // Default
}

impl FromStr for OperationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(OperationMode::Fast),
            "balanced" => Ok(OperationMode::Balanced),
            "accurate" => Ok(OperationMode::Accurate),
            other => anyhow::bail!("unknown operation mode '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub elastic_url: String,
    pub elastic_index: String,
    pub elastic_api_key: Option<String>,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub qdrant_api_key: Option<String>,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    /// Serve the graph from a JSON snapshot instead of Neo4j.
    pub graph_snapshot: Option<PathBuf>,
    pub ollama_url: String,
    pub embedding_model: String,
    pub embedding_query_prefix: Option<String>,
    pub llm_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            elastic_url: "http://localhost:9200".to_string(),
            elastic_index: "medical_chunks".to_string(),
            elastic_api_key: None,
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_collection: "medical_chunks".to_string(),
            qdrant_api_key: None,
            neo4j_uri: "bolt://localhost:7687".to_string(),
            neo4j_user: "neo4j".to_string(),
            neo4j_password: "neo4j".to_string(),
            graph_snapshot: None,
            ollama_url: "http://localhost:11434".to_string(),
            embedding_model: "multilingual-e5-small".to_string(),
            embedding_query_prefix: Some("query: ".to_string()),
            llm_model: "llama3".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            stores: StoreConfig::default(),
            cache: CacheConfig {
                enabled: true,
                max_entries: 10000,
            },
            query: QueryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let mut config = Self {
            mode: OperationMode::Fast,
            cache: CacheConfig {
                enabled: true,
                max_entries: 50000,
            },
            ..Self::default()
        };
        config.query.retry = RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 100,
            max_backoff_ms: 500,
            attempt_timeout_ms: 2000,
        };
        config.query.retrieval.lexical_top_k = 5;
        config.query.retrieval.semantic_top_k = 5;
        config.query.expansion.max_hops = 1;
        config.query.expansion.timeout_ms = 3000;
        config
    }

    pub fn accurate_mode() -> Self {
        let mut config = Self {
            mode: OperationMode::Accurate,
            cache: CacheConfig {
                enabled: false,
                max_entries: 0,
            },
            ..Self::default()
        };
        config.query.retry = RetryConfig {
            max_retries: 4,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
            attempt_timeout_ms: 10000,
        };
        config.query.retrieval.lexical_top_k = 20;
        config.query.retrieval.semantic_top_k = 20;
        config.query.retrieval.final_top_n = 5;
        config.query.expansion.max_context_chars = 4000;
        config.query.expansion.timeout_ms = 20000;
        config
    }

    pub fn for_mode(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Balanced => Self::default(),
            OperationMode::Accurate => Self::accurate_mode(),
        }
    }

    /// Read the process environment. `main` loads `.env` before this runs.
    pub fn from_env() -> Result<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// `MODE` picks the preset, individual variables override it.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let env = Env(vars);

        let mode = env.parse::<OperationMode>("MODE")?.unwrap_or(OperationMode::Balanced);
        let mut config = Self::for_mode(mode);

        if let Some(addr) = env.string("BIND_ADDR") {
            config.server.bind_addr = addr;
        }

        let stores = &mut config.stores;
        env.set_string("ELASTIC_URL", &mut stores.elastic_url);
        env.set_string("ELASTIC_INDEX", &mut stores.elastic_index);
        stores.elastic_api_key = env.string("ELASTIC_API_KEY").or(stores.elastic_api_key.take());
        env.set_string("QDRANT_URL", &mut stores.qdrant_url);
        env.set_string("QDRANT_COLLECTION", &mut stores.qdrant_collection);
        stores.qdrant_api_key = env.string("QDRANT_API_KEY").or(stores.qdrant_api_key.take());
        env.set_string("NEO4J_URI", &mut stores.neo4j_uri);
        env.set_string("NEO4J_USER", &mut stores.neo4j_user);
        env.set_string("NEO4J_PASSWORD", &mut stores.neo4j_password);
        if let Some(path) = env.string("GRAPH_SNAPSHOT") {
            stores.graph_snapshot = Some(PathBuf::from(path));
        }
        env.set_string("OLLAMA_URL", &mut stores.ollama_url);
        env.set_string("EMBEDDING_MODEL", &mut stores.embedding_model);
        if let Some(prefix) = vars.get("EMBEDDING_QUERY_PREFIX") {
            // An explicitly empty prefix disables it.
            stores.embedding_query_prefix = Some(prefix.clone()).filter(|p| !p.is_empty());
        }
        env.set_string("LLM_MODEL", &mut stores.llm_model);

        if let Some(enabled) = env.parse::<bool>("CACHE_ENABLED")? {
            config.cache.enabled = enabled;
        }
        if let Some(max_entries) = env.parse::<usize>("CACHE_MAX_ENTRIES")? {
            config.cache.max_entries = max_entries;
        }

        let retrieval = &mut config.query.retrieval;
        env.set_parsed("LEXICAL_TOP_K", &mut retrieval.lexical_top_k)?;
        env.set_parsed("SEMANTIC_TOP_K", &mut retrieval.semantic_top_k)?;
        env.set_parsed("FINAL_TOP_N", &mut retrieval.final_top_n)?;
        env.set_parsed("RRF_K", &mut retrieval.fusion.k)?;
        env.set_parsed("RRF_LEXICAL_WEIGHT", &mut retrieval.fusion.lexical_weight)?;
        env.set_parsed("RRF_SEMANTIC_WEIGHT", &mut retrieval.fusion.semantic_weight)?;

        let expansion = &mut config.query.expansion;
        env.set_parsed::<GraphStrategy>("GRAPH_STRATEGY", &mut expansion.strategy)?;
        env.set_parsed("MAX_HOPS", &mut expansion.max_hops)?;
        env.set_parsed("MAX_CONTEXT_CHARS", &mut expansion.max_context_chars)?;
        env.set_parsed("FAN_OUT_CAP", &mut expansion.fan_out_cap)?;
        env.set_parsed("EXPANSION_TIMEOUT_MS", &mut expansion.timeout_ms)?;

        let retry = &mut config.query.retry;
        env.set_parsed("RETRY_MAX_RETRIES", &mut retry.max_retries)?;
        env.set_parsed("RETRY_ATTEMPT_TIMEOUT_MS", &mut retry.attempt_timeout_ms)?;

        config
            .query
            .validate()
            .context("Invalid query configuration")?;

        Ok(config)
    }
}

struct Env<'a>(&'a HashMap<String, String>);

impl Env<'_> {
    fn string(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn set_string(&self, key: &str, target: &mut String) {
        if let Some(value) = self.string(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e)),
            None => Ok(None),
        }
    }

    fn set_parsed<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(value) = self.parse(key)? {
            *target = value;
        }
        Ok(())
    }
}

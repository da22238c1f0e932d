mod cache;
mod config;
mod metrics;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use index::{
    ElasticLexicalStore, Embedder, EmbeddingClient, GraphStats, GraphStore, InMemoryGraph,
    Neo4jGraphStore, QdrantVectorStore,
};
use query::{
    Answer, AnswerRequest, AnswerTrace, ChunkReference, GraphContext, Orchestrator, QueryError,
    QueryLLM, Stores, insufficient_information_message,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cache::{Cache, CacheStats, CachedEmbedder};
use crate::config::AppConfig;
use crate::metrics::{Metrics, MetricsSnapshot, TimedOperation};

struct AppState {
    orchestrator: Orchestrator,
    metrics: Arc<Metrics>,
    cache: Arc<Cache>,
    graph: GraphBackend,
    http: reqwest::Client,
    elastic_url: String,
    qdrant_url: String,
}

#[derive(Clone)]
enum GraphBackend {
    Neo4j(Arc<Neo4jGraphStore>),
    Snapshot(Arc<InMemoryGraph>),
}

impl GraphBackend {
    fn store(&self) -> Arc<dyn GraphStore> {
        match self {
            GraphBackend::Neo4j(store) => store.clone() as Arc<dyn GraphStore>,
            GraphBackend::Snapshot(graph) => graph.clone() as Arc<dyn GraphStore>,
        }
    }

    async fn status(&self) -> String {
        match self {
            GraphBackend::Neo4j(store) => match store.ping().await {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("error: {:#}", e),
            },
            GraphBackend::Snapshot(_) => "ok (snapshot)".to_string(),
        }
    }

    async fn stats(&self) -> Option<GraphStats> {
        match self {
            GraphBackend::Neo4j(store) => match store.get_stats().await {
                Ok(stats) => Some(stats),
                Err(e) => {
                    warn!(error = %e, "Failed to read graph statistics");
                    None
                }
            },
            GraphBackend::Snapshot(graph) => Some(GraphStats {
                entity_count: graph.entity_count(),
                relation_count: graph.relation_count(),
            }),
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    lexical: String,
    vector: String,
    graph: String,
}

#[derive(Serialize)]
struct AnswerResponse {
    answer_text: String,
    sources: Vec<ChunkReference>,
    graph_context: Option<GraphContext>,
    /// Retrieval found nothing; `answer_text` is the localized notice.
    insufficient_information: bool,
    trace: Option<AnswerTrace>,
}

impl AnswerResponse {
    fn insufficient(language: &str) -> Self {
        Self {
            answer_text: insufficient_information_message(language).to_string(),
            sources: Vec::new(),
            graph_context: None,
            insufficient_information: true,
            trace: None,
        }
    }
}

impl From<Answer> for AnswerResponse {
    fn from(answer: Answer) -> Self {
        Self {
            answer_text: answer.answer_text,
            sources: answer.sources,
            graph_context: answer.graph_context,
            insufficient_information: false,
            trace: Some(answer.trace),
        }
    }
}

#[derive(Serialize)]
struct StatsResponse {
    metrics: MetricsSnapshot,
    cache: CacheStats,
    graph: Option<GraphStats>,
}

enum ApiError {
    BadRequest(String),
    Query(QueryError),
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        ApiError::Query(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Query(error) => {
                let status = match &error {
                    QueryError::AllSourcesUnavailable | QueryError::SourceUnavailable { .. } => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    QueryError::Generation(_) => StatusCode::BAD_GATEWAY,
                    QueryError::NoResultsFound => StatusCode::NOT_FOUND,
                    QueryError::GraphExpansion(_) | QueryError::Configuration(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, error.to_string())
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = AppConfig::from_env()?;
    info!(mode = ?config.mode, bind_addr = %config.server.bind_addr, "Configuration loaded");

    let state = Arc::new(build_state(&config).await?);
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

    info!("Server listening on http://{}", config.server.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

/// `RUST_LOG` filters, `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_state(config: &AppConfig) -> Result<AppState> {
    let stores_config = &config.stores;

    let mut lexical = ElasticLexicalStore::new(
        stores_config.elastic_url.clone(),
        stores_config.elastic_index.clone(),
    );
    if let Some(key) = &stores_config.elastic_api_key {
        lexical = lexical.with_api_key(key.clone());
    }

    let mut vector = QdrantVectorStore::new(
        stores_config.qdrant_url.clone(),
        stores_config.qdrant_collection.clone(),
    );
    if let Some(key) = &stores_config.qdrant_api_key {
        vector = vector.with_api_key(key.clone());
    }

    let mut embedding_client = EmbeddingClient::new(
        stores_config.ollama_url.clone(),
        stores_config.embedding_model.clone(),
    );
    if let Some(prefix) = &stores_config.embedding_query_prefix {
        embedding_client = embedding_client.with_query_prefix(prefix.clone());
    }

    let cache = Arc::new(Cache::new(config.cache.max_entries));
    let embedder: Arc<dyn Embedder> = if config.cache.enabled {
        Arc::new(CachedEmbedder::new(Arc::new(embedding_client), cache.clone()))
    } else {
        Arc::new(embedding_client)
    };

    let graph = match &stores_config.graph_snapshot {
        Some(path) => {
            let graph = InMemoryGraph::load_json(path).await?;
            info!(path = ?path, entities = graph.entity_count(), "Loaded graph snapshot");
            GraphBackend::Snapshot(Arc::new(graph))
        }
        None => {
            let store = Neo4jGraphStore::connect(
                &stores_config.neo4j_uri,
                &stores_config.neo4j_user,
                &stores_config.neo4j_password,
            )
            .await?;
            info!(uri = %stores_config.neo4j_uri, "Connected to Neo4j");
            GraphBackend::Neo4j(Arc::new(store))
        }
    };

    let llm = QueryLLM::new(stores_config.ollama_url.clone(), stores_config.llm_model.clone());

    let stores = Stores {
        lexical: Arc::new(lexical),
        vector: Arc::new(vector),
        embedder,
        graph: graph.store(),
    };
    let orchestrator = Orchestrator::new(stores, Arc::new(llm), config.query.clone())
        .context("Failed to configure orchestrator")?;

    Ok(AppState {
        orchestrator,
        metrics: Metrics::new(),
        cache,
        graph,
        http: reqwest::Client::new(),
        elastic_url: stores_config.elastic_url.clone(),
        qdrant_url: stores_config.qdrant_url.clone(),
    })
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/answer", post(answer))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn probe(client: &reqwest::Client, url: &str) -> String {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {}", e),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (lexical, vector, graph) = tokio::join!(
        probe(&state.http, &state.elastic_url),
        probe(&state.http, &state.qdrant_url),
        state.graph.status(),
    );

    let healthy = [&lexical, &vector, &graph]
        .iter()
        .all(|s| s.starts_with("ok"));

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        lexical,
        vector,
        graph,
    })
}

async fn answer(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".to_string()));
    }

    let timer = TimedOperation::start();
    let result = state.orchestrator.answer(&request).await;
    state.metrics.record_query(timer.elapsed());

    match result {
        Ok(answer) => {
            state.metrics.record_request(true);
            state.metrics.record_answer(&answer);
            Ok(Json(AnswerResponse::from(answer)))
        }
        Err(QueryError::NoResultsFound) => {
            state.metrics.record_request(true);
            state.metrics.record_no_results();
            Ok(Json(AnswerResponse::insufficient(&request.language)))
        }
        Err(e) => {
            warn!(error = %e, "Answer request failed");
            state.metrics.record_request(false);
            Err(e.into())
        }
    }
}

async fn get_stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        metrics: state.metrics.snapshot(),
        cache: state.cache.stats(),
        graph: state.graph.stats().await,
    })
}

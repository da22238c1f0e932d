use index::{Embedder, GraphStore, LexicalStore, RankedList, SourceKind, VectorStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{QueryConfig, RetrievalConfig};
use crate::context::{GraphContext, snippet};
use crate::error::{QueryError, Result};
use crate::expander::{ExpandOptions, GraphContextExpander};
use crate::fusion::{FusedResult, RrfFusion};
use crate::llm::{AnswerGenerator, GenerationRequest};
use crate::prompt::{build_prompt, is_turkish};
use crate::retry::RetryPolicy;
use crate::strategy::{GraphStrategy, ResolvedStrategy};

const REFERENCE_SNIPPET_CHARS: usize = 200;

/// Supplied by an upstream classifier; only simple questions skip the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    #[serde(default)]
    pub complexity: Complexity,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub history: Vec<Message>,
    /// Overrides the configured graph strategy for this call.
    #[serde(default)]
    pub strategy: Option<GraphStrategy>,
}

fn default_language() -> String {
    "en".to_string()
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            complexity: Complexity::default(),
            language: default_language(),
            history: Vec::new(),
            strategy: None,
        }
    }

    pub fn with_complexity(mut self, complexity: Complexity) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_strategy(mut self, strategy: GraphStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }
}

/// A fused passage as cited in the answer, `[Source N]` with N = `source_number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReference {
    pub source_number: usize,
    pub chunk_id: String,
    pub document_id: String,
    pub page_number: Option<u32>,
    pub fused_score: f64,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerTrace {
    pub request_id: Uuid,
    pub lexical_hits: usize,
    pub semantic_hits: usize,
    pub fused_chunks: usize,
    /// Sources that failed or timed out and were treated as empty.
    pub degraded_sources: Vec<SourceKind>,
    pub strategy: Option<ResolvedStrategy>,
    pub expansion_skipped: bool,
    pub retrieval_ms: u64,
    pub expansion_ms: u64,
    pub generation_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub answer_text: String,
    pub sources: Vec<ChunkReference>,
    pub graph_context: Option<GraphContext>,
    pub trace: AnswerTrace,
}

/// Reply used when retrieval finds nothing to ground an answer on.
pub fn insufficient_information_message(language: &str) -> &'static str {
    if is_turkish(language) {
        "Sağlanan kaynaklarda bu soruyu yanıtlamak için yeterli bilgi bulunamadı."
    } else {
        "The available sources do not contain enough information to answer this question."
    }
}

/// External stores the orchestrator reads from.
#[derive(Clone)]
pub struct Stores {
    pub lexical: Arc<dyn LexicalStore>,
    pub vector: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub graph: Arc<dyn GraphStore>,
}

struct Retrieval {
    lists: [RankedList; 2],
    degraded: Vec<SourceKind>,
}

pub struct Orchestrator {
    lexical: Arc<dyn LexicalStore>,
    vector: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    expander: GraphContextExpander,
    generator: Arc<dyn AnswerGenerator>,
    fusion: RrfFusion,
    retrieval: RetrievalConfig,
    expansion: ExpandOptions,
    retry: RetryPolicy,
}

impl Orchestrator {
    /// Validates the configuration and that both retrieval stores identify
    /// chunks by the same field.
    pub fn new(
        stores: Stores,
        generator: Arc<dyn AnswerGenerator>,
        config: QueryConfig,
    ) -> Result<Self> {
        config.validate()?;

        let lexical_id = stores.lexical.id_field();
        let vector_id = stores.vector.id_field();
        if lexical_id != vector_id {
            return Err(QueryError::Configuration(format!(
                "lexical store identifies chunks by '{}' but vector store by '{}'",
                lexical_id, vector_id
            )));
        }

        Ok(Self {
            lexical: stores.lexical,
            vector: stores.vector,
            embedder: stores.embedder,
            expander: GraphContextExpander::new(stores.graph, &config.expansion),
            generator,
            fusion: RrfFusion::new(config.retrieval.fusion.clone()),
            expansion: ExpandOptions::from_config(&config.expansion),
            retry: RetryPolicy::from_config(&config.retry),
            retrieval: config.retrieval,
        })
    }

    /// Fused passages for `query`, without graph expansion or generation.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<FusedResult>> {
        let retrieval = self.retrieve_lists(query).await?;
        let fused = self.fusion.fuse(&retrieval.lists, self.retrieval.final_top_n);
        if fused.is_empty() {
            return Err(QueryError::NoResultsFound);
        }
        Ok(fused)
    }

    pub async fn answer(&self, request: &AnswerRequest) -> Result<Answer> {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "answer",
            request_id = %request_id,
            complexity = ?request.complexity,
            language = %request.language,
        );

        self.answer_inner(request, request_id).instrument(span).await
    }

    async fn answer_inner(&self, request: &AnswerRequest, request_id: Uuid) -> Result<Answer> {
        let started = Instant::now();
        let query = request.query.trim();

        // Step 1: Lexical and semantic retrieval, fused
        let retrieval = self.retrieve_lists(query).await?;
        let lexical_hits = retrieval.lists[0].len();
        let semantic_hits = retrieval.lists[1].len();

        let fused = self.fusion.fuse(&retrieval.lists, self.retrieval.final_top_n);
        let retrieval_ms = started.elapsed().as_millis() as u64;

        if fused.is_empty() {
            info!(lexical_hits, semantic_hits, "No passages to answer from");
            return Err(QueryError::NoResultsFound);
        }

        // Step 2: Graph expansion for complex questions
        let expansion_started = Instant::now();
        let graph_context = match request.complexity {
            Complexity::Simple => {
                debug!("Simple question, skipping graph expansion");
                None
            }
            Complexity::Complex => {
                let options = match request.strategy {
                    Some(strategy) => self.expansion.with_strategy(strategy),
                    None => self.expansion,
                };
                Some(self.expander.expand(query, &fused, &options).await)
            }
        };
        let expansion_ms = expansion_started.elapsed().as_millis() as u64;

        // Step 3: Generate the answer
        let generation_started = Instant::now();
        let prompt = build_prompt(
            query,
            &fused,
            graph_context.as_ref(),
            &request.history,
            &request.language,
        );
        let answer_text = self
            .generator
            .generate(&GenerationRequest {
                prompt,
                complexity: request.complexity,
                language: request.language.clone(),
            })
            .await
            .map_err(|e| QueryError::Generation(format!("{e:#}")))?;
        let generation_ms = generation_started.elapsed().as_millis() as u64;

        let sources = fused.iter().enumerate().map(|(i, r)| reference(i + 1, r)).collect();

        let trace = AnswerTrace {
            request_id,
            lexical_hits,
            semantic_hits,
            fused_chunks: fused.len(),
            degraded_sources: retrieval.degraded,
            strategy: graph_context.as_ref().map(|c| c.strategy),
            expansion_skipped: graph_context.is_none(),
            retrieval_ms,
            expansion_ms,
            generation_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            fused = trace.fused_chunks,
            degraded_sources = trace.degraded_sources.len(),
            expansion_skipped = trace.expansion_skipped,
            total_ms = trace.total_ms,
            "Answer generated"
        );

        Ok(Answer {
            answer_text,
            sources,
            graph_context,
            trace,
        })
    }

    /// Both searches run concurrently; a failed one becomes an empty list.
    async fn retrieve_lists(&self, query: &str) -> Result<Retrieval> {
        let (lexical, semantic) = tokio::join!(self.lexical_list(query), self.semantic_list(query));

        let mut degraded = Vec::new();
        let mut unwrap_source = |source: SourceKind, outcome: Result<RankedList>| match outcome {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Retrieval source degraded to empty results");
                degraded.push(source);
                RankedList::empty(source)
            }
        };

        let lexical = unwrap_source(SourceKind::Lexical, lexical);
        let semantic = unwrap_source(SourceKind::Semantic, semantic);

        // A source disabled with top_k = 0 never counts as available.
        let enabled = [self.retrieval.lexical_top_k, self.retrieval.semantic_top_k]
            .iter()
            .filter(|&&top_k| top_k > 0)
            .count();
        if degraded.len() == enabled {
            return Err(QueryError::AllSourcesUnavailable);
        }

        Ok(Retrieval {
            lists: [lexical, semantic],
            degraded,
        })
    }

    async fn lexical_list(&self, query: &str) -> Result<RankedList> {
        let top_k = self.retrieval.lexical_top_k;
        if top_k == 0 {
            return Ok(RankedList::empty(SourceKind::Lexical));
        }

        let store = self.lexical.as_ref();
        let hits = self
            .retry
            .retry("lexical_search", move || store.search(query, top_k))
            .await
            .map_err(|e| unavailable(SourceKind::Lexical, e))?;

        Ok(RankedList::from_hits(SourceKind::Lexical, hits))
    }

    async fn semantic_list(&self, query: &str) -> Result<RankedList> {
        let top_k = self.retrieval.semantic_top_k;
        if top_k == 0 {
            return Ok(RankedList::empty(SourceKind::Semantic));
        }

        let embedder = self.embedder.as_ref();
        let embedding = self
            .retry
            .retry("embed_query", move || embedder.embed(query))
            .await
            .map_err(|e| unavailable(SourceKind::Semantic, e))?;

        let store = self.vector.as_ref();
        let embedding = embedding.as_slice();
        let hits = self
            .retry
            .retry("vector_search", move || store.search(embedding, top_k))
            .await
            .map_err(|e| unavailable(SourceKind::Semantic, e))?;

        Ok(RankedList::from_hits(SourceKind::Semantic, hits))
    }
}

fn unavailable(store: SourceKind, error: impl std::fmt::Display) -> QueryError {
    QueryError::SourceUnavailable {
        store,
        reason: error.to_string(),
    }
}

fn reference(source_number: usize, result: &FusedResult) -> ChunkReference {
    ChunkReference {
        source_number,
        chunk_id: result.chunk_id.clone(),
        document_id: result
            .chunk
            .as_ref()
            .map(|c| c.document_id.clone())
            .unwrap_or_default(),
        page_number: result.chunk.as_ref().and_then(|c| c.page_number),
        fused_score: result.score,
        lexical_rank: result.rank_in(SourceKind::Lexical),
        semantic_rank: result.rank_in(SourceKind::Semantic),
        snippet: snippet(result.text(), REFERENCE_SNIPPET_CHARS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use index::{Chunk, Entity, Hit, InMemoryGraph, Relationship};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::config::RetryConfig;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            text: text.to_string(),
            page_number: Some(10),
            document_id: "neonatology".to_string(),
        }
    }

    enum Behaviour {
        Hits(Vec<Hit>),
        Fail,
        Stall,
    }

    struct FakeLexical {
        behaviour: Behaviour,
        id_field: &'static str,
        calls: AtomicUsize,
    }

    impl FakeLexical {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                id_field: "chunk_id",
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LexicalStore for FakeLexical {
        async fn search(&self, _query: &str, limit: usize) -> anyhow::Result<Vec<Hit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Hits(hits) => Ok(hits.iter().take(limit).cloned().collect()),
                Behaviour::Fail => anyhow::bail!("connection refused"),
                Behaviour::Stall => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn id_field(&self) -> &str {
            self.id_field
        }
    }

    struct FakeVector {
        behaviour: Behaviour,
        id_field: &'static str,
    }

    #[async_trait]
    impl VectorStore for FakeVector {
        async fn search(&self, _embedding: &[f32], limit: usize) -> anyhow::Result<Vec<Hit>> {
            match &self.behaviour {
                Behaviour::Hits(hits) => Ok(hits.iter().take(limit).cloned().collect()),
                Behaviour::Fail => anyhow::bail!("collection not found"),
                Behaviour::Stall => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn id_field(&self) -> &str {
            self.id_field
        }
    }

    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
    }

    #[derive(Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AnswerGenerator for RecordingGenerator {
        async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            Ok("Surfactant is indicated [Source 1].".to_string())
        }
    }

    fn lexical_hits() -> Vec<Hit> {
        vec![
            Hit::new(chunk("A", "Surfactant dosing for RDS."), 14.2),
            Hit::new(chunk("B", "CPAP settings in preterm infants."), 11.0),
            Hit::new(chunk("C", "Thermoregulation basics."), 6.5),
        ]
    }

    fn semantic_hits() -> Vec<Hit> {
        vec![
            Hit::new(chunk("B", "CPAP settings in preterm infants."), 0.91),
            Hit::new(chunk("D", "LISA technique for surfactant."), 0.88),
            Hit::new(chunk("A", "Surfactant dosing for RDS."), 0.80),
        ]
    }

    fn graph() -> InMemoryGraph {
        let mut graph = InMemoryGraph::new();
        graph.add_entity(Entity::new("RDS").with_alias("respiratory distress syndrome"));
        graph.add_relationship(
            Relationship::new("surfactant", "TREATS", "RDS").with_confidence(0.95),
        );
        graph.add_chunk("B", "CPAP settings in preterm infants.", vec![]);
        graph.add_chunk("E", "Minimally invasive surfactant therapy outcomes.", vec!["surfactant".to_string()]);
        graph.add_similar("B", "E", 0.9);
        graph
    }

    fn fast_config() -> QueryConfig {
        QueryConfig {
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 10,
                max_backoff_ms: 10,
                attempt_timeout_ms: 200,
            },
            ..QueryConfig::default()
        }
    }

    fn orchestrator(
        lexical: Behaviour,
        semantic: Behaviour,
        generator: Arc<RecordingGenerator>,
    ) -> Orchestrator {
        let stores = Stores {
            lexical: Arc::new(FakeLexical::new(lexical)),
            vector: Arc::new(FakeVector {
                behaviour: semantic,
                id_field: "chunk_id",
            }),
            embedder: Arc::new(FakeEmbedder),
            graph: Arc::new(graph()),
        };
        Orchestrator::new(stores, generator, fast_config()).unwrap()
    }

    #[tokio::test]
    async fn simple_question_skips_graph_expansion() {
        let generator = Arc::new(RecordingGenerator::default());
        let orchestrator = orchestrator(
            Behaviour::Hits(lexical_hits()),
            Behaviour::Hits(semantic_hits()),
            generator.clone(),
        );

        let answer = orchestrator
            .answer(&AnswerRequest::new("surfactant for RDS"))
            .await
            .unwrap();

        assert!(answer.graph_context.is_none());
        assert!(answer.trace.expansion_skipped);
        assert_eq!(answer.answer_text, "Surfactant is indicated [Source 1].");

        let ids: Vec<&str> = answer.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "D"]);
        assert_eq!(answer.sources[0].source_number, 1);
        assert_eq!(answer.sources[1].lexical_rank, Some(1));
        assert_eq!(answer.sources[1].semantic_rank, Some(3));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("[Source 1] (Page 10)\nCPAP settings"));
        assert!(!prompts[0].contains("Knowledge graph relations"));
    }

    #[tokio::test]
    async fn complex_question_gets_graph_context() {
        let generator = Arc::new(RecordingGenerator::default());
        let orchestrator = orchestrator(
            Behaviour::Hits(lexical_hits()),
            Behaviour::Hits(semantic_hits()),
            generator.clone(),
        );

        let request = AnswerRequest::new("How is RDS treated in preterm infants?")
            .with_complexity(Complexity::Complex)
            .with_strategy(GraphStrategy::Hybrid);
        let answer = orchestrator.answer(&request).await.unwrap();

        let context = answer.graph_context.unwrap();
        assert_eq!(context.strategy, ResolvedStrategy::Hybrid);
        assert!(context.text.contains("surfactant --[TREATS]--> RDS"));
        assert!(context.text.contains("[E] Minimally invasive surfactant therapy outcomes."));
        assert_eq!(answer.trace.strategy, Some(ResolvedStrategy::Hybrid));

        let prompts = generator.prompts.lock().unwrap();
        assert!(prompts[0].contains("surfactant --[TREATS]--> RDS"));
    }

    #[tokio::test]
    async fn failed_source_degrades_to_the_other() {
        let orchestrator = orchestrator(
            Behaviour::Fail,
            Behaviour::Hits(semantic_hits()),
            Arc::new(RecordingGenerator::default()),
        );

        let answer = orchestrator
            .answer(&AnswerRequest::new("surfactant"))
            .await
            .unwrap();

        assert_eq!(answer.trace.degraded_sources, vec![SourceKind::Lexical]);
        assert_eq!(answer.trace.lexical_hits, 0);
        let ids: Vec<&str> = answer.sources.iter().map(|s| s.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D", "A"]);
    }

    #[tokio::test]
    async fn failed_source_is_retried() {
        let lexical = Arc::new(FakeLexical::new(Behaviour::Fail));
        let stores = Stores {
            lexical: lexical.clone(),
            vector: Arc::new(FakeVector {
                behaviour: Behaviour::Hits(semantic_hits()),
                id_field: "chunk_id",
            }),
            embedder: Arc::new(FakeEmbedder),
            graph: Arc::new(graph()),
        };
        let orchestrator =
            Orchestrator::new(stores, Arc::new(RecordingGenerator::default()), fast_config())
                .unwrap();

        orchestrator.retrieve("surfactant").await.unwrap();
        assert_eq!(lexical.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_source_is_treated_as_empty() {
        let orchestrator = orchestrator(
            Behaviour::Hits(lexical_hits()),
            Behaviour::Stall,
            Arc::new(RecordingGenerator::default()),
        );

        let answer = orchestrator
            .answer(&AnswerRequest::new("surfactant"))
            .await
            .unwrap();

        assert_eq!(answer.trace.degraded_sources, vec![SourceKind::Semantic]);
        assert_eq!(answer.sources[0].chunk_id, "A");
    }

    #[tokio::test]
    async fn all_sources_failing_is_an_error() {
        let orchestrator = orchestrator(
            Behaviour::Fail,
            Behaviour::Fail,
            Arc::new(RecordingGenerator::default()),
        );

        let result = orchestrator.answer(&AnswerRequest::new("surfactant")).await;
        assert!(matches!(result, Err(QueryError::AllSourcesUnavailable)));
    }

    #[tokio::test]
    async fn only_enabled_source_failing_is_an_error() {
        let mut config = fast_config();
        config.retrieval.lexical_top_k = 0;
        let stores = Stores {
            lexical: Arc::new(FakeLexical::new(Behaviour::Hits(lexical_hits()))),
            vector: Arc::new(FakeVector {
                behaviour: Behaviour::Fail,
                id_field: "chunk_id",
            }),
            embedder: Arc::new(FakeEmbedder),
            graph: Arc::new(graph()),
        };
        let orchestrator =
            Orchestrator::new(stores, Arc::new(RecordingGenerator::default()), config).unwrap();

        let result = orchestrator.answer(&AnswerRequest::new("surfactant")).await;
        assert!(matches!(result, Err(QueryError::AllSourcesUnavailable)));
    }

    #[tokio::test]
    async fn empty_retrieval_reports_no_results() {
        let generator = Arc::new(RecordingGenerator::default());
        let orchestrator = orchestrator(
            Behaviour::Hits(Vec::new()),
            Behaviour::Hits(Vec::new()),
            generator.clone(),
        );

        let result = orchestrator.answer(&AnswerRequest::new("surfactant")).await;
        assert!(matches!(result, Err(QueryError::NoResultsFound)));
        assert!(generator.prompts.lock().unwrap().is_empty());
    }

    #[test]
    fn mismatched_identifier_fields_are_rejected() {
        let stores = Stores {
            lexical: Arc::new(FakeLexical::new(Behaviour::Hits(Vec::new()))),
            vector: Arc::new(FakeVector {
                behaviour: Behaviour::Hits(Vec::new()),
                id_field: "doc_id",
            }),
            embedder: Arc::new(FakeEmbedder),
            graph: Arc::new(InMemoryGraph::new()),
        };

        let result = Orchestrator::new(stores, Arc::new(RecordingGenerator::default()), QueryConfig::default());
        assert!(matches!(result, Err(QueryError::Configuration(_))));
    }

    #[test]
    fn insufficient_information_is_localized() {
        assert!(insufficient_information_message("tr").contains("yeterli bilgi"));
        assert!(insufficient_information_message("en").contains("enough information"));
    }

    #[test]
    fn request_defaults_from_json() {
        let request: AnswerRequest =
            serde_json::from_str(r#"{"query": "apne nedir?", "language": "tr"}"#).unwrap();
        assert_eq!(request.complexity, Complexity::Simple);
        assert!(request.history.is_empty());
        assert!(request.strategy.is_none());

        let request: AnswerRequest = serde_json::from_str(
            r#"{"query": "x", "complexity": "complex", "strategy": "global"}"#,
        )
        .unwrap();
        assert_eq!(request.complexity, Complexity::Complex);
        assert_eq!(request.strategy, Some(GraphStrategy::Global));
        assert_eq!(request.language, "en");
    }
}

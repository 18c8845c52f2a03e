//! End-to-end tests of the chat pipeline with in-process embedder, model,
//! and connector implementations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use docchat::chat::{ChatEngine, ChatSettings, RetrievalMode};
use docchat::connectors::{FetchOutcome, FetchRequest, SourceConnector};
use docchat::llm::ChatModel;
use docchat::session::{Phase, SessionStore};
use docchat::store::NamespaceSet;
use docchat_core::embedding::Embedder;
use docchat_core::models::SourceDocument;
use docchat_core::prompt::{ModelRequest, PromptAssembler};
use docchat_core::{Namespace, RagError, Result, Role};
use futures::stream::{self, BoxStream, StreamExt};
use tempfile::TempDir;

const VOCAB: [&str; 10] = [
    "sky", "blue", "grass", "green", "color", "rust", "cargo", "crate", "deploy", "kubernetes",
];

/// One dimension per vocabulary word; other words are ignored.
struct VocabEmbedder {
    calls: AtomicUsize,
    down: AtomicBool,
}

impl VocabEmbedder {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        }
    }
}

fn vocab_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; VOCAB.len()];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
    {
        if let Some(i) = VOCAB.iter().position(|v| *v == word) {
            v[i] += 1.0;
        }
    }
    v
}

#[async_trait]
impl Embedder for VocabEmbedder {
    fn model_name(&self) -> &str {
        "vocab"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Let concurrent turns interleave here, as a network call would.
        tokio::task::yield_now().await;
        if self.down.load(Ordering::SeqCst) {
            return Err(RagError::Transient("embedding endpoint unreachable".into()));
        }
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::upstream(Some(500), "embedding service unavailable"))
    }
}

/// Answers with a fixed string and remembers every request.
struct RecordingModel {
    answer: String,
    fail: bool,
    requests: Mutex<Vec<ModelRequest>>,
}

impl RecordingModel {
    fn answering(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            fail: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            answer: String::new(),
            fail: true,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn last_request(&self) -> ModelRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl ChatModel for RecordingModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(RagError::Transient("model timed out".into()));
        }
        Ok(self.answer.clone())
    }

    async fn stream(&self, request: &ModelRequest) -> Result<BoxStream<'static, Result<String>>> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return Err(RagError::Transient("model timed out".into()));
        }
        let parts: Vec<Result<String>> = self
            .answer
            .split_inclusive(' ')
            .map(|p| Ok(p.to_string()))
            .collect();
        Ok(stream::iter(parts).boxed())
    }
}

/// Web connector stand-in returning the same page on every fetch.
struct FixedConnector {
    fetches: AtomicUsize,
    error: Option<String>,
}

#[async_trait]
impl SourceConnector for FixedConnector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Web
    }

    async fn fetch(&self, _request: &FetchRequest) -> FetchOutcome {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.error {
            return FetchOutcome::failed(error.clone());
        }
        FetchOutcome::ok(vec![SourceDocument::new(
            "https://example.com/rust",
            "Rust projects are built with cargo. Each crate has a manifest.",
        )
        .with_title("Rust book")
        .with_locator("https://example.com/rust")])
    }
}

fn settings(size: usize, overlap: usize, top_k: usize) -> ChatSettings {
    ChatSettings {
        chunk_size: size,
        chunk_overlap: overlap,
        top_k,
        assembler: PromptAssembler::default(),
    }
}

fn engine_with(
    tmp: &TempDir,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    settings: ChatSettings,
) -> ChatEngine {
    let stores = NamespaceSet::open(tmp.path()).unwrap();
    ChatEngine::new(embedder, model, stores, Arc::new(SessionStore::new(20)), settings)
}

#[tokio::test]
async fn sky_question_retrieves_sky_chunk() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(RecordingModel::answering("It is blue."));
    let engine = engine_with(&tmp, Arc::new(VocabEmbedder::new()), model.clone(), settings(20, 5, 1));

    let report = engine
        .ingest(
            None,
            Namespace::Documents,
            SourceDocument::new("facts.txt", "The sky is blue. Grass is green."),
        )
        .await
        .unwrap();
    assert_eq!(report.chunks, 2);

    let reply = engine.ask(None, &RetrievalMode::Documents, "sky color").await;
    assert_eq!(reply.error, None);
    assert_eq!(reply.answer, "It is blue.");
    assert_eq!(reply.sources.len(), 1);
    assert!(reply.sources[0].excerpt.contains("sky is blue"));
    assert_eq!(reply.sources[0].label, "facts.txt");

    let request = model.last_request();
    assert_eq!(request.messages[0].role, Role::System);
    assert!(request.messages[0].content.contains("sky is blue"));
    assert_eq!(request.messages.last().unwrap().content, "sky color");
}

#[tokio::test]
async fn empty_namespace_still_answers() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(VocabEmbedder::new());
    let model = Arc::new(RecordingModel::answering("I don't know."));
    let engine = engine_with(&tmp, embedder.clone(), model.clone(), settings(100, 10, 3));

    let reply = engine.ask(None, &RetrievalMode::Documents, "what colour is the sky?").await;
    assert_eq!(reply.error, None);
    assert_eq!(reply.answer, "I don't know.");
    assert!(reply.sources.is_empty());
    assert!(reply.notices.iter().any(|n| n.contains("empty")));
    assert!(model.last_request().sources.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn embedding_outage_falls_back_to_keywords() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(VocabEmbedder::new());
    let model = Arc::new(RecordingModel::answering("Roll it out."));
    let engine = engine_with(&tmp, embedder.clone(), model.clone(), settings(200, 20, 2));
    for (id, text) in [
        ("ops.md", "We deploy every service to kubernetes with a rolling update."),
        ("nature.md", "The grass is green and the sky is blue."),
    ] {
        engine
            .ingest(None, Namespace::Documents, SourceDocument::new(id, text))
            .await
            .unwrap();
    }

    embedder.down.store(true, Ordering::SeqCst);
    let reply = engine
        .ask(None, &RetrievalMode::Documents, "how do we deploy to kubernetes?")
        .await;

    assert_eq!(reply.error, None);
    assert_eq!(reply.sources.len(), 1);
    assert_eq!(reply.sources[0].source_id, "ops.md");
    assert!(reply.notices.iter().any(|n| n.contains("keyword search")));
    assert!(model.last_request().messages[0].content.contains("rolling update"));
}

#[tokio::test]
async fn failed_embedding_stores_nothing() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(
        &tmp,
        Arc::new(FailingEmbedder),
        Arc::new(RecordingModel::answering("unused")),
        settings(20, 5, 3),
    );

    let err = engine
        .ingest(
            None,
            Namespace::Documents,
            SourceDocument::new("facts.txt", "The sky is blue. Grass is green. Rust uses cargo."),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Upstream { status: Some(500), .. }));

    let status = engine.stores().get(Namespace::Documents).status();
    assert_eq!(status.chunks, 0);
    assert!(status.sources.is_empty());
    assert!(!status.files_present);
}

#[tokio::test]
async fn whitespace_document_adds_nothing() {
    let tmp = TempDir::new().unwrap();
    let embedder = Arc::new(VocabEmbedder::new());
    let engine = engine_with(
        &tmp,
        embedder.clone(),
        Arc::new(RecordingModel::answering("unused")),
        settings(20, 5, 3),
    );

    let report = engine
        .ingest(None, Namespace::Documents, SourceDocument::new("blank.txt", "  \n\t "))
        .await
        .unwrap();
    assert_eq!(report.chunks, 0);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reopened_store_gives_same_results() {
    let tmp = TempDir::new().unwrap();
    let question = "deploy with kubernetes";

    let first = {
        let engine = engine_with(
            &tmp,
            Arc::new(VocabEmbedder::new()),
            Arc::new(RecordingModel::answering("ok")),
            settings(40, 10, 3),
        );
        for (id, text) in [
            ("ops.md", "We deploy every service to kubernetes with a rolling update."),
            ("build.md", "Every crate is built by cargo; rust toolchains are pinned."),
            ("nature.md", "The grass is green and the sky is blue."),
        ] {
            engine
                .ingest(None, Namespace::Documents, SourceDocument::new(id, text))
                .await
                .unwrap();
        }
        engine.ask(None, &RetrievalMode::Documents, question).await
    };

    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("ok")),
        settings(40, 10, 3),
    );
    assert_eq!(engine.stores().get(Namespace::Documents).status().sources.len(), 3);
    let second = engine.ask(None, &RetrievalMode::Documents, question).await;

    assert!(!first.sources.is_empty());
    assert_eq!(first.sources, second.sources);
    assert_eq!(first.sources[0].source_id, "ops.md");
}

#[tokio::test]
async fn connector_pages_are_indexed_once() {
    let tmp = TempDir::new().unwrap();
    let connector = Arc::new(FixedConnector {
        fetches: AtomicUsize::new(0),
        error: None,
    });
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("Use cargo.")),
        settings(30, 5, 2),
    )
    .with_connector(connector.clone());

    let first = engine.ask(None, &RetrievalMode::Web, "how do I build a rust crate").await;
    assert_eq!(first.error, None);
    assert!(!first.sources.is_empty());
    assert_eq!(first.sources[0].locator.as_deref(), Some("https://example.com/rust"));
    let chunks_after_first = engine.stores().get(Namespace::Web).status().chunks;

    engine.ask(None, &RetrievalMode::Web, "cargo").await;
    let status = engine.stores().get(Namespace::Web).status();

    assert_eq!(connector.fetches.load(Ordering::SeqCst), 2);
    assert_eq!(status.sources.len(), 1);
    assert_eq!(status.chunks, chunks_after_first);
    assert_eq!(engine.stores().get(Namespace::Documents).status().chunks, 0);
}

#[tokio::test]
async fn concurrent_turns_index_a_page_once() {
    let single = {
        let tmp = TempDir::new().unwrap();
        let engine = engine_with(
            &tmp,
            Arc::new(VocabEmbedder::new()),
            Arc::new(RecordingModel::answering("Use cargo.")),
            settings(30, 5, 2),
        )
        .with_connector(Arc::new(FixedConnector {
            fetches: AtomicUsize::new(0),
            error: None,
        }));
        engine.ask(None, &RetrievalMode::Web, "cargo").await;
        engine.stores().get(Namespace::Web).status().chunks
    };

    let tmp = TempDir::new().unwrap();
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("Use cargo.")),
        settings(30, 5, 2),
    )
    .with_connector(Arc::new(FixedConnector {
        fetches: AtomicUsize::new(0),
        error: None,
    }));

    let (a, b) = tokio::join!(
        engine.ask(None, &RetrievalMode::Web, "how do I build a rust crate"),
        engine.ask(None, &RetrievalMode::Web, "what does cargo do"),
    );
    assert_eq!(a.error, None);
    assert_eq!(b.error, None);

    let status = engine.stores().get(Namespace::Web).status();
    assert_eq!(status.sources.len(), 1);
    assert_eq!(status.chunks, single);
}

#[tokio::test]
async fn connector_failure_becomes_notice() {
    let tmp = TempDir::new().unwrap();
    let connector = Arc::new(FixedConnector {
        fetches: AtomicUsize::new(0),
        error: Some("search returned HTTP 503".to_string()),
    });
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("No idea.")),
        settings(30, 5, 2),
    )
    .with_connector(connector);

    let reply = engine.ask(None, &RetrievalMode::Web, "rust").await;
    assert_eq!(reply.error, None);
    assert_eq!(reply.answer, "No idea.");
    assert!(reply.notices.iter().any(|n| n.contains("HTTP 503")));
}

#[tokio::test]
async fn missing_connector_is_reported() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("ok")),
        settings(30, 5, 2),
    );

    let mode = RetrievalMode::Confluence { spaces: vec![] };
    let reply = engine.ask(None, &mode, "runbook").await;
    assert_eq!(reply.error, None);
    assert!(reply.notices.iter().any(|n| n.contains("confluence")));
}

#[tokio::test]
async fn history_only_grows_on_success() {
    let tmp = TempDir::new().unwrap();
    let good = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("Blue.")),
        settings(30, 5, 2),
    );
    let id = good.sessions().create();

    let reply = good.ask(Some(&id), &RetrievalMode::Documents, "sky?").await;
    assert_eq!(reply.error, None);
    let history = good.sessions().history(&id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text, "sky?");
    assert_eq!(history[1].text, "Blue.");
    assert_eq!(good.sessions().phase(&id, Namespace::Documents), Phase::Idle);

    let tmp2 = TempDir::new().unwrap();
    let bad = engine_with(
        &tmp2,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::failing()),
        settings(30, 5, 2),
    );
    let id = bad.sessions().create();
    let reply = bad.ask(Some(&id), &RetrievalMode::Documents, "sky?").await;
    assert!(reply.error.unwrap().contains("timed out"));
    assert!(bad.sessions().history(&id).is_empty());
    assert_eq!(bad.sessions().phase(&id, Namespace::Documents), Phase::Idle);
}

#[tokio::test]
async fn second_turn_sees_history() {
    let tmp = TempDir::new().unwrap();
    let model = Arc::new(RecordingModel::answering("Blue."));
    let engine = engine_with(&tmp, Arc::new(VocabEmbedder::new()), model.clone(), settings(30, 5, 2));
    let id = engine.sessions().create();

    engine.ask(Some(&id), &RetrievalMode::Documents, "sky?").await;
    engine.ask(Some(&id), &RetrievalMode::Documents, "and grass?").await;

    let roles: Vec<Role> = model.last_request().messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
}

#[tokio::test]
async fn streaming_records_exchange_when_done() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::answering("The sky is blue.")),
        settings(20, 5, 2),
    );
    engine
        .ingest(
            None,
            Namespace::Documents,
            SourceDocument::new("facts.txt", "The sky is blue. Grass is green."),
        )
        .await
        .unwrap();
    let id = engine.sessions().create();

    let reply = engine
        .ask_streaming(Some(id.clone()), &RetrievalMode::Documents, "sky color")
        .await;
    assert!(!reply.sources.is_empty());
    assert!(engine.sessions().history(&id).is_empty());

    let deltas: Vec<String> = reply.deltas.map(|d| d.unwrap()).collect().await;
    assert!(deltas.len() > 1);
    assert_eq!(deltas.concat(), "The sky is blue.");

    let history = engine.sessions().history(&id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "The sky is blue.");
    assert_eq!(engine.sessions().phase(&id, Namespace::Documents), Phase::Idle);
}

#[tokio::test]
async fn streaming_failure_yields_error_item() {
    let tmp = TempDir::new().unwrap();
    let engine = engine_with(
        &tmp,
        Arc::new(VocabEmbedder::new()),
        Arc::new(RecordingModel::failing()),
        settings(20, 5, 2),
    );
    let id = engine.sessions().create();

    let reply = engine
        .ask_streaming(Some(id.clone()), &RetrievalMode::Documents, "sky")
        .await;
    let items: Vec<Result<String>> = reply.deltas.collect().await;
    assert_eq!(items.len(), 1);
    assert!(items[0].is_err());
    assert!(engine.sessions().history(&id).is_empty());
}

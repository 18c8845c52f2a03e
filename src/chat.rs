//! Chat orchestrator.
//!
//! [`ChatEngine`] runs one conversational turn end to end:
//!
//! ```text
//! mode ──▶ connector.fetch ──▶ ingest new sources ──┐
//!                                                   ▼
//! question ──▶ retrieve(top_k) ──▶ PromptAssembler ──▶ ChatModel ──▶ reply
//!                                       ▲
//!                          session history
//! ```
//!
//! When the question cannot be embedded, the namespace is ranked by keyword
//! instead. Turn-level failures (connector errors, retrieval errors, model
//! errors) never escape as `Err`: they become notices or the reply's `error`
//! field, and session history is only extended when the model answers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use docchat_core::chunk::chunk_text;
use docchat_core::embedding::Embedder;
use docchat_core::index::VectorIndex;
use docchat_core::models::{ChunkMetadata, IndexEntry, RetrievalResult, SourceDocument};
use docchat_core::prompt::{ModelRequest, PromptAssembler};
use docchat_core::retriever::retrieve;
use docchat_core::{Namespace, RagError, Result};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::connector_confluence::ConfluenceConnector;
use crate::connector_octane::OctaneConnector;
use crate::connector_web::WebConnector;
use crate::connectors::{FetchRequest, SourceConnector};
use crate::embedding::OpenAiEmbedder;
use crate::http::{build_client, HttpSettings};
use crate::llm::{ChatModel, OpenAiChat};
use crate::session::{Phase, PhaseGuard, SessionStore};
use crate::store::{Duplicates, NamespaceSet, NamespaceStatus, SourceRecord};

const EXCERPT_CHARS: usize = 240;

/// Where a question's context comes from, chosen explicitly per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RetrievalMode {
    Documents,
    Web,
    Confluence {
        #[serde(default)]
        spaces: Vec<String>,
    },
    Octane {
        #[serde(default)]
        shared_space: Option<String>,
        #[serde(default)]
        workspace: Option<String>,
    },
}

impl RetrievalMode {
    pub fn namespace(&self) -> Namespace {
        match self {
            RetrievalMode::Documents => Namespace::Documents,
            RetrievalMode::Web => Namespace::Web,
            RetrievalMode::Confluence { .. } => Namespace::Confluence,
            RetrievalMode::Octane { .. } => Namespace::Octane,
        }
    }

    /// Build a mode from a namespace name plus the optional per-mode fields.
    pub fn from_parts(
        mode: &str,
        spaces: Vec<String>,
        shared_space: Option<String>,
        workspace: Option<String>,
    ) -> Result<Self> {
        Ok(match mode.parse::<Namespace>()? {
            Namespace::Documents => RetrievalMode::Documents,
            Namespace::Web => RetrievalMode::Web,
            Namespace::Confluence => RetrievalMode::Confluence { spaces },
            Namespace::Octane => RetrievalMode::Octane {
                shared_space,
                workspace,
            },
        })
    }

    fn fetch_request(&self, question: &str) -> FetchRequest {
        let mut request = FetchRequest::new(question);
        match self {
            RetrievalMode::Confluence { spaces } => request.spaces = spaces.clone(),
            RetrievalMode::Octane {
                shared_space,
                workspace,
            } => {
                request.shared_space = shared_space.clone();
                request.workspace = workspace.clone();
            }
            RetrievalMode::Documents | RetrievalMode::Web => {}
        }
        request
    }
}

#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub assembler: PromptAssembler,
}

impl ChatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.size,
            chunk_overlap: config.chunking.overlap,
            top_k: config.retrieval.top_k,
            assembler: PromptAssembler::new(
                config.retrieval.system_prompt.clone(),
                config.retrieval.max_prompt_chars,
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub namespace: Namespace,
    pub source_id: String,
    pub chunks: usize,
}

/// A cited excerpt as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    /// Citation number used in the prompt (`[1]`, `[2]`, ...).
    pub index: usize,
    pub label: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub score: f32,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub notices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StreamingReply {
    pub sources: Vec<SourceRef>,
    pub notices: Vec<String>,
    pub deltas: BoxStream<'static, Result<String>>,
}

struct Prepared {
    request: ModelRequest,
    notices: Vec<String>,
    guard: PhaseGuard,
}

pub struct ChatEngine {
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    stores: NamespaceSet,
    connectors: HashMap<Namespace, Arc<dyn SourceConnector>>,
    sessions: Arc<SessionStore>,
    settings: ChatSettings,
}

impl ChatEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        stores: NamespaceSet,
        sessions: Arc<SessionStore>,
        settings: ChatSettings,
    ) -> Self {
        Self {
            embedder,
            model,
            stores,
            connectors: HashMap::new(),
            sessions,
            settings,
        }
    }

    /// Register a connector for the namespace it reports.
    pub fn with_connector(mut self, connector: Arc<dyn SourceConnector>) -> Self {
        self.connectors.insert(connector.namespace(), connector);
        self
    }

    /// Wire the OpenAI-compatible backends, the stores under
    /// `storage.data_dir`, and every connector.
    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = Arc::new(OpenAiEmbedder::from_config(&config.openai)?);
        let model = Arc::new(OpenAiChat::from_config(&config.openai)?);
        let stores = NamespaceSet::open(&config.storage.data_dir)?;
        let sessions = Arc::new(SessionStore::from_config(&config.session));

        let settings = HttpSettings::from_openai(&config.openai);
        let plain = build_client(&settings)?;
        let with_cookies = build_client(&settings.clone().with_cookies())?;

        Ok(Self::new(embedder, model, stores, sessions, ChatSettings::from_config(config))
            .with_connector(Arc::new(WebConnector::new(plain.clone(), &config.web)))
            .with_connector(Arc::new(ConfluenceConnector::new(plain, &config.confluence)))
            .with_connector(Arc::new(OctaneConnector::new(with_cookies, &config.octane))))
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn stores(&self) -> &NamespaceSet {
        &self.stores
    }

    pub fn status(&self) -> Vec<NamespaceStatus> {
        self.stores.iter().map(|s| s.status()).collect()
    }

    pub async fn clear(&self, namespace: Namespace) -> Result<()> {
        self.stores.get(namespace).clear().await
    }

    /// Chunk, embed, and store one document, all or nothing.
    ///
    /// Whitespace-only text is accepted and stores nothing.
    pub async fn ingest(
        &self,
        session: Option<&str>,
        namespace: Namespace,
        document: SourceDocument,
    ) -> Result<IngestReport> {
        let _guard = PhaseGuard::enter(self.sessions.clone(), session, namespace, Phase::Ingesting);
        self.ingest_document(namespace, document, Duplicates::Keep).await
    }

    async fn ingest_document(
        &self,
        namespace: Namespace,
        document: SourceDocument,
        duplicates: Duplicates,
    ) -> Result<IngestReport> {
        let SourceDocument {
            source_id,
            title,
            locator,
            text,
        } = document;

        if text.trim().is_empty() {
            tracing::info!(namespace = %namespace, source = %source_id, "nothing to ingest");
            return Ok(IngestReport {
                namespace,
                source_id,
                chunks: 0,
            });
        }

        let chunks = chunk_text(
            &source_id,
            &text,
            self.settings.chunk_size,
            self.settings.chunk_overlap,
        )?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != chunks.len() {
            return Err(RagError::upstream(
                None,
                format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    chunks.len()
                ),
            ));
        }

        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_id: chunk.id,
                vector,
                metadata: ChunkMetadata {
                    source_id: chunk.source_id,
                    title: title.clone(),
                    locator: locator.clone(),
                    ordinal: chunk.ordinal,
                    text: chunk.text,
                },
            })
            .collect();

        let record = SourceRecord {
            source_id: source_id.clone(),
            title,
            added_at: Utc::now(),
            chunks: entries.len(),
        };
        let added = self
            .stores
            .get(namespace)
            .ingest_with(entries, record, duplicates)
            .await?;

        tracing::info!(namespace = %namespace, source = %source_id, chunks = added, "ingested");
        Ok(IngestReport {
            namespace,
            source_id,
            chunks: added,
        })
    }

    /// Answer `question` in `mode`. Never fails; problems are reported in
    /// the reply.
    pub async fn ask(&self, session: Option<&str>, mode: &RetrievalMode, question: &str) -> ChatReply {
        let question = question.trim();
        if question.is_empty() {
            return ChatReply {
                answer: String::new(),
                sources: Vec::new(),
                notices: Vec::new(),
                error: Some("The question is empty.".to_string()),
            };
        }

        let Prepared {
            request,
            notices,
            guard,
        } = self.prepare(session, mode, question).await;
        let sources = source_refs(&request.sources);

        guard.advance(Phase::Answering);
        match self.model.complete(&request).await {
            Ok(answer) => {
                if let Some(id) = session {
                    self.sessions.append_exchange(id, question, &answer);
                }
                ChatReply {
                    answer,
                    sources,
                    notices,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "chat model request failed");
                ChatReply {
                    answer: String::new(),
                    sources,
                    notices,
                    error: Some(format!("The language model request failed: {}", e)),
                }
            }
        }
    }

    /// Like [`ask`](Self::ask) but streams the answer.
    ///
    /// Fetching and retrieval finish before this returns. The exchange is
    /// recorded in the session once the stream ends without error.
    pub async fn ask_streaming(
        &self,
        session: Option<String>,
        mode: &RetrievalMode,
        question: &str,
    ) -> StreamingReply {
        let question = question.trim().to_string();
        if question.is_empty() {
            return StreamingReply {
                sources: Vec::new(),
                notices: Vec::new(),
                deltas: stream::once(async {
                    Err(RagError::config("the question is empty"))
                })
                .boxed(),
            };
        }

        let Prepared {
            request,
            notices,
            guard,
        } = self.prepare(session.as_deref(), mode, &question).await;
        let sources = source_refs(&request.sources);

        guard.advance(Phase::Answering);
        let inner = match self.model.stream(&request).await {
            Ok(inner) => inner,
            Err(e) => {
                tracing::warn!(error = %e, "chat model stream failed to start");
                return StreamingReply {
                    sources,
                    notices,
                    deltas: stream::once(async move { Err(e) }).boxed(),
                };
            }
        };

        let state = Relay {
            inner,
            answer: String::new(),
            finished: false,
            sessions: self.sessions.clone(),
            session,
            question,
            guard: Some(guard),
        };

        let deltas = stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(delta)) => {
                    st.answer.push_str(&delta);
                    Some((Ok(delta), st))
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.guard.take();
                    Some((Err(e), st))
                }
                None => {
                    if let Some(id) = st.session.as_deref() {
                        st.sessions.append_exchange(id, &st.question, &st.answer);
                    }
                    st.guard.take();
                    None
                }
            }
        })
        .boxed();

        StreamingReply {
            sources,
            notices,
            deltas,
        }
    }

    async fn prepare(&self, session: Option<&str>, mode: &RetrievalMode, question: &str) -> Prepared {
        let namespace = mode.namespace();
        let guard = PhaseGuard::enter(self.sessions.clone(), session, namespace, Phase::Retrieving);
        let mut notices = Vec::new();

        if namespace != Namespace::Documents {
            self.refresh_from_connector(mode, question, &mut notices).await;
        }

        let store = self.stores.get(namespace);
        let retrieved = if store.index().is_empty() {
            notices.push(format!(
                "The {} index is empty; answering without sources.",
                namespace
            ));
            Vec::new()
        } else {
            match retrieve(
                self.embedder.as_ref(),
                store.index(),
                question,
                self.settings.top_k,
            )
            .await
            {
                Ok(results) => results,
                Err(e) => {
                    tracing::warn!(namespace = %namespace, error = %e, "semantic retrieval failed, using keyword search");
                    let hits = store.index().keyword_search(question, self.settings.top_k);
                    if hits.is_empty() {
                        notices.push(format!(
                            "Semantic search failed and no keyword match was found; answering without context: {}",
                            e
                        ));
                    } else {
                        notices.push(format!("Semantic search failed; using keyword search instead: {}", e));
                    }
                    hits
                }
            }
        };

        let history = session
            .map(|id| self.sessions.history(id))
            .unwrap_or_default();
        let request = self.settings.assembler.assemble(&history, &retrieved, question);

        Prepared {
            request,
            notices,
            guard,
        }
    }

    async fn refresh_from_connector(
        &self,
        mode: &RetrievalMode,
        question: &str,
        notices: &mut Vec<String>,
    ) {
        let namespace = mode.namespace();
        let Some(connector) = self.connectors.get(&namespace) else {
            notices.push(format!("No {} connector is available.", namespace));
            return;
        };

        let outcome = connector.fetch(&mode.fetch_request(question)).await;
        if let Some(error) = outcome.error {
            notices.push(format!("{}: {}", connector.name(), error));
        }

        let store = self.stores.get(namespace);
        for document in outcome.documents {
            if store.contains_source(&document.source_id) {
                tracing::debug!(source = %document.source_id, "already indexed, skipping");
                continue;
            }
            let source_id = document.source_id.clone();
            if let Err(e) = self
                .ingest_document(namespace, document, Duplicates::Skip)
                .await
            {
                tracing::warn!(source = %source_id, error = %e, "connector document not ingested");
                notices.push(format!("Could not index {}: {}", source_id, e));
            }
        }
    }
}

struct Relay {
    inner: BoxStream<'static, Result<String>>,
    answer: String,
    finished: bool,
    sessions: Arc<SessionStore>,
    session: Option<String>,
    question: String,
    guard: Option<PhaseGuard>,
}

pub fn source_refs(sources: &[RetrievalResult]) -> Vec<SourceRef> {
    sources
        .iter()
        .enumerate()
        .map(|(i, r)| SourceRef {
            index: i + 1,
            label: r.chunk.label().to_string(),
            source_id: r.chunk.metadata.source_id.clone(),
            locator: r.chunk.metadata.locator.clone(),
            score: r.score,
            excerpt: excerpt(&r.chunk.metadata.text),
        })
        .collect()
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((i, _)) => format!("{}…", &trimmed[..i]),
        None => trimmed.to_string(),
    }
}

//! # docchat
//!
//! A retrieval-augmented chat server. Users upload documents or pick a live
//! source (web search, Confluence, Octane); text is chunked, embedded, and
//! kept in a per-namespace vector index, and each question is answered by
//! an OpenAI-compatible model grounded in the top-scoring excerpts.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Upload / CLI │──▶│ Chunk+Embed  │──▶│ NamespaceStore│
//! │ Connectors   │   │ (core)       │   │ index.bin+meta│
//! └──────────────┘   └──────────────┘   └───────┬───────┘
//!                                               │ retrieve
//!                                               ▼
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │  HTTP / SSE  │◀──│  ChatEngine   │
//!                    │  (axum)      │   │ prompt + LLM  │
//!                    └──────────────┘   └───────────────┘
//! ```
//!
//! The pipeline types (chunking, vector index, retrieval, prompt assembly,
//! error taxonomy) live in the `docchat-core` crate; this crate supplies the
//! network clients, persistence, connectors, and the server.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`http`] | Shared reqwest client construction and error classification |
//! | [`openai`] | OpenAI-compatible request plumbing with retries |
//! | [`embedding`] | Embeddings endpoint client |
//! | [`llm`] | Chat completions, blocking and streamed |
//! | [`store`] | Persistent per-namespace vector stores |
//! | [`session`] | Chat sessions and turn phases |
//! | [`connectors`] | Live source abstraction |
//! | [`connector_web`] | Web search connector |
//! | [`connector_confluence`] | Confluence connector |
//! | [`connector_octane`] | Octane connector |
//! | [`candidates`] | Ordered fallback over endpoint candidates |
//! | [`html`] | HTML to text |
//! | [`extract`] | Text extraction for uploads |
//! | [`scan`] | Local file discovery for the CLI |
//! | [`chat`] | Turn orchestration |
//! | [`server`] | HTTP server |

pub mod candidates;
pub mod chat;
pub mod config;
pub mod connector_confluence;
pub mod connector_octane;
pub mod connector_web;
pub mod connectors;
pub mod embedding;
pub mod extract;
pub mod html;
pub mod http;
pub mod llm;
pub mod openai;
pub mod scan;
pub mod server;
pub mod session;
pub mod store;

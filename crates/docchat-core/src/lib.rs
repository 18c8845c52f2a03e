//! # docchat core
//!
//! I/O-free pipeline logic for docchat: data model, error taxonomy,
//! chunking, the embedding trait, the in-memory vector index, semantic and
//! keyword retrieval, and prompt assembly.
//!
//! This crate contains no HTTP client, filesystem access, or async runtime.
//! The `docchat` application crate supplies those and wires everything into
//! the chat orchestrator.
//!
//! ```text
//!  text ──▶ chunk ──▶ Embedder ──▶ FlatIndex ◀── retrieve ◀── question
//!                                                   │
//!                                history ──▶ PromptAssembler ──▶ ModelRequest
//! ```

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod models;
pub mod prompt;
pub mod retriever;

pub use error::{RagError, Result};
pub use models::{Namespace, Role, Turn};

//! Core data types that flow through ingestion and retrieval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RagError;

/// An isolated retrieval domain with its own index and cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Documents,
    Web,
    Confluence,
    Octane,
}

impl Namespace {
    pub const ALL: [Namespace; 4] = [
        Namespace::Documents,
        Namespace::Web,
        Namespace::Confluence,
        Namespace::Octane,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Documents => "documents",
            Namespace::Web => "web",
            Namespace::Confluence => "confluence",
            Namespace::Octane => "octane",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "documents" | "docs" => Ok(Namespace::Documents),
            "web" => Ok(Namespace::Web),
            "confluence" => Ok(Namespace::Confluence),
            "octane" => Ok(Namespace::Octane),
            other => Err(RagError::config(format!(
                "unknown namespace '{}'; expected documents, web, confluence, or octane",
                other
            ))),
        }
    }
}

/// A bounded slice of source text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub ordinal: usize,
    pub text: String,
}

/// Descriptive data stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Where the chunk came from (URL, page link), when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub ordinal: usize,
    pub text: String,
}

/// A vector plus metadata, ready to be added to an index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
}

/// A chunk as stored in an index. `row` is the insertion-order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub row: u64,
    pub chunk_id: String,
    #[serde(flatten)]
    pub metadata: ChunkMetadata,
}

impl IndexedChunk {
    /// Human-facing label: title when known, otherwise the source id.
    pub fn label(&self) -> &str {
        self.metadata
            .title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.metadata.source_id)
    }
}

/// One search hit. Produced per query, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: IndexedChunk,
    pub score: f32,
}

/// Raw text handed to the ingestion path by an upload or a connector.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    pub source_id: String,
    pub title: Option<String>,
    pub locator: Option<String>,
    pub text: String,
}

impl SourceDocument {
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: None,
            locator: None,
            text: text.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_locator(mut self, locator: impl Into<String>) -> Self {
        self.locator = Some(locator.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
        }
    }
}

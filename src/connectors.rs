//! Source connector trait.
//!
//! A connector fetches external content for one namespace and hands it back
//! as [`SourceDocument`]s ready for chunking and embedding. Connectors never
//! return `Err`: a failed fetch yields an empty document list plus a
//! descriptive error string that the orchestrator turns into a notice.
//!
//! | Connector | Namespace | Upstream |
//! |-----------|-----------|----------|
//! | [`WebConnector`](crate::connector_web::WebConnector) | `web` | DuckDuckGo HTML search |
//! | [`ConfluenceConnector`](crate::connector_confluence::ConfluenceConnector) | `confluence` | Confluence REST (CQL) |
//! | [`OctaneConnector`](crate::connector_octane::OctaneConnector) | `octane` | ALM Octane REST |

use async_trait::async_trait;
use docchat_core::models::SourceDocument;
use docchat_core::Namespace;

/// Parameters of one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub query: String,
    /// Maximum number of documents to return. Connectors clamp it to their
    /// own bounds; `0` means the connector default.
    pub limit: usize,
    /// Confluence space keys to restrict the search to.
    pub spaces: Vec<String>,
    pub shared_space: Option<String>,
    pub workspace: Option<String>,
}

impl FetchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub documents: Vec<SourceDocument>,
    pub error: Option<String>,
}

impl FetchOutcome {
    pub fn ok(documents: Vec<SourceDocument>) -> Self {
        Self {
            documents,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            documents: Vec::new(),
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Short identifier used in logs and notices (e.g. `"confluence"`).
    fn name(&self) -> &str;

    /// Namespace that fetched documents are ingested into.
    fn namespace(&self) -> Namespace;

    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome;
}

/// Clamp a requested limit into `1..=max`, substituting `default` for 0.
pub fn clamp_limit(requested: usize, default: usize, max: usize) -> usize {
    let limit = if requested == 0 { default } else { requested };
    limit.clamp(1, max)
}

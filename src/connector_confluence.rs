//! Confluence connector.
//!
//! Searches pages with CQL and fetches each hit's rendered body. Works with
//! Atlassian Cloud (`/wiki/rest/api`) and Server/Data Center (`/rest/api`)
//! by trying both API roots in order.
//!
//! Authentication: a token of the form `user:token` is sent as HTTP Basic,
//! anything else as a Bearer token.

use async_trait::async_trait;
use docchat_core::models::SourceDocument;
use docchat_core::Namespace;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::candidates::try_in_order;
use crate::config::ConfluenceConfig;
use crate::connectors::{clamp_limit, FetchOutcome, FetchRequest, SourceConnector};
use crate::html::html_to_text;

const MAX_LIMIT: usize = 25;
const CONTENT_EXPAND: &str = "body.view,body.export_view,body.storage";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    content: Option<ContentRef>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentRef {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<ContentBody>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentBody {
    #[serde(default)]
    view: Option<BodyValue>,
    #[serde(default)]
    export_view: Option<BodyValue>,
    #[serde(default)]
    storage: Option<BodyValue>,
}

#[derive(Debug, Deserialize)]
struct BodyValue {
    #[serde(default)]
    value: Option<String>,
}

impl ContentBody {
    /// First non-blank representation: view, then export_view, then storage.
    fn best_html(&self) -> Option<&str> {
        [&self.view, &self.export_view, &self.storage]
            .into_iter()
            .filter_map(|b| b.as_ref().and_then(|b| b.value.as_deref()))
            .find(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageHit {
    pub id: String,
    pub title: String,
    pub url: String,
}

pub struct ConfluenceConnector {
    http: reqwest::Client,
    base_url: Option<String>,
    token: Option<String>,
    default_spaces: Vec<String>,
    default_limit: usize,
}

impl ConfluenceConnector {
    pub fn new(http: reqwest::Client, config: &ConfluenceConfig) -> Self {
        Self {
            http,
            base_url: config
                .base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            token: config.access_token.clone(),
            default_spaces: config.spaces.clone(),
            default_limit: config.limit,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, String)],
    ) -> Result<T, String> {
        let mut req = self
            .http
            .get(url)
            .query(params)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = self.token.as_deref() {
            req = match token.split_once(':') {
                Some((user, secret)) => req.basic_auth(user, Some(secret)),
                None => req.bearer_auth(token),
            };
        }

        let response = req.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        response.json::<T>().await.map_err(|e| e.to_string())
    }

    async fn search(
        &self,
        base: &str,
        query: &str,
        spaces: &[String],
        limit: usize,
    ) -> Result<Vec<PageHit>, String> {
        let params = [("cql", build_cql(query, spaces)), ("limit", limit.to_string())];
        let response: SearchResponse = try_in_order(url_candidates(base, "search"), |url| {
            let params = &params;
            async move { self.get_json::<SearchResponse>(&url, params).await }
        })
        .await
        .map_err(|e| format!("Confluence search failed: {}", e))?;

        Ok(response
            .results
            .into_iter()
            .filter_map(|r| {
                let content = r.content?;
                let id = match content.id? {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some(PageHit {
                    title: content.title.or(r.title).unwrap_or_default(),
                    url: absolute_url(base, r.url.as_deref().unwrap_or_default()),
                    id,
                })
            })
            .take(limit)
            .collect())
    }

    async fn page_text(&self, base: &str, hit: &PageHit) -> Result<SourceDocument, String> {
        let params = [("expand", CONTENT_EXPAND.to_string())];
        let path = format!("content/{}", hit.id);
        let content: ContentResponse = try_in_order(url_candidates(base, &path), |url| {
            let params = &params;
            async move { self.get_json::<ContentResponse>(&url, params).await }
        })
        .await
        .map_err(|e| format!("page {}: {}", hit.id, e))?;

        let text = content
            .body
            .as_ref()
            .and_then(ContentBody::best_html)
            .map(html_to_text)
            .unwrap_or_default();
        if text.is_empty() {
            return Err(format!("page {} has no body", hit.id));
        }

        let title = content
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| hit.title.clone());
        let mut doc = SourceDocument::new(format!("confluence:{}", hit.id), text).with_title(title);
        if !hit.url.is_empty() {
            doc = doc.with_locator(hit.url.clone());
        }
        Ok(doc)
    }
}

#[async_trait]
impl SourceConnector for ConfluenceConnector {
    fn name(&self) -> &str {
        "confluence"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Confluence
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let Some(base) = self.base_url.as_deref() else {
            return FetchOutcome::failed(
                "Confluence is not configured (set confluence.base_url or CONFLUENCE_BASE_URL)",
            );
        };
        let query = request.query.trim();
        if query.is_empty() {
            return FetchOutcome::ok(Vec::new());
        }

        let spaces = if request.spaces.is_empty() {
            &self.default_spaces
        } else {
            &request.spaces
        };
        let limit = clamp_limit(request.limit, self.default_limit, MAX_LIMIT);

        let hits = match self.search(base, query, spaces, limit).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "confluence search failed");
                return FetchOutcome::failed(e);
            }
        };

        let results = join_all(hits.iter().map(|hit| self.page_text(base, hit))).await;
        let mut documents = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(doc) => documents.push(doc),
                Err(e) => errors.push(e),
            }
        }

        tracing::info!(pages = documents.len(), failed = errors.len(), "confluence fetch done");
        FetchOutcome {
            documents,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }
}

/// API URLs to try for `path`, Cloud layout first.
pub fn url_candidates(base: &str, path: &str) -> Vec<String> {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match base.strip_suffix("/wiki") {
        Some(root) => vec![
            format!("{}/rest/api/{}", base, path),
            format!("{}/rest/api/{}", root, path),
        ],
        None => vec![
            format!("{}/wiki/rest/api/{}", base, path),
            format!("{}/rest/api/{}", base, path),
        ],
    }
}

pub fn build_cql(query: &str, spaces: &[String]) -> String {
    let mut cql = format!("type = page AND text ~ {}", cql_string(query));
    let keys: Vec<String> = spaces
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(cql_string)
        .collect();
    if !keys.is_empty() {
        cql.push_str(&format!(" AND space in ({})", keys.join(",")));
    }
    cql
}

/// Quote a CQL string literal. Backslashes are escaped before quotes.
fn cql_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Make a page link absolute against the configured base URL.
pub fn absolute_url(base: &str, link: &str) -> String {
    let link = link.trim();
    if link.is_empty() || link.starts_with("http://") || link.starts_with("https://") {
        return link.to_string();
    }
    let base = base.trim_end_matches('/');
    if link.starts_with('/') {
        format!("{}{}", base, link)
    } else {
        format!("{}/{}", base, link)
    }
}

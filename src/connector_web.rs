//! Ad-hoc web search connector.
//!
//! Queries DuckDuckGo's HTML endpoint, follows up to `web.max_results`
//! result links, and converts each page to plain text. The page URL is the
//! source id, so a page already in the `web` namespace is not fetched into
//! it twice.

use async_trait::async_trait;
use docchat_core::models::SourceDocument;
use docchat_core::Namespace;
use futures::future::join_all;
use scraper::{Html, Selector};
use url::Url;

use crate::config::WebConfig;
use crate::connectors::{clamp_limit, FetchOutcome, FetchRequest, SourceConnector};
use crate::html::{collapse_whitespace, html_title, html_to_text};

const MAX_RESULTS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

pub struct WebConnector {
    http: reqwest::Client,
    search_url: String,
    max_results: usize,
}

impl WebConnector {
    pub fn new(http: reqwest::Client, config: &WebConfig) -> Self {
        Self {
            http,
            search_url: config.search_url.clone(),
            max_results: config.max_results,
        }
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("web search request failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("web search returned HTTP {}", status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| format!("web search body unreadable: {}", e))
    }

    async fn fetch_page(&self, hit: &SearchHit) -> Result<SourceDocument, String> {
        let response = self
            .http
            .get(&hit.url)
            .send()
            .await
            .map_err(|e| format!("{}: {}", hit.url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("{}: HTTP {}", hit.url, status.as_u16()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| format!("{}: {}", hit.url, e))?;

        let text = html_to_text(&body);
        if text.is_empty() {
            return Err(format!("{}: page has no text", hit.url));
        }
        let title = html_title(&body).unwrap_or_else(|| hit.title.clone());
        Ok(SourceDocument::new(hit.url.clone(), text)
            .with_title(title)
            .with_locator(hit.url.clone()))
    }
}

#[async_trait]
impl SourceConnector for WebConnector {
    fn name(&self) -> &str {
        "web"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Web
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let query = request.query.trim();
        if query.is_empty() {
            return FetchOutcome::ok(Vec::new());
        }

        let page = match self.search(query).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(error = %e, "web search failed");
                return FetchOutcome::failed(e);
            }
        };

        let limit = clamp_limit(request.limit, self.max_results, MAX_RESULTS);
        let hits = parse_search_results(&page, limit);
        if hits.is_empty() {
            return FetchOutcome::ok(Vec::new());
        }

        let results = join_all(hits.iter().map(|hit| self.fetch_page(hit))).await;
        let mut documents = Vec::new();
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(doc) => documents.push(doc),
                Err(e) => errors.push(e),
            }
        }

        tracing::info!(fetched = documents.len(), failed = errors.len(), "web fetch done");
        FetchOutcome {
            documents,
            error: (!errors.is_empty()).then(|| format!("some pages failed: {}", errors.join("; "))),
        }
    }
}

/// Extract up to `limit` distinct result links from a DuckDuckGo HTML page.
pub fn parse_search_results(html: &str, limit: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a.result__a") else {
        return Vec::new();
    };

    let mut hits: Vec<SearchHit> = Vec::new();
    for anchor in document.select(&selector) {
        if hits.len() >= limit {
            break;
        }
        let Some(url) = anchor.value().attr("href").and_then(decode_result_link) else {
            continue;
        };
        if hits.iter().any(|h| h.url == url) {
            continue;
        }
        hits.push(SearchHit {
            url,
            title: collapse_whitespace(&anchor.text().collect::<String>()),
        });
    }
    hits
}

/// Resolve DuckDuckGo redirect links (`/l/?uddg=<target>`) to the target.
pub fn decode_result_link(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{}", href)
    } else {
        href.to_string()
    };

    let parsed = Url::parse(&absolute).ok()?;
    let target = parsed
        .query_pairs()
        .find(|(k, _)| k == "uddg")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| parsed.to_string());

    let target = Url::parse(&target).ok()?;
    matches!(target.scheme(), "http" | "https").then(|| target.to_string())
}

//! Shared `reqwest` client construction.
//!
//! Every upstream family (OpenAI, Confluence, Octane, web) gets its own
//! client built from the same settings: overall and connect timeouts, an
//! optional proxy, and optional certificate-verification bypass.

use std::time::Duration;

use docchat_core::{RagError, Result};

use crate::config::OpenAiConfig;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub proxy_url: Option<String>,
    pub disable_ssl: bool,
    /// Keep cookies between requests (Octane session login).
    pub cookie_store: bool,
}

impl HttpSettings {
    pub fn from_openai(config: &OpenAiConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            proxy_url: config.proxy_url.clone(),
            disable_ssl: config.disable_ssl,
            cookie_store: false,
        }
    }

    pub fn with_cookies(mut self) -> Self {
        self.cookie_store = true;
        self
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
            proxy_url: None,
            disable_ssl: false,
            cookie_store: false,
        }
    }
}

pub fn build_client(settings: &HttpSettings) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("docchat/", env!("CARGO_PKG_VERSION")))
        .cookie_store(settings.cookie_store);

    if let Some(proxy) = settings.proxy_url.as_deref() {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| RagError::config(format!("invalid proxy url '{}': {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }
    if settings.disable_ssl {
        tracing::warn!("TLS certificate verification is disabled");
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
        .build()
        .map_err(|e| RagError::config(format!("failed to build HTTP client: {}", e)))
}

/// Map a transport-level failure onto the pipeline taxonomy.
pub fn classify_send_error(err: reqwest::Error) -> RagError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RagError::Transient(err.to_string())
    } else {
        RagError::upstream(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// Map a non-success status onto the pipeline taxonomy. 429 is retryable.
pub fn classify_status(status: reqwest::StatusCode, body: &str) -> RagError {
    let message = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        RagError::Transient(message)
    } else {
        RagError::upstream(Some(status.as_u16()), message)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

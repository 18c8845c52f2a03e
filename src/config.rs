//! Configuration parsing and validation.
//!
//! docchat is configured via a TOML file (default `./config/docchat.toml`).
//! Every section is optional and falls back to defaults, so a missing file
//! simply yields [`Config::default`]. Selected environment variables
//! override file values when they are set and non-empty.
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:5000"
//!
//! [openai]
//! model = "gpt-4o-mini"
//! embedding_model = "text-embedding-3-small"
//!
//! [chunking]
//! size = 1200
//! overlap = 200
//!
//! [retrieval]
//! top_k = 5
//!
//! [confluence]
//! base_url = "https://example.atlassian.net/wiki"
//! spaces = ["ENG"]
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OPENAI_API_KEY` | `openai.api_key` |
//! | `OPENAI_BASE_URL` | `openai.base_url` |
//! | `PROXY_URL` | `openai.proxy_url` |
//! | `DISABLE_SSL` | `openai.disable_ssl` (`1`, `true`, `yes`, `on`) |
//! | `MODEL_NAME` | `openai.model` |
//! | `EMBEDDING_MODEL_NAME` | `openai.embedding_model` |
//! | `CONFLUENCE_BASE_URL`, `CONFLUENCE_ACCESS_TOKEN` | `confluence.*` |
//! | `OCTANE_BASE_URL`, `OCTANE_CLIENT_ID`, `OCTANE_CLIENT_SECRET` | `octane.*` |
//! | `DOCCHAT_BIND` | `server.bind` |
//! | `DOCCHAT_DATA_DIR` | `storage.data_dir` |

use anyhow::{Context, Result};
use docchat_core::chunk::validate_window;
use docchat_core::prompt::DEFAULT_SYSTEM_PROMPT;
use docchat_core::RagError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub web: WebConfig,
    pub confluence: ConfluenceConfig,
    pub octane: OctaneConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub proxy_url: Option<String>,
    pub disable_ssl: bool,
    pub model: String,
    pub embedding_model: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub batch_size: usize,
    pub temperature: Option<f32>,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            proxy_url: None,
            disable_ssl: false,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            timeout_secs: 60,
            connect_timeout_secs: 30,
            max_retries: 3,
            backoff_ms: 500,
            batch_size: 64,
            temperature: None,
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length in characters.
    pub size: usize,
    /// Characters shared by consecutive windows.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 1200,
            overlap: 200,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_prompt_chars: usize,
    pub system_prompt: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            max_prompt_chars: 12_000,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Turns kept per session; older turns are discarded.
    pub max_history_turns: usize,
    /// Sessions idle for longer than this are dropped.
    pub idle_ttl_secs: u64,
    /// Upper bound on live sessions; the least recently used go first.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_history_turns: 20,
            idle_ttl_secs: 24 * 60 * 60,
            max_sessions: 10_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub search_url: String,
    pub max_results: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            search_url: "https://html.duckduckgo.com/html/".to_string(),
            max_results: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConfluenceConfig {
    pub base_url: Option<String>,
    pub access_token: Option<String>,
    pub spaces: Vec<String>,
    pub limit: usize,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            access_token: None,
            spaces: Vec::new(),
            limit: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OctaneConfig {
    pub base_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub shared_space: Option<String>,
    pub workspace: Option<String>,
    pub limit: usize,
}

impl Default for OctaneConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            client_id: None,
            client_secret: None,
            shared_space: None,
            workspace: None,
            limit: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.md", "**/*.txt", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Config {
    /// Overlay environment variables read through `lookup`.
    ///
    /// Unset and empty variables leave the file value in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENAI_API_KEY") {
            self.openai.api_key = Some(v);
        }
        if let Some(v) = get("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = get("PROXY_URL") {
            self.openai.proxy_url = Some(v);
        }
        if let Some(v) = get("DISABLE_SSL") {
            self.openai.disable_ssl = parse_flag(&v);
        }
        if let Some(v) = get("MODEL_NAME") {
            self.openai.model = v;
        }
        if let Some(v) = get("EMBEDDING_MODEL_NAME") {
            self.openai.embedding_model = v;
        }
        if let Some(v) = get("CONFLUENCE_BASE_URL") {
            self.confluence.base_url = Some(v);
        }
        if let Some(v) = get("CONFLUENCE_ACCESS_TOKEN") {
            self.confluence.access_token = Some(v);
        }
        if let Some(v) = get("OCTANE_BASE_URL") {
            self.octane.base_url = Some(v);
        }
        if let Some(v) = get("OCTANE_CLIENT_ID") {
            self.octane.client_id = Some(v);
        }
        if let Some(v) = get("OCTANE_CLIENT_SECRET") {
            self.octane.client_secret = Some(v);
        }
        if let Some(v) = get("DOCCHAT_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("DOCCHAT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }

        // Empty strings in the file mean "not configured".
        for opt in [
            &mut self.openai.api_key,
            &mut self.openai.proxy_url,
            &mut self.confluence.base_url,
            &mut self.confluence.access_token,
            &mut self.octane.base_url,
            &mut self.octane.client_id,
            &mut self.octane.client_secret,
            &mut self.octane.shared_space,
            &mut self.octane.workspace,
        ] {
            if opt.as_deref().is_some_and(|s| s.trim().is_empty()) {
                *opt = None;
            }
        }
    }

    pub fn validate(&self) -> docchat_core::Result<()> {
        validate_window(self.chunking.size, self.chunking.overlap)?;

        if self.retrieval.top_k < 1 {
            return Err(RagError::config("retrieval.top_k must be >= 1"));
        }
        if self.retrieval.max_prompt_chars == 0 {
            return Err(RagError::config("retrieval.max_prompt_chars must be > 0"));
        }
        if self.session.idle_ttl_secs == 0 || self.session.max_sessions == 0 {
            return Err(RagError::config(
                "session.idle_ttl_secs and session.max_sessions must be > 0",
            ));
        }
        if self.openai.batch_size < 1 {
            return Err(RagError::config("openai.batch_size must be >= 1"));
        }
        if self.openai.base_url.trim().is_empty() {
            return Err(RagError::config("openai.base_url must not be empty"));
        }
        if let Some(t) = self.openai.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RagError::config("openai.temperature must be in [0.0, 2.0]"));
            }
        }
        Ok(())
    }
}

/// Interpret `1`, `true`, `yes`, and `on` (any case) as enabled.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Read, overlay the process environment, and validate.
///
/// A missing file is not an error: defaults are used instead.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

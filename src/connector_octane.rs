//! ALM Octane connector.
//!
//! Logs in with client credentials, then pulls work items from the first
//! item endpoint that answers. Login strategies, in order:
//!
//! 1. `POST /authentication/sign_in` with a JSON body; the session lives in
//!    the client's cookie jar.
//! 2. OAuth2 `client_credentials` against `/oauth/token`, `/oauth2/token`,
//!    then `/authentication/oauth/token`; the access token is sent as a
//!    Bearer header afterwards.
//!
//! The client handed to [`OctaneConnector::new`] must have its cookie store
//! enabled for the sign-in strategy to work.

use std::fmt;

use async_trait::async_trait;
use docchat_core::models::SourceDocument;
use docchat_core::Namespace;
use serde_json::Value;

use crate::candidates::try_in_order;
use crate::config::OctaneConfig;
use crate::connectors::{clamp_limit, FetchOutcome, FetchRequest, SourceConnector};
use crate::html::html_to_text;

const MAX_LIMIT: usize = 50;
const OAUTH_PATHS: [&str; 3] = ["oauth/token", "oauth2/token", "authentication/oauth/token"];

#[derive(Debug, Clone, Copy, PartialEq)]
enum LoginStrategy {
    SignIn,
    OAuth(&'static str),
}

impl fmt::Display for LoginStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginStrategy::SignIn => f.write_str("sign_in"),
            LoginStrategy::OAuth(path) => write!(f, "oauth {}", path),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Auth {
    /// Session cookie held by the HTTP client.
    Session,
    Bearer(String),
}

pub struct OctaneConnector {
    http: reqwest::Client,
    base_url: Option<String>,
    client_id: String,
    client_secret: String,
    shared_space: Option<String>,
    workspace: Option<String>,
    default_limit: usize,
}

impl OctaneConnector {
    pub fn new(http: reqwest::Client, config: &OctaneConfig) -> Self {
        Self {
            http,
            base_url: config
                .base_url
                .as_deref()
                .map(|u| u.trim_end_matches('/').to_string()),
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            shared_space: config.shared_space.clone(),
            workspace: config.workspace.clone(),
            default_limit: config.limit,
        }
    }

    async fn login(&self, base: &str) -> Result<Auth, String> {
        let strategies = std::iter::once(LoginStrategy::SignIn)
            .chain(OAUTH_PATHS.into_iter().map(LoginStrategy::OAuth))
            .collect::<Vec<_>>();

        try_in_order(strategies, |strategy| self.try_login(base, strategy))
            .await
            .map_err(|e| format!("Octane login failed: {}", e))
    }

    async fn try_login(&self, base: &str, strategy: LoginStrategy) -> Result<Auth, String> {
        match strategy {
            LoginStrategy::SignIn => {
                let body = serde_json::json!({
                    "client_id": self.client_id,
                    "client_secret": self.client_secret,
                });
                let response = self
                    .http
                    .post(format!("{}/authentication/sign_in", base))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .json(&body)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                if response.status().is_success() {
                    Ok(Auth::Session)
                } else {
                    Err(format!("HTTP {}", response.status().as_u16()))
                }
            }
            LoginStrategy::OAuth(path) => {
                let form = [
                    ("grant_type", "client_credentials"),
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                ];
                let response = self
                    .http
                    .post(format!("{}/{}", base, path))
                    .header(reqwest::header::ACCEPT, "application/json")
                    .basic_auth(&self.client_id, Some(&self.client_secret))
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                let status = response.status();
                if !status.is_success() {
                    return Err(format!("HTTP {}", status.as_u16()));
                }
                let json: Value = response.json().await.map_err(|e| e.to_string())?;
                json.get("access_token")
                    .and_then(Value::as_str)
                    .filter(|t| !t.is_empty())
                    .map(|t| Auth::Bearer(t.to_string()))
                    .ok_or_else(|| "response carried no access_token".to_string())
            }
        }
    }

    async fn fetch_items(
        &self,
        base: &str,
        auth: &Auth,
        shared_space: &str,
        workspace: &str,
        limit: usize,
    ) -> Result<Vec<SourceDocument>, String> {
        try_in_order(item_paths(shared_space, workspace), |path| {
            self.fetch_items_at(base, auth, path, limit)
        })
        .await
        .map_err(|e| format!("Octane item fetch failed: {}", e))
    }

    async fn fetch_items_at(
        &self,
        base: &str,
        auth: &Auth,
        path: String,
        limit: usize,
    ) -> Result<Vec<SourceDocument>, String> {
        let mut req = self
            .http
            .get(format!("{}/{}", base, path))
            .query(&[("limit", limit.to_string())])
            .header(reqwest::header::ACCEPT, "application/json");
        if let Auth::Bearer(token) = auth {
            req = req.bearer_auth(token);
        }
        let response = req.send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("HTTP {}", status.as_u16()));
        }
        let json: Value = response.json().await.map_err(|e| e.to_string())?;
        let docs = items_to_documents(&json, limit);
        if docs.is_empty() {
            return Err("no work items returned".to_string());
        }
        Ok(docs)
    }
}

#[async_trait]
impl SourceConnector for OctaneConnector {
    fn name(&self) -> &str {
        "octane"
    }

    fn namespace(&self) -> Namespace {
        Namespace::Octane
    }

    async fn fetch(&self, request: &FetchRequest) -> FetchOutcome {
        let Some(base) = self.base_url.as_deref() else {
            return FetchOutcome::failed(
                "Octane is not configured (set octane.base_url or OCTANE_BASE_URL)",
            );
        };
        let shared_space = request.shared_space.as_ref().or(self.shared_space.as_ref());
        let workspace = request.workspace.as_ref().or(self.workspace.as_ref());
        let (Some(shared_space), Some(workspace)) = (shared_space, workspace) else {
            return FetchOutcome::failed("Octane shared_space and workspace must both be set");
        };
        let limit = clamp_limit(request.limit, self.default_limit, MAX_LIMIT);

        let auth = match self.login(base).await {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(error = %e, "octane login failed");
                return FetchOutcome::failed(e);
            }
        };

        match self
            .fetch_items(base, &auth, shared_space, workspace, limit)
            .await
        {
            Ok(documents) => {
                tracing::info!(items = documents.len(), "octane fetch done");
                FetchOutcome::ok(documents)
            }
            Err(e) => {
                tracing::warn!(error = %e, "octane fetch failed");
                FetchOutcome::failed(e)
            }
        }
    }
}

/// Item endpoints to try, public API first.
pub fn item_paths(shared_space: &str, workspace: &str) -> Vec<String> {
    let scope = format!("shared_spaces/{}/workspaces/{}", shared_space, workspace);
    vec![
        format!("api/{}/work_items", scope),
        format!("api/{}/defects", scope),
        format!("api/{}/stories", scope),
        format!("internal-api/{}/work_items", scope),
    ]
}

/// Convert an Octane collection (`{"data": [...]}` or a bare array).
pub fn items_to_documents(json: &Value, limit: usize) -> Vec<SourceDocument> {
    let items: &[Value] = match json {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("data") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    items
        .iter()
        .filter_map(item_to_document)
        .take(limit)
        .collect()
}

fn item_to_document(item: &Value) -> Option<SourceDocument> {
    let obj = item.as_object()?;
    let id = ["id", "uid", "_id"]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(scalar_string)
        .unwrap_or_default();
    let name = ["name", "title"]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find_map(scalar_string)
        .unwrap_or_else(|| format!("Item {}", id));
    let description = ["description_html", "description", "content"]
        .iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
        .map(|v| match v {
            Value::String(s) => html_to_text(s),
            other => other.to_string(),
        })
        .unwrap_or_default();

    if id.is_empty() && name.trim().is_empty() {
        return None;
    }
    let key = if id.is_empty() {
        format!("octane:{}", name)
    } else {
        format!("octane:{}", id)
    };
    let text = if description.is_empty() {
        name.clone()
    } else {
        format!("{}\n\n{}", name, description)
    };
    Some(SourceDocument::new(key, text).with_title(name))
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

//! Minimal client for OpenAI-compatible REST endpoints.
//!
//! Wraps a `reqwest::Client` with the base URL, bearer key, and retry
//! policy. Retry strategy:
//! - timeout, connection failure, HTTP 429 → retry with exponential backoff
//! - any other non-2xx → fail immediately
//!
//! Backoff for attempt `n` (1-based) is `backoff_ms << min(n - 1, 5)`.

use std::time::Duration;

use docchat_core::{RagError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::OpenAiConfig;
use crate::http::{build_client, classify_send_error, classify_status, HttpSettings};

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    backoff_ms: u64,
}

impl OpenAiClient {
    pub fn from_config(config: &OpenAiConfig) -> Result<Self> {
        let http = build_client(&HttpSettings::from_openai(config))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            backoff_ms: config.backoff_ms,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Build an authorized POST request without sending it.
    pub fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.post(self.endpoint(path));
        if let Some(key) = self.api_key.as_deref() {
            req = req.bearer_auth(key);
        }
        req
    }

    /// POST `body` as JSON and decode the JSON response, retrying transient
    /// failures.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff(attempt);
                tracing::warn!(
                    path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying upstream request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.send_once(path, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| RagError::Transient("request failed after retries".into())))
    }

    /// Send once and return the raw response when the status is 2xx.
    pub async fn send_checked<B>(&self, path: &str, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .request(path)
            .json(body)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }

    async fn send_once<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send_checked(path, body).await?;
        let bytes = response.bytes().await.map_err(classify_send_error)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RagError::upstream(None, format!("malformed response from {}: {}", path, e))
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms << (attempt - 1).min(5))
    }
}

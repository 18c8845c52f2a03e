//! Ordered fallback strategies.
//!
//! Upstreams that live behind different URL layouts (Confluence Cloud vs.
//! Server, Octane's public vs. internal API) are probed by trying each
//! candidate in order. The first success wins; if every candidate fails the
//! caller gets one error that lists every attempt.

use std::fmt;
use std::future::Future;

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    pub candidate: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
#[error("all {attempted} candidates failed: {summary}")]
pub struct AttemptsExhausted {
    pub failures: Vec<AttemptFailure>,
    attempted: usize,
    summary: String,
}

impl AttemptsExhausted {
    pub fn new(failures: Vec<AttemptFailure>) -> Self {
        let summary = failures
            .iter()
            .map(|f| format!("{} -> {}", f.candidate, f.error))
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            attempted: failures.len(),
            failures,
            summary,
        }
    }
}

/// Run `attempt` on each candidate in order until one succeeds.
pub async fn try_in_order<C, T, E, F, Fut>(
    candidates: impl IntoIterator<Item = C>,
    mut attempt: F,
) -> Result<T, AttemptsExhausted>
where
    C: fmt::Display,
    E: fmt::Display,
    F: FnMut(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        let label = candidate.to_string();
        match attempt(candidate).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::debug!(candidate = %label, error = %e, "candidate failed");
                failures.push(AttemptFailure {
                    candidate: label,
                    error: e.to_string(),
                });
            }
        }
    }
    Err(AttemptsExhausted::new(failures))
}

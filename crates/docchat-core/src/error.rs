//! Error taxonomy shared by every pipeline stage.

/// Result alias used across the pipeline.
pub type Result<T> = std::result::Result<T, RagError>;

/// Pipeline errors.
///
/// | Variant | Meaning | Retried |
/// |---------|---------|---------|
/// | `Config` | invalid chunking parameters or missing settings | no |
/// | `DimensionMismatch` | vector length disagrees with the index | no |
/// | `Upstream` | endpoint rejected the request or answered garbage | no |
/// | `Transient` | timeout, connection failure, rate limit | yes |
/// | `Persistence` | index files unreadable or inconsistent | no |
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("upstream error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Upstream {
        status: Option<u16>,
        message: String,
    },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    pub fn config(message: impl Into<String>) -> Self {
        RagError::Config(message.into())
    }

    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        RagError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Whether a caller may retry the failed operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_includes_status() {
        let err = RagError::upstream(Some(401), "invalid api key");
        assert_eq!(err.to_string(), "upstream error (401): invalid api key");

        let err = RagError::upstream(None, "missing data array");
        assert_eq!(err.to_string(), "upstream error: missing data array");
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(RagError::Transient("timed out".into()).is_transient());
        assert!(!RagError::upstream(Some(500), "boom").is_transient());
        assert!(!RagError::DimensionMismatch {
            expected: 3,
            actual: 4
        }
        .is_transient());
    }
}

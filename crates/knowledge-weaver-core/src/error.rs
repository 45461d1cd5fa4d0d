//! Error taxonomy for the ingestion and retrieval engine.
//!
//! Every fallible engine operation returns [`WeaverError`]. The variants map
//! one-to-one onto how a failure is handled:
//!
//! | Variant | Retried | Surfaced as |
//! |---------|---------|-------------|
//! | [`InvalidInput`](WeaverError::InvalidInput) | never | `400` / immediate error |
//! | [`BatchTooLarge`](WeaverError::BatchTooLarge) | never | `400` / immediate error |
//! | [`Provider`](WeaverError::Provider) | when `transient` | per-item failure or `503` |
//! | [`Timeout`](WeaverError::Timeout) | yes | per-item failure or `503` |
//! | [`NotFound`](WeaverError::NotFound) | never | `404` |
//! | [`Index`](WeaverError::Index) | never | degraded health, operation fails closed |

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, WeaverError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeaverError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("batch of {size} messages exceeds the maximum of {max}; split it before submitting")]
    BatchTooLarge { size: usize, max: usize },

    #[error("provider error: {message}")]
    Provider { message: String, transient: bool },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("index unavailable: {0}")]
    Index(String),
}

impl WeaverError {
    /// A provider failure worth retrying (rate limiting, 5xx, network).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: true,
        }
    }

    /// A provider failure that will not go away on retry (malformed input, 4xx).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            transient: false,
        }
    }

    pub fn index(err: impl std::fmt::Display) -> Self {
        Self::Index(err.to_string())
    }

    /// Whether the retry policy may attempt the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { transient, .. } => *transient,
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::Provider { .. } => "provider_unavailable",
            Self::Timeout { .. } => "timeout",
            Self::NotFound(_) => "not_found",
            Self::Index(_) => "index_unavailable",
        }
    }
}

//! Error types for signal-hub.

use thiserror::Error;

/// Result type alias using signal-hub's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse outcome classes reported across the tool boundary.
///
/// Every error maps to exactly one of these; callers use them to decide
/// whether to retry, fix their input, or fall back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Ok,
    Transient,
    InvalidInput,
    NotFound,
    Capacity,
    Unavailable,
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Transient => write!(f, "transient"),
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::NotFound => write!(f, "not_found"),
            Self::Capacity => write!(f, "capacity"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Errors that can occur in the routing, caching, and accounting pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed query or out-of-range parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model identifier not present in the pricing table
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Cache is full and eviction could not free space
    #[error("Cache capacity reached: {0}")]
    Capacity(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage I/O error (ledger or cache backend)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Provider API error
    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// Provider reports the model is not usable
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Transient failure the caller may retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error (fatal at start-up)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a provider error.
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Map this error to its exit status class.
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Self::InvalidInput(_) | Self::UnknownModel(_) | Self::Config(_) => {
                ExitStatus::InvalidInput
            }
            Self::Capacity(_) => ExitStatus::Capacity,
            Self::NotFound(_) => ExitStatus::NotFound,
            Self::Unavailable(_) => ExitStatus::Unavailable,
            Self::Storage(_)
            | Self::Embedding(_)
            | Self::Provider { .. }
            | Self::Timeout { .. }
            | Self::Transient(_)
            | Self::Serialization(_)
            | Self::Internal(_) => ExitStatus::Transient,
        }
    }

    /// Whether the caller may safely retry the operation.
    pub fn is_transient(&self) -> bool {
        self.exit_status() == ExitStatus::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_mapping() {
        assert_eq!(
            Error::InvalidInput("bad".into()).exit_status(),
            ExitStatus::InvalidInput
        );
        assert_eq!(
            Error::UnknownModel("gpt-9".into()).exit_status(),
            ExitStatus::InvalidInput
        );
        assert_eq!(
            Error::Capacity("full".into()).exit_status(),
            ExitStatus::Capacity
        );
        assert_eq!(
            Error::Unavailable("large".into()).exit_status(),
            ExitStatus::Unavailable
        );
        assert_eq!(Error::timeout(5000).exit_status(), ExitStatus::Transient);
        assert_eq!(
            Error::Storage("disk".into()).exit_status(),
            ExitStatus::Transient
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Transient("retry me".into()).is_transient());
        assert!(Error::provider("anthropic", "overloaded").is_transient());
        assert!(!Error::InvalidInput("fix me".into()).is_transient());
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::InvalidInput.to_string(), "invalid_input");
        assert_eq!(ExitStatus::Ok.to_string(), "ok");
    }
}

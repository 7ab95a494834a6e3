use thiserror::Error;

/// Main error type for the cluster detection engine
#[derive(Error, Debug)]
pub enum ClusterError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid cluster config: {0}")]
    ConfigInvalid(String),

    // Input errors
    #[error("Malformed trade event: {0}")]
    MalformedEvent(String),

    // Store errors
    #[error("Store unavailable ({backend}): {reason}")]
    StoreUnavailable { backend: String, reason: String },

    #[error("Write conflict on {key} after {attempts} attempts")]
    WriteConflict { key: String, attempts: u32 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ClusterError
pub type Result<T> = std::result::Result<T, ClusterError>;

impl ClusterError {
    pub fn store_unavailable(backend: &str, reason: impl ToString) -> Self {
        ClusterError::StoreUnavailable {
            backend: backend.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors the feeding layer may retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClusterError::StoreUnavailable { .. } | ClusterError::WriteConflict { .. }
        )
    }
}

impl From<redis::RedisError> for ClusterError {
    fn from(err: redis::RedisError) -> Self {
        ClusterError::store_unavailable("redis", err)
    }
}

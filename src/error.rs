//! Unified error handling for the grid engine
//!
//! Only configuration problems abort startup. Per-bar anomalies (oversold
//! matches, a slow or unavailable persistence sink) are absorbed, logged and
//! reflected in state so the trading loop never crashes mid-session.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Persistence sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("Execution gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "config",
            EngineError::Feed(_) => "feed",
            EngineError::Database(_) => "database",
            EngineError::SinkUnavailable(_) => "sink",
            EngineError::Gateway(_) => "gateway",
            EngineError::Internal(_) => "internal",
        }
    }

    /// Whether the operation that produced this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::SinkUnavailable(_) | EngineError::Gateway(_))
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Feed(err.to_string())
    }
}

/// Result type alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_is_fatal_not_retryable() {
        let err = EngineError::Config(ConfigError::Validation("support >= resistance".into()));
        assert_eq!(err.category(), "config");
        assert!(!err.is_retryable());
    }

    #[test]
    fn sink_error_is_retryable() {
        let err = EngineError::SinkUnavailable("disk full".into());
        assert_eq!(err.category(), "sink");
        assert!(err.is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = EngineError::Feed("bad row 17".into());
        assert!(err.to_string().contains("bad row 17"));
    }
}

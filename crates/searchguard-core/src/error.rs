//! Error types shared across the searchguard workspace
//!
//! This module defines the foundational error type that the engine crate
//! builds on. Load-time failures (bad policy document, unreadable file)
//! surface here; runtime policy decisions never do.

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Foundational error type for the searchguard workspace
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration errors (malformed policy document, missing sections)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration parsing errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] config::ConfigError),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }
}

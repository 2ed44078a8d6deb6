//! Error types for the guardrails engine

use searchguard_core::CoreError;

/// Result type for guardrail operations
pub type Result<T> = std::result::Result<T, GuardrailError>;

/// Errors that can occur in guardrail operations
///
/// These are load-time and wiring errors only. A query that fails policy
/// checks is a normal outcome reported through `ValidationResult`, never
/// an error.
#[derive(Debug, thiserror::Error)]
pub enum GuardrailError {
    /// Generic guardrail error
    #[error("Guardrail error: {0}")]
    Error(String),

    /// A configured regex failed to compile
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A role referenced by the resolver has no limits entry in policy
    #[error("No limits configured for role '{0}'")]
    MissingRole(String),

    /// Generic error from searchguard-core
    #[error(transparent)]
    CoreError(#[from] CoreError),
}

impl GuardrailError {
    /// Create a guardrail error
    pub fn error<S: Into<String>>(msg: S) -> Self {
        Self::Error(msg.into())
    }
}

//! Guardrail violations

use serde::{Deserialize, Serialize};

/// Severity of a guardrail violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    /// Low severity - log only
    Low,
    /// Medium severity - warn but allow
    Medium,
    /// High severity - block the action
    High,
    /// Critical severity - block and alert
    Critical,
}

/// Which rule category a violation came from
///
/// Concurrency and timeout violations are reported separately from
/// command/pattern violations so callers can tell a policy breach apart
/// from a resource limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCategory {
    /// A blocked command token appeared after a pipe
    BlockedCommand,
    /// A blocked payload pattern matched the query text
    BlockedPattern,
    /// Per-user concurrent search ceiling reached
    ConcurrencyLimit,
    /// Search exceeded its role's timeout while holding a slot
    Timeout,
}

/// Enforcement level of a validation verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    /// No violations or warnings
    None,
    /// Warnings only; query may run
    Advisory,
    /// At least one violation; query is blocked
    Strict,
}

/// A guardrail violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Rule category that triggered
    pub category: ViolationCategory,

    /// Severity of the violation
    pub severity: ViolationSeverity,

    /// Human-readable description
    pub message: String,

    /// When the violation occurred
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Violation {
    /// Create a new violation
    pub fn new<S: Into<String>>(
        category: ViolationCategory,
        severity: ViolationSeverity,
        message: S,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Shorthand for a blocked-command violation
    pub fn blocked_command<S: Into<String>>(message: S) -> Self {
        Self::new(ViolationCategory::BlockedCommand, ViolationSeverity::High, message)
    }

    /// Shorthand for a blocked-pattern violation
    pub fn blocked_pattern<S: Into<String>>(message: S) -> Self {
        Self::new(ViolationCategory::BlockedPattern, ViolationSeverity::High, message)
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

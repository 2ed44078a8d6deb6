//! Validation verdicts
//!
//! A [`ValidationResult`] is produced fresh per call and never mutated
//! after return. A blocked query is a normal outcome communicated here,
//! not an error.

use serde::{Deserialize, Serialize};

use crate::roles::RoleName;
use crate::violation::{EnforcementLevel, Violation};

/// Limits the caller should apply when dispatching the admitted search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub max_results: usize,
    pub timeout_seconds: u64,
    pub data_masking_enabled: bool,
}

/// Outcome of pre-execution validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the query is denied execution
    pub blocked: bool,

    /// Violations, in rule-evaluation order
    pub violations: Vec<Violation>,

    /// Non-blocking warnings, in rule-evaluation order
    pub warnings: Vec<String>,

    /// Summary reason when blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,

    pub enforcement_level: EnforcementLevel,

    /// The query exactly as submitted
    pub original_query: String,

    /// The query after limit clamping; equals `original_query` when no
    /// modification applied
    pub modified_query: String,

    /// Human-readable record of each rewrite, in application order
    pub modifications_applied: Vec<String>,

    /// Tier the user resolved to for this request
    pub resolved_role: RoleName,

    /// Present only for admitted queries
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_metadata: Option<ExecutionMetadata>,
}

impl ValidationResult {
    /// Start an allow-everything verdict for a query; checks then layer
    /// violations, warnings, and modifications onto it
    pub fn passing(query: &str, role: RoleName) -> Self {
        Self {
            blocked: false,
            violations: Vec::new(),
            warnings: Vec::new(),
            block_reason: None,
            enforcement_level: EnforcementLevel::None,
            original_query: query.to_string(),
            modified_query: query.to_string(),
            modifications_applied: Vec::new(),
            resolved_role: role,
            execution_metadata: None,
        }
    }

    /// Whether the caller may execute the query
    pub fn allowed(&self) -> bool {
        !self.blocked
    }

    /// Recompute the enforcement level from current violations/warnings.
    /// Modifications never raise the level.
    pub fn update_enforcement_level(&mut self) {
        self.enforcement_level = if !self.violations.is_empty() {
            EnforcementLevel::Strict
        } else if !self.warnings.is_empty() {
            EnforcementLevel::Advisory
        } else {
            EnforcementLevel::None
        };
    }

    /// Mark the verdict blocked with a summary reason
    pub fn block<S: Into<String>>(&mut self, reason: S) {
        self.blocked = true;
        self.block_reason = Some(reason.into());
        self.execution_metadata = None;
        self.update_enforcement_level();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::violation::Violation;

    #[test]
    fn test_passing_verdict() {
        let verdict = ValidationResult::passing("index=main", RoleName::StandardUser);
        assert!(verdict.allowed());
        assert_eq!(verdict.enforcement_level, EnforcementLevel::None);
        assert_eq!(verdict.original_query, verdict.modified_query);
    }

    #[test]
    fn test_block_sets_reason_and_level() {
        let mut verdict = ValidationResult::passing("| delete", RoleName::StandardUser);
        verdict
            .violations
            .push(Violation::blocked_command("Blocked command detected: |delete"));
        verdict.block("Security violation");

        assert!(verdict.blocked);
        assert_eq!(verdict.enforcement_level, EnforcementLevel::Strict);
        assert_eq!(verdict.block_reason.as_deref(), Some("Security violation"));
        assert!(verdict.execution_metadata.is_none());
    }

    #[test]
    fn test_warnings_make_level_advisory() {
        let mut verdict = ValidationResult::passing("index=*", RoleName::StandardUser);
        verdict.warnings.push("wildcard index scan".to_string());
        verdict.update_enforcement_level();
        assert_eq!(verdict.enforcement_level, EnforcementLevel::Advisory);
        assert!(verdict.allowed());
    }

    #[test]
    fn test_modifications_do_not_raise_level() {
        let mut verdict = ValidationResult::passing("index=main", RoleName::StandardUser);
        verdict
            .modifications_applied
            .push("Added default time range: -24h".to_string());
        verdict.update_enforcement_level();
        assert_eq!(verdict.enforcement_level, EnforcementLevel::None);
    }

    #[test]
    fn test_serialization_skips_empty_optionals() {
        let verdict = ValidationResult::passing("index=main", RoleName::Admin);
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(!json.contains("block_reason"));
        assert!(!json.contains("execution_metadata"));
    }
}

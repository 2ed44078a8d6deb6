//! The guardrails engine
//!
//! Orchestrates role resolution, query validation, limit clamping,
//! concurrency admission, and data masking into the two operations the
//! rest of the system calls: [`GuardrailsEngine::validate_search`] before
//! execution and [`GuardrailsEngine::apply_data_masking`] after.
//!
//! The engine is the sole owner of the role-name-to-limits mapping; the
//! validator, tracker, and masker only ever see resolved [`RoleLimits`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::audit::AuditLog;
use crate::concurrency::{ConcurrencyTracker, SearchPermit};
use crate::error::Result;
use crate::limits::LimitRewriter;
use crate::masking::{DataMasker, Record};
use crate::policy::PolicyStore;
use crate::roles;
use crate::validator::QueryValidator;
use crate::verdict::{ExecutionMetadata, ValidationResult};
use crate::violation::{Violation, ViolationCategory, ViolationSeverity};

/// Resolved caller identity handed in by the host; the engine does not
/// authenticate users
#[derive(Debug, Clone)]
pub struct UserContext {
    pub username: String,
    /// Raw role names from the identity provider
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn new<S: Into<String>>(username: S, roles: Vec<String>) -> Self {
        Self {
            username: username.into(),
            roles,
        }
    }
}

/// Seam to the remote query execution client
#[async_trait]
pub trait SearchExecutor: Send + Sync {
    /// Run the (already admitted, possibly rewritten) query and return
    /// raw result records
    async fn execute(&self, query: &str) -> Result<Vec<Record>>;
}

/// Outcome of a guarded end-to-end search
#[derive(Debug)]
pub enum SearchOutcome {
    /// The query was denied before execution
    Blocked(ValidationResult),
    /// The query ran and its records were masked
    Completed {
        verdict: ValidationResult,
        records: Vec<Record>,
    },
    /// The query exceeded its role's timeout; its slot was force-released
    TimedOut {
        verdict: ValidationResult,
        timeout_seconds: u64,
    },
}

/// The guardrails policy engine
pub struct GuardrailsEngine {
    store: Arc<PolicyStore>,
    validator: QueryValidator,
    rewriter: LimitRewriter,
    tracker: ConcurrencyTracker,
    masker: DataMasker,
    audit: AuditLog,
}

impl GuardrailsEngine {
    /// Build an engine from a validated policy store
    pub fn new(store: PolicyStore) -> Result<Self> {
        let store = Arc::new(store);
        let validator = QueryValidator::new(Arc::clone(&store));
        let masker = DataMasker::new(&store)?;
        let audit = AuditLog::new(store.config().guardrails.audit_logging);

        Ok(Self {
            store,
            validator,
            rewriter: LimitRewriter::new()?,
            tracker: ConcurrencyTracker::new(),
            masker,
            audit,
        })
    }

    /// Load a policy file and build an engine; load errors are fatal
    pub fn from_policy_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::new(PolicyStore::load(path)?)
    }

    /// Load a policy file, falling back to fail-safe defaults on error
    pub fn from_policy_file_or_fail_safe<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        Self::new(PolicyStore::load_or_fail_safe(path))
    }

    /// Pre-execution gate: validates the query, clamps limits, and claims
    /// a concurrency slot for admitted queries.
    ///
    /// The caller owes exactly one [`GuardrailsEngine::release_search`]
    /// per admitted query, on completion, failure, or timeout alike.
    /// When guardrails are disabled no slot is claimed and the paired
    /// release is a harmless no-op, so callers may release after every
    /// allowed verdict unconditionally. Prefer
    /// [`GuardrailsEngine::execute_search`], which guarantees the pairing.
    pub fn validate_search(&self, query: &str, ctx: &UserContext) -> Result<ValidationResult> {
        let (verdict, permit) = self.validate_inner(query, ctx)?;
        if let Some(permit) = permit {
            // Slot stays held; the caller releases it explicitly
            permit.detach();
        }
        Ok(verdict)
    }

    /// Release the concurrency slot claimed by an admitted
    /// `validate_search` call. Returns whether a held slot was freed.
    ///
    /// No slots exist while guardrails are disabled, so releases are
    /// absorbed silently rather than flagged as unmatched.
    pub fn release_search(&self, username: &str) -> bool {
        if !self.store.config().guardrails.enabled {
            return false;
        }
        self.tracker.release(username)
    }

    /// Post-execution sanitizer: masks records under the caller's
    /// resolved role. Masking never fails the request.
    pub fn apply_data_masking(
        &self,
        records: Vec<Record>,
        ctx: &UserContext,
    ) -> Result<Vec<Record>> {
        if !self.store.config().guardrails.enabled {
            return Ok(records);
        }

        let resolution = roles::resolve(&ctx.roles);
        let limits = self.store.limits_for(resolution.role)?;
        let record_count = records.len();

        let outcome = self.masker.mask(records, &limits);

        if outcome.fields_masked > 0 || outcome.fields_dropped > 0 {
            self.audit.record(
                "data_masking",
                &ctx.username,
                &ctx.roles,
                &format!("{} records", record_count),
                json!({
                    "fields_masked": outcome.fields_masked,
                    "fields_dropped": outcome.fields_dropped,
                }),
            );
        }

        Ok(outcome.records)
    }

    /// End-to-end guarded execution: validate, run the executor under the
    /// role's timeout, mask the results, and release the concurrency slot
    /// on every exit path (completion, failure, timeout).
    pub async fn execute_search<E: SearchExecutor + ?Sized>(
        &self,
        query: &str,
        ctx: &UserContext,
        executor: &E,
    ) -> Result<SearchOutcome> {
        let (mut verdict, permit) = self.validate_inner(query, ctx)?;
        if verdict.blocked {
            return Ok(SearchOutcome::Blocked(verdict));
        }

        // Permit (when present) is released on drop, on every path below.
        let _permit: Option<SearchPermit> = permit;

        let timeout_seconds = verdict
            .execution_metadata
            .as_ref()
            .map(|m| m.timeout_seconds);

        let dispatched = verdict.modified_query.clone();

        let records = match timeout_seconds {
            Some(seconds) => {
                let outcome =
                    tokio::time::timeout(Duration::from_secs(seconds), executor.execute(&dispatched))
                        .await;
                match outcome {
                    Ok(result) => result?,
                    Err(_) => {
                        verdict.violations.push(Violation::new(
                            ViolationCategory::Timeout,
                            ViolationSeverity::Medium,
                            format!("Search exceeded {} second timeout", seconds),
                        ));
                        self.audit.record(
                            "timeout",
                            &ctx.username,
                            &ctx.roles,
                            query,
                            json!({ "timeout_seconds": seconds }),
                        );
                        tracing::warn!(
                            user = %ctx.username,
                            timeout_seconds = seconds,
                            "Search timed out, slot force-released"
                        );
                        return Ok(SearchOutcome::TimedOut {
                            verdict,
                            timeout_seconds: seconds,
                        });
                    }
                }
            }
            None => executor.execute(&dispatched).await?,
        };

        let records = self.apply_data_masking(records, ctx)?;

        Ok(SearchOutcome::Completed { verdict, records })
    }

    /// The audit trail of enforcement actions
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// The policy this engine enforces
    pub fn policy(&self) -> &PolicyStore {
        &self.store
    }

    /// In-flight search count for a user (monitoring/tests)
    pub fn active_searches(&self, username: &str) -> usize {
        self.tracker.active_count(username)
    }

    /// Shared validation path. Returns the verdict plus, for admitted
    /// queries under enabled guardrails, the held concurrency permit.
    fn validate_inner(
        &self,
        query: &str,
        ctx: &UserContext,
    ) -> Result<(ValidationResult, Option<SearchPermit>)> {
        let resolution = roles::resolve(&ctx.roles);

        if !self.store.config().guardrails.enabled {
            return Ok((ValidationResult::passing(query, resolution.role), None));
        }

        let limits = self.store.limits_for(resolution.role)?;

        let mut verdict = self.validator.validate(query, &limits, resolution.role);
        if let Some(warning) = resolution.warning {
            verdict.warnings.insert(0, warning);
            verdict.update_enforcement_level();
        }

        if verdict.blocked {
            self.audit.record(
                "security_block",
                &ctx.username,
                &ctx.roles,
                query,
                json!({
                    "violations": verdict.violations.len(),
                    "role": resolution.role.as_str(),
                }),
            );
            return Ok((verdict, None));
        }

        let rewrite = self.rewriter.apply(query, &limits);
        verdict.modified_query = rewrite.query;
        verdict.modifications_applied = rewrite.modifications;

        let permit = match self
            .tracker
            .acquire_scoped(&ctx.username, limits.max_concurrent_searches)
        {
            Some(permit) => permit,
            None => {
                verdict.violations.push(Violation::new(
                    ViolationCategory::ConcurrencyLimit,
                    ViolationSeverity::Medium,
                    format!(
                        "Concurrency limit exceeded: {} searches already active",
                        limits.max_concurrent_searches
                    ),
                ));
                verdict.block("Concurrency limit exceeded");
                self.audit.record(
                    "concurrency_reject",
                    &ctx.username,
                    &ctx.roles,
                    query,
                    json!({
                        "active": self.tracker.active_count(&ctx.username),
                        "ceiling": limits.max_concurrent_searches,
                    }),
                );
                return Ok((verdict, None));
            }
        };

        verdict.execution_metadata = Some(ExecutionMetadata {
            max_results: limits.max_results_per_search,
            timeout_seconds: limits.search_timeout_seconds,
            data_masking_enabled: limits.data_masking_enabled,
        });

        if !verdict.warnings.is_empty() || !verdict.modifications_applied.is_empty() {
            self.audit.record(
                "validation_warning",
                &ctx.username,
                &ctx.roles,
                query,
                json!({
                    "warnings": verdict.warnings.len(),
                    "modifications": verdict.modifications_applied.len(),
                }),
            );
        }

        Ok((verdict, Some(permit)))
    }

    #[cfg(test)]
    fn limits_for(&self, role: crate::roles::RoleName) -> Result<crate::policy::RoleLimits> {
        self.store.limits_for(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use crate::roles::RoleName;
    use crate::violation::EnforcementLevel;
    use serde_json::json;

    fn engine() -> GuardrailsEngine {
        GuardrailsEngine::new(PolicyStore::from_config(PolicyConfig::default()).unwrap()).unwrap()
    }

    fn standard_user() -> UserContext {
        UserContext::new("alice", vec!["standard_user".to_string()])
    }

    struct StaticExecutor {
        records: Vec<Record>,
    }

    #[async_trait]
    impl SearchExecutor for StaticExecutor {
        async fn execute(&self, _query: &str) -> Result<Vec<Record>> {
            Ok(self.records.clone())
        }
    }

    struct SlowExecutor;

    #[async_trait]
    impl SearchExecutor for SlowExecutor {
        async fn execute(&self, _query: &str) -> Result<Vec<Record>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_blocked_command_blocks_and_holds_no_slot() {
        let engine = engine();
        let verdict = engine
            .validate_search("| delete index=main", &standard_user())
            .unwrap();

        assert!(verdict.blocked);
        assert_eq!(verdict.block_reason.as_deref(), Some("Security violation"));
        assert_eq!(engine.active_searches("alice"), 0);
        assert_eq!(engine.audit_log().entries()[0].action, "security_block");
    }

    #[test]
    fn test_admitted_query_holds_slot_until_release() {
        let engine = engine();
        let verdict = engine
            .validate_search("index=main | stats count", &standard_user())
            .unwrap();

        assert!(verdict.allowed());
        assert_eq!(verdict.enforcement_level, EnforcementLevel::None);
        assert_eq!(engine.active_searches("alice"), 1);

        let metadata = verdict.execution_metadata.unwrap();
        assert_eq!(metadata.max_results, 1000);
        assert_eq!(metadata.timeout_seconds, 300);
        assert!(metadata.data_masking_enabled);

        assert!(engine.release_search("alice"));
        assert_eq!(engine.active_searches("alice"), 0);
    }

    #[test]
    fn test_modifications_recorded_without_raising_level() {
        let engine = engine();
        let verdict = engine
            .validate_search("index=main | stats count", &standard_user())
            .unwrap();

        assert_eq!(verdict.enforcement_level, EnforcementLevel::None);
        assert_eq!(verdict.modifications_applied.len(), 2);
        assert!(verdict.modified_query.contains("earliest=-24h"));
        assert!(verdict.modified_query.contains("| head 100"));
        assert_eq!(verdict.original_query, "index=main | stats count");

        engine.release_search("alice");
    }

    #[test]
    fn test_concurrency_ceiling_enforced_per_user() {
        let engine = engine();
        let ctx = standard_user();

        // standard_user allows 3 concurrent searches
        for _ in 0..3 {
            assert!(engine
                .validate_search("index=main earliest=-4h | head 5", &ctx)
                .unwrap()
                .allowed());
        }

        let rejected = engine
            .validate_search("index=main earliest=-4h | head 5", &ctx)
            .unwrap();
        assert!(rejected.blocked);
        assert_eq!(
            rejected.violations[0].category,
            ViolationCategory::ConcurrencyLimit
        );
        assert_eq!(
            rejected.block_reason.as_deref(),
            Some("Concurrency limit exceeded")
        );

        // Other users are unaffected
        let bob = UserContext::new("bob", vec!["standard_user".to_string()]);
        assert!(engine
            .validate_search("index=main earliest=-4h | head 5", &bob)
            .unwrap()
            .allowed());

        // Releasing one of alice's slots re-admits her
        engine.release_search("alice");
        assert!(engine
            .validate_search("index=main earliest=-4h | head 5", &ctx)
            .unwrap()
            .allowed());
    }

    #[test]
    fn test_unrecognized_role_warns_and_uses_standard_limits() {
        let engine = engine();
        let ctx = UserContext::new("carol", vec!["intern".to_string()]);

        let verdict = engine
            .validate_search("index=main earliest=-4h | head 5", &ctx)
            .unwrap();

        assert!(verdict.allowed());
        assert_eq!(verdict.resolved_role, RoleName::StandardUser);
        assert_eq!(verdict.enforcement_level, EnforcementLevel::Advisory);
        assert!(verdict.warnings[0].contains("defaulting to standard_user"));

        engine.release_search("carol");
    }

    #[test]
    fn test_disabled_guardrails_allow_everything() {
        let mut config = PolicyConfig::default();
        config.guardrails.enabled = false;
        let engine = GuardrailsEngine::new(PolicyStore::from_config(config).unwrap()).unwrap();

        let verdict = engine
            .validate_search("| delete index=main", &standard_user())
            .unwrap();
        assert!(verdict.allowed());
        // No slot is claimed when disabled
        assert_eq!(engine.active_searches("alice"), 0);
    }

    #[test]
    fn test_release_with_disabled_guardrails_is_absorbed() {
        let mut config = PolicyConfig::default();
        config.guardrails.enabled = false;
        let engine = GuardrailsEngine::new(PolicyStore::from_config(config).unwrap()).unwrap();
        let ctx = standard_user();

        let verdict = engine
            .validate_search("index=main | stats count", &ctx)
            .unwrap();
        assert!(verdict.allowed());

        // A host pairing every allowed verdict with a release must not
        // trip the unmatched-release accounting
        assert!(!engine.release_search(&ctx.username));
        assert_eq!(engine.active_searches(&ctx.username), 0);

        // Real accounting still works once slots are in play
        let enabled = GuardrailsEngine::new(
            PolicyStore::from_config(PolicyConfig::default()).unwrap(),
        )
        .unwrap();
        enabled
            .validate_search("index=main | stats count", &ctx)
            .unwrap();
        assert!(enabled.release_search(&ctx.username));
    }

    #[test]
    fn test_masking_applied_per_role() {
        let engine = engine();
        let records = vec![Record::from_iter([
            ("username".to_string(), json!("a")),
            ("password".to_string(), json!("secretpassword123")),
        ])];

        let masked = engine
            .apply_data_masking(records.clone(), &standard_user())
            .unwrap();
        assert_eq!(masked[0]["password"], json!("[MASKED]"));

        // admin has masking disabled in the default policy
        let admin = UserContext::new("root", vec!["admin".to_string()]);
        let unmasked = engine.apply_data_masking(records, &admin).unwrap();
        assert_eq!(unmasked[0]["password"], json!("secretpassword123"));
    }

    #[tokio::test]
    async fn test_execute_search_completes_and_releases() {
        let engine = engine();
        let executor = StaticExecutor {
            records: vec![Record::from_iter([
                ("host".to_string(), json!("web-1")),
                ("ssn".to_string(), json!("123-45-6789")),
            ])],
        };

        let outcome = engine
            .execute_search("index=main | stats count", &standard_user(), &executor)
            .await
            .unwrap();

        match outcome {
            SearchOutcome::Completed { verdict, records } => {
                assert!(verdict.allowed());
                assert_eq!(records[0]["ssn"], json!("***-**-****"));
            }
            other => panic!("expected completion, got {:?}", other),
        }

        assert_eq!(engine.active_searches("alice"), 0);
    }

    #[tokio::test]
    async fn test_execute_search_blocked_runs_nothing() {
        let engine = engine();
        let executor = StaticExecutor { records: vec![] };

        let outcome = engine
            .execute_search("| delete index=main", &standard_user(), &executor)
            .await
            .unwrap();

        assert!(matches!(outcome, SearchOutcome::Blocked(_)));
        assert_eq!(engine.active_searches("alice"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_search_timeout_force_releases_slot() {
        let engine = engine();

        let outcome = engine
            .execute_search("index=main | stats count", &standard_user(), &SlowExecutor)
            .await
            .unwrap();

        match outcome {
            SearchOutcome::TimedOut {
                verdict,
                timeout_seconds,
            } => {
                assert_eq!(timeout_seconds, 300);
                assert!(verdict
                    .violations
                    .iter()
                    .any(|v| v.category == ViolationCategory::Timeout));
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        // Slot was force-released despite the hung executor
        assert_eq!(engine.active_searches("alice"), 0);
        assert!(engine
            .audit_log()
            .entries()
            .iter()
            .any(|e| e.action == "timeout"));
    }

    #[test]
    fn test_engine_owns_role_limit_mapping() {
        let engine = engine();
        let limits = engine.limits_for(RoleName::ReadonlyUser).unwrap();
        assert_eq!(limits.max_concurrent_searches, 2);
        assert!(!limits.bypass_command_blocks);
    }
}

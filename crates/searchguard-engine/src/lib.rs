//! Searchguard Engine
//!
//! Guardrails policy engine sitting between an LLM-driven search client
//! and a remote query execution backend: decides whether a submitted
//! query may run, under what resource limits, bounded by how many
//! concurrent executions, and which fields of the returned records must
//! be redacted before the caller sees them.
//!
//! # Example
//!
//! ```
//! use searchguard_engine::{GuardrailsEngine, PolicyConfig, PolicyStore, UserContext};
//!
//! let store = PolicyStore::from_config(PolicyConfig::default()).unwrap();
//! let engine = GuardrailsEngine::new(store).unwrap();
//!
//! let ctx = UserContext::new("alice", vec!["standard_user".to_string()]);
//! let verdict = engine.validate_search("index=main | stats count", &ctx).unwrap();
//! assert!(verdict.allowed());
//! engine.release_search(&ctx.username);
//! ```

pub mod audit;
pub mod concurrency;
pub mod engine;
pub mod error;
pub mod limits;
pub mod masking;
pub mod policy;
pub mod roles;
pub mod validator;
pub mod verdict;
pub mod violation;

// Re-exports
pub use audit::{AuditEntry, AuditLog};
pub use concurrency::{ConcurrencyTracker, SearchPermit};
pub use engine::{GuardrailsEngine, SearchExecutor, SearchOutcome, UserContext};
pub use error::{GuardrailError, Result};
pub use limits::LimitRewriter;
pub use masking::{DataMasker, Record};
pub use policy::{PolicyConfig, PolicyStore, RoleLimits};
pub use roles::{resolve, RoleName, RoleResolution};
pub use validator::QueryValidator;
pub use verdict::{ExecutionMetadata, ValidationResult};
pub use violation::{EnforcementLevel, Violation, ViolationCategory, ViolationSeverity};

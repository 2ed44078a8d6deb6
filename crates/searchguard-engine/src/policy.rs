//! Policy configuration and the immutable policy store
//!
//! The policy document (YAML/TOML/JSON, loaded through the `config` crate
//! with a `SEARCHGUARD`-prefixed environment overlay) is parsed once at
//! startup into [`PolicyConfig`], validated, and compiled into a
//! [`PolicyStore`]. The store is immutable for its lifetime; a reload
//! builds a fresh store and swaps the `Arc`, never patches fields in place.
//!
//! All regex lists are compiled here, once, so validation calls never pay
//! for recompilation.

use std::collections::HashMap;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use searchguard_core::CoreError;

use crate::error::{GuardrailError, Result};
use crate::roles::RoleName;

/// Top-level guardrails switches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsSection {
    /// Master switch; when false, validation allows everything and masking
    /// is a passthrough
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fall back to restrictive defaults on load failure instead of
    /// serving unrestricted
    #[serde(default = "default_true")]
    pub fail_safe_mode: bool,

    /// Record audit entries for enforcement actions
    #[serde(default = "default_true")]
    pub audit_logging: bool,
}

impl Default for GuardrailsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_safe_mode: true,
            audit_logging: true,
        }
    }
}

/// Security rule lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySection {
    /// Command tokens a query must not contain after a pipe
    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    /// Payload-level threat patterns; matches always block and have no
    /// bypass flag
    #[serde(default = "default_blocked_patterns")]
    pub blocked_patterns: Vec<String>,

    /// Patterns that warn without blocking
    #[serde(default = "default_warning_patterns")]
    pub warning_patterns: Vec<String>,
}

impl Default for SecuritySection {
    fn default() -> Self {
        Self {
            blocked_commands: default_blocked_commands(),
            blocked_patterns: default_blocked_patterns(),
            warning_patterns: default_warning_patterns(),
        }
    }
}

/// Time-range ceilings and defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeLimits {
    #[serde(default = "default_max_time_range_days")]
    pub max_time_range_days: u32,

    /// Appended to queries that specify no time range, e.g. "-24h"
    #[serde(default = "default_time_range")]
    pub default_time_range: String,
}

impl Default for TimeLimits {
    fn default() -> Self {
        Self {
            max_time_range_days: default_max_time_range_days(),
            default_time_range: default_time_range(),
        }
    }
}

/// Result-count ceilings and defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultLimits {
    #[serde(default = "default_max_results")]
    pub max_results_per_search: usize,

    /// Applied to queries that specify no result limit
    #[serde(default = "default_result_limit")]
    pub default_result_limit: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_results_per_search: default_max_results(),
            default_result_limit: default_result_limit(),
        }
    }
}

/// Execution ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    #[serde(default = "default_timeout_seconds")]
    pub search_timeout_seconds: u64,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_searches: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            search_timeout_seconds: default_timeout_seconds(),
            max_concurrent_searches: default_max_concurrent(),
        }
    }
}

/// Performance section of the policy document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceSection {
    #[serde(default)]
    pub time_limits: TimeLimits,

    #[serde(default)]
    pub result_limits: ResultLimits,

    #[serde(default)]
    pub execution_limits: ExecutionLimits,
}

/// Data-masking master switch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMaskingSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for DataMaskingSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Privacy section of the policy document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacySection {
    #[serde(default)]
    pub data_masking: DataMaskingSection,

    /// Field-name substrings whose values get masked
    #[serde(default = "default_sensitive_fields")]
    pub sensitive_fields: Vec<String>,

    /// Replacement template per field category, plus a "default" entry
    #[serde(default = "default_masking_patterns")]
    pub masking_patterns: HashMap<String, String>,

    /// Fields dropped from records entirely, never just masked
    #[serde(default = "default_filtered_fields")]
    pub filtered_fields: Vec<String>,
}

impl Default for PrivacySection {
    fn default() -> Self {
        Self {
            data_masking: DataMaskingSection::default(),
            sensitive_fields: default_sensitive_fields(),
            masking_patterns: default_masking_patterns(),
            filtered_fields: default_filtered_fields(),
        }
    }
}

/// Per-role entry in the policy document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePolicy {
    #[serde(default)]
    pub bypass_command_blocks: bool,

    #[serde(default)]
    pub bypass_time_limits: bool,

    #[serde(default = "default_max_time_range_days")]
    pub max_time_range_days: u32,

    #[serde(default = "default_max_results")]
    pub max_results_per_search: usize,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_searches: usize,

    #[serde(default = "default_timeout_seconds")]
    pub search_timeout_seconds: u64,

    #[serde(default = "default_true")]
    pub data_masking_enabled: bool,
}

/// Fully-resolved limits for one role, combining the role's policy entry
/// with the performance-section defaults. This is what the validator,
/// tracker, and masker receive; none of them read policy directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLimits {
    pub max_time_range_days: u32,
    pub default_time_range: String,
    pub max_results_per_search: usize,
    pub default_result_limit: usize,
    pub search_timeout_seconds: u64,
    pub max_concurrent_searches: usize,
    pub bypass_command_blocks: bool,
    pub bypass_time_limits: bool,
    pub data_masking_enabled: bool,
}

/// The parsed policy document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub guardrails: GuardrailsSection,

    #[serde(default)]
    pub security: SecuritySection,

    #[serde(default)]
    pub performance: PerformanceSection,

    #[serde(default)]
    pub privacy: PrivacySection,

    #[serde(default = "default_user_roles")]
    pub user_roles: HashMap<String, RolePolicy>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            guardrails: GuardrailsSection::default(),
            security: SecuritySection::default(),
            performance: PerformanceSection::default(),
            privacy: PrivacySection::default(),
            user_roles: default_user_roles(),
        }
    }
}

impl PolicyConfig {
    /// Restrictive configuration used when a policy load fails under
    /// fail-safe mode: every tier pinned to the most restrictive limits,
    /// masking forced on, security lists kept.
    pub fn fail_safe() -> Self {
        let mut config = Self::default();
        let restrictive = RolePolicy {
            bypass_command_blocks: false,
            bypass_time_limits: false,
            max_time_range_days: 1,
            max_results_per_search: 100,
            max_concurrent_searches: 1,
            search_timeout_seconds: 60,
            data_masking_enabled: true,
        };
        for tier in RoleName::PRECEDENCE {
            config
                .user_roles
                .insert(tier.as_str().to_string(), restrictive.clone());
        }
        config.guardrails.fail_safe_mode = true;
        config.privacy.data_masking.enabled = true;
        config
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_max_time_range_days() -> u32 {
    30
}

fn default_time_range() -> String {
    "-24h".to_string()
}

fn default_max_results() -> usize {
    1000
}

fn default_result_limit() -> usize {
    100
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_max_concurrent() -> usize {
    3
}

fn default_blocked_commands() -> Vec<String> {
    [
        "|delete",
        "|collect",
        "|outputcsv",
        "|outputlookup",
        "|sendemail",
        "|script",
        "|runshellscript",
        "|dump",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_blocked_patterns() -> Vec<String> {
    [
        // Dynamic construction of a command that is then piped to run
        r"\beval\b[^|]*\+[^|]*\|\s*run",
        // Token substitution used to smuggle command names
        r"\$\w+\$",
        // Path traversal
        r"\.\.[/\\]",
        // Long base64 blobs, the usual encoded-payload carrier
        r"[A-Za-z0-9+/]{200,}={0,2}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_warning_patterns() -> Vec<String> {
    [
        r"index\s*=\s*\*",
        r"earliest\s*=\s*0(?:\s|$)",
        r"\|\s*transaction\b",
        r"\|\s*join\b",
        r"^\s*search\s+\*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_sensitive_fields() -> Vec<String> {
    [
        "password", "passwd", "secret", "token", "api_key", "ssn",
        "social_security", "credit_card", "email", "phone",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_masking_patterns() -> HashMap<String, String> {
    [
        ("email", "****@****.***"),
        ("phone", "***-***-****"),
        ("ssn", "***-**-****"),
        ("credit_card", "****-****-****-****"),
        ("ip_address", "xxx.xxx.xxx.xxx"),
        ("default", "[MASKED]"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_filtered_fields() -> Vec<String> {
    ["password_hash", "private_key", "session_cookie"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_user_roles() -> HashMap<String, RolePolicy> {
    let mut roles = HashMap::new();
    // bypass_command_blocks ships false for every tier, admin included;
    // command blocks are hard blocks unless policy explicitly opts out.
    roles.insert(
        "admin".to_string(),
        RolePolicy {
            bypass_command_blocks: false,
            bypass_time_limits: true,
            max_time_range_days: 365,
            max_results_per_search: 50_000,
            max_concurrent_searches: 10,
            search_timeout_seconds: 600,
            data_masking_enabled: false,
        },
    );
    roles.insert(
        "power_user".to_string(),
        RolePolicy {
            bypass_command_blocks: false,
            bypass_time_limits: false,
            max_time_range_days: 90,
            max_results_per_search: 10_000,
            max_concurrent_searches: 5,
            search_timeout_seconds: 300,
            data_masking_enabled: true,
        },
    );
    roles.insert(
        "standard_user".to_string(),
        RolePolicy {
            bypass_command_blocks: false,
            bypass_time_limits: false,
            max_time_range_days: 30,
            max_results_per_search: 1000,
            max_concurrent_searches: 3,
            search_timeout_seconds: 300,
            data_masking_enabled: true,
        },
    );
    roles.insert(
        "readonly_user".to_string(),
        RolePolicy {
            bypass_command_blocks: false,
            bypass_time_limits: false,
            max_time_range_days: 7,
            max_results_per_search: 500,
            max_concurrent_searches: 2,
            search_timeout_seconds: 120,
            data_masking_enabled: true,
        },
    );
    roles
}

/// Security lists compiled once at load time
#[derive(Debug, Default)]
pub struct CompiledPolicy {
    /// (configured token, detection regex) per blocked command
    pub blocked_commands: Vec<(String, Regex)>,
    /// (configured pattern, compiled regex) per blocked pattern
    pub blocked_patterns: Vec<(String, Regex)>,
    /// (configured pattern, compiled regex) per warning pattern
    pub warning_patterns: Vec<(String, Regex)>,
    /// Quoted-fragment concatenation, used to catch blocked commands
    /// assembled piecewise inside an `eval`. `None` only in the degraded
    /// empty-list fallback.
    pub quoted_concat: Option<Regex>,
}

impl CompiledPolicy {
    fn compile(security: &SecuritySection) -> Result<Self> {
        let mut blocked_commands = Vec::new();
        for command in &security.blocked_commands {
            // Strip the leading pipe from the configured token; matching
            // re-anchors it to any pipe-delimited command position.
            let token = command.trim().trim_start_matches('|').trim().to_lowercase();
            if token.is_empty() {
                return Err(GuardrailError::error(format!(
                    "Blocked command entry '{}' has no command token",
                    command
                )));
            }
            let pattern = format!(r"\|\s*{}\b", regex::escape(&token));
            blocked_commands.push((command.clone(), compile_pattern(&pattern)?));
        }

        let mut blocked_patterns = Vec::new();
        for pattern in &security.blocked_patterns {
            blocked_patterns.push((pattern.clone(), compile_pattern(pattern)?));
        }

        let mut warning_patterns = Vec::new();
        for pattern in &security.warning_patterns {
            warning_patterns.push((pattern.clone(), compile_pattern(pattern)?));
        }

        let quoted_concat = compile_pattern(r#"["']([a-z0-9]{3,})["']\s*\+\s*["']"#)?;

        Ok(Self {
            blocked_commands,
            blocked_patterns,
            warning_patterns,
            quoted_concat: Some(quoted_concat),
        })
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .map_err(|e| GuardrailError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })
}

/// Immutable holder of the validated policy and its compiled rule lists
#[derive(Debug)]
pub struct PolicyStore {
    config: PolicyConfig,
    compiled: CompiledPolicy,
    fail_safe_active: bool,
}

impl PolicyStore {
    /// Validate and compile an in-memory policy configuration
    pub fn from_config(config: PolicyConfig) -> Result<Self> {
        // Every tier the resolver can produce needs a limits entry;
        // absence is a configuration error, not a runtime fallback.
        for tier in RoleName::PRECEDENCE {
            if !config.user_roles.contains_key(tier.as_str()) {
                return Err(GuardrailError::MissingRole(tier.as_str().to_string()));
            }
        }

        let compiled = CompiledPolicy::compile(&config.security)?;

        Ok(Self {
            config,
            compiled,
            fail_safe_active: false,
        })
    }

    /// Load a policy document from a file, with `SEARCHGUARD`-prefixed
    /// environment variables layered on top
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(CoreError::config(format!(
                "Policy file not found: {}",
                path.display()
            ))
            .into());
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SEARCHGUARD").separator("__"))
            .build()
            .map_err(CoreError::from)?;

        let policy: PolicyConfig = settings.try_deserialize().map_err(CoreError::from)?;

        tracing::info!("Policy loaded from {}", path.display());

        Self::from_config(policy)
    }

    /// Load a policy document, falling back to restrictive fail-safe
    /// defaults on any load or validation error
    pub fn load_or_fail_safe<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("Policy load failed, activating fail-safe defaults: {}", e);
                Self::fail_safe()
            }
        }
    }

    /// Build the restrictive fail-safe store
    pub fn fail_safe() -> Self {
        let config = PolicyConfig::fail_safe();
        match Self::from_config(config) {
            Ok(mut store) => {
                store.fail_safe_active = true;
                store
            }
            Err(e) => {
                // Fail-safe defaults are static and known-valid; reaching
                // this arm means they were broken in source. Serve with
                // empty rule lists rather than crash, and log loudly.
                tracing::error!("Fail-safe defaults failed to compile: {}", e);
                Self {
                    config: PolicyConfig::fail_safe(),
                    compiled: CompiledPolicy::default(),
                    fail_safe_active: true,
                }
            }
        }
    }

    /// The parsed policy document
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Compiled security rule lists
    pub fn compiled(&self) -> &CompiledPolicy {
        &self.compiled
    }

    /// Whether this store came from the fail-safe path
    pub fn fail_safe_active(&self) -> bool {
        self.fail_safe_active
    }

    /// Resolve the full limits for a role, combining its policy entry with
    /// the performance-section defaults
    pub fn limits_for(&self, role: RoleName) -> Result<RoleLimits> {
        let policy = self
            .config
            .user_roles
            .get(role.as_str())
            .ok_or_else(|| GuardrailError::MissingRole(role.as_str().to_string()))?;

        let performance = &self.config.performance;

        Ok(RoleLimits {
            max_time_range_days: policy.max_time_range_days,
            default_time_range: performance.time_limits.default_time_range.clone(),
            max_results_per_search: policy.max_results_per_search,
            default_result_limit: performance.result_limits.default_result_limit,
            search_timeout_seconds: policy.search_timeout_seconds,
            max_concurrent_searches: policy.max_concurrent_searches,
            bypass_command_blocks: policy.bypass_command_blocks,
            bypass_time_limits: policy.bypass_time_limits,
            data_masking_enabled: policy.data_masking_enabled,
        })
    }
}

//! Audit trail for enforcement actions
//!
//! Entries never store the raw query; a short SHA-256 prefix and the
//! query length stand in for it. The trail is in-memory and
//! process-lifetime, mirrored to `tracing` for operators.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One recorded enforcement action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// Action kind, e.g. "security_block", "validation_warning",
    /// "concurrency_reject", "data_masking", "timeout"
    pub action: String,
    pub username: String,
    pub roles: Vec<String>,
    /// First 16 hex chars of the query's SHA-256
    pub query_hash: String,
    pub query_len: usize,
    /// Free-form context for the action
    pub details: serde_json::Value,
}

/// In-memory audit trail
pub struct AuditLog {
    enabled: bool,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Record an enforcement action. No-op when audit logging is off.
    pub fn record(
        &self,
        action: &str,
        username: &str,
        roles: &[String],
        query: &str,
        details: serde_json::Value,
    ) {
        if !self.enabled {
            return;
        }

        let entry = AuditEntry {
            timestamp: Utc::now(),
            action: action.to_string(),
            username: username.to_string(),
            roles: roles.to_vec(),
            query_hash: hash_query(query),
            query_len: query.len(),
            details,
        };

        tracing::info!(
            action = action,
            user = username,
            query_hash = %entry.query_hash,
            "Guardrails audit"
        );

        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(e) => tracing::error!("Audit trail lock poisoned, entry dropped: {}", e),
        }
    }

    /// Snapshot of the recorded entries
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(e) => {
                tracing::error!("Audit trail lock poisoned: {}", e);
                Vec::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Privacy-preserving query fingerprint: first 16 hex chars of SHA-256
fn hash_query(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..16].to_string()
}

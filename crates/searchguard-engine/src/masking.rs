//! Post-execution data masking
//!
//! Field-name-driven: a field named `notes` containing an email address is
//! not masked. Fields in `filtered_fields` are dropped from records
//! entirely; fields matching `sensitive_fields` (or the built-in
//! credential-name heuristic) have their values replaced by the template
//! for the field's detected category, falling back to the `default`
//! template. Field order among retained fields is preserved.

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::error::{GuardrailError, Result};
use crate::policy::{PolicyStore, PrivacySection, RoleLimits};

/// One search result row. The map preserves insertion order.
pub type Record = serde_json::Map<String, Value>;

const DEFAULT_TEMPLATE: &str = "[MASKED]";

/// Masking statistics alongside the sanitized records
#[derive(Debug)]
pub struct MaskedRecords {
    pub records: Vec<Record>,
    pub fields_masked: usize,
    pub fields_dropped: usize,
}

/// Redacts or drops sensitive fields from result records
#[derive(Debug, Clone)]
pub struct DataMasker {
    enabled: bool,
    sensitive_fields: Vec<String>,
    filtered_fields: Vec<String>,
    privacy: PrivacySection,
    name_heuristic: Regex,
}

impl DataMasker {
    pub fn new(store: &PolicyStore) -> Result<Self> {
        let privacy = store.config().privacy.clone();

        let name_heuristic = RegexBuilder::new(r"pass|pwd|secret|token|key|ssn|credit|card")
            .case_insensitive(true)
            .build()
            .map_err(|e| GuardrailError::InvalidPattern {
                pattern: "sensitive-name heuristic".to_string(),
                source: e,
            })?;

        Ok(Self {
            enabled: privacy.data_masking.enabled,
            sensitive_fields: privacy
                .sensitive_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            filtered_fields: privacy
                .filtered_fields
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            privacy,
            name_heuristic,
        })
    }

    /// Sanitize records under a resolved role's masking policy.
    ///
    /// Roles with masking disabled get their records back unchanged.
    pub fn mask(&self, records: Vec<Record>, limits: &RoleLimits) -> MaskedRecords {
        if !self.enabled || !limits.data_masking_enabled {
            return MaskedRecords {
                records,
                fields_masked: 0,
                fields_dropped: 0,
            };
        }

        let mut fields_masked = 0;
        let mut fields_dropped = 0;

        let records = records
            .into_iter()
            .map(|record| {
                let mut masked = Record::new();
                for (field, value) in record {
                    if self.is_filtered(&field) {
                        fields_dropped += 1;
                        continue;
                    }
                    if self.is_sensitive(&field) {
                        masked.insert(field.clone(), Value::String(self.template_for(&field)));
                        fields_masked += 1;
                    } else {
                        masked.insert(field, value);
                    }
                }
                masked
            })
            .collect();

        MaskedRecords {
            records,
            fields_masked,
            fields_dropped,
        }
    }

    fn is_filtered(&self, field: &str) -> bool {
        let field = field.to_lowercase();
        self.filtered_fields.iter().any(|f| f == &field)
    }

    /// A field is sensitive when a configured substring appears in its
    /// name, or the built-in credential-name heuristic matches
    fn is_sensitive(&self, field: &str) -> bool {
        let field = field.to_lowercase();
        self.sensitive_fields.iter().any(|s| field.contains(s))
            || self.name_heuristic.is_match(&field)
    }

    /// Pick the replacement template by field-name category, falling back
    /// to the `default` template. Unclassifiable fields always get masked
    /// with the default rather than passed through.
    fn template_for(&self, field: &str) -> String {
        let field = field.to_lowercase();

        let category = if field.contains("email") {
            "email"
        } else if field.contains("phone") || field.contains("mobile") {
            "phone"
        } else if field.contains("ssn") || field.contains("social") {
            "ssn"
        } else if field.contains("credit") || field.contains("card") {
            "credit_card"
        } else if field.contains("ip") {
            "ip_address"
        } else {
            "default"
        };

        self.privacy
            .masking_patterns
            .get(category)
            .or_else(|| self.privacy.masking_patterns.get("default"))
            .cloned()
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string())
    }
}

//! Query validation against the compiled security rule lists
//!
//! Three layers, in order: blocked command tokens (skippable per role via
//! `bypass_command_blocks`), blocked payload patterns (never bypassable;
//! only command and time bypasses exist in policy), and warning patterns
//! (advisory only).
//!
//! Commands are matched against a normalized form of the query to defeat
//! the usual bypass tricks: percent-encoded characters, Unicode confusable
//! substitution, and whitespace padding. Patterns run against both the
//! original and the normalized text.

use std::sync::Arc;

use percent_encoding::percent_decode_str;
use unicode_normalization::UnicodeNormalization;

use crate::policy::{PolicyStore, RoleLimits};
use crate::roles::RoleName;
use crate::verdict::ValidationResult;
use crate::violation::Violation;

/// Applies the compiled security rules to submitted queries
#[derive(Clone)]
pub struct QueryValidator {
    store: Arc<PolicyStore>,
}

impl QueryValidator {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Validate a query under a resolved role's limits.
    ///
    /// Produces the security-layer verdict only; limit clamping and
    /// concurrency admission are layered on by the engine.
    pub fn validate(&self, query: &str, limits: &RoleLimits, role: RoleName) -> ValidationResult {
        let mut verdict = ValidationResult::passing(query, role);
        let normalized = normalize_query(query);
        // Concatenation markers fold to spaces during normalization, so
        // the construction check runs on the raw (lowercased) text.
        let lowered = query.to_lowercase();
        let compiled = self.store.compiled();

        if !limits.bypass_command_blocks {
            for (token, pattern) in &compiled.blocked_commands {
                if pattern.is_match(&normalized) {
                    verdict
                        .violations
                        .push(Violation::blocked_command(format!(
                            "Blocked command detected: {}",
                            token
                        )));
                } else if compiled
                    .quoted_concat
                    .as_ref()
                    .is_some_and(|re| is_dynamic_construction(token, &lowered, re))
                {
                    verdict
                        .violations
                        .push(Violation::blocked_command(format!(
                            "Dynamic construction of blocked command detected: {}",
                            token
                        )));
                }
            }
        }

        for (source, pattern) in &compiled.blocked_patterns {
            if pattern.is_match(query) || pattern.is_match(&normalized) {
                verdict
                    .violations
                    .push(Violation::blocked_pattern(format!(
                        "Blocked pattern detected: {}",
                        source
                    )));
            }
        }

        for (source, pattern) in &compiled.warning_patterns {
            if pattern.is_match(query) || pattern.is_match(&normalized) {
                verdict
                    .warnings
                    .push(format!("Warning pattern matched: {}", source));
            }
        }

        if !verdict.violations.is_empty() {
            verdict.block("Security violation");
            tracing::warn!(
                query_len = query.len(),
                violations = verdict.violations.len(),
                "Query blocked by security rules"
            );
        } else {
            verdict.update_enforcement_level();
        }

        verdict
    }
}

/// Normalize a query for bypass-resistant matching: NFKD-decompose, fold
/// Unicode confusables to ASCII, percent-decode (with `+` as space),
/// collapse whitespace, lowercase.
pub fn normalize_query(query: &str) -> String {
    let canonical: String = query.nfkd().collect();
    let folded: String = canonical.chars().map(fold_confusable).collect();

    // Two decode passes: the first handles plain percent escapes, the
    // second handles form-style encoding where '+' stands for a space.
    let decoded = percent_decode(&folded);
    let decoded = percent_decode(&decoded.replace('+', " "));

    decoded
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn percent_decode(text: &str) -> String {
    match percent_decode_str(text).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => text.to_string(),
    }
}

/// Map visually-confusable characters (Cyrillic/Greek lookalikes, dash
/// variants) to their ASCII equivalents
fn fold_confusable(c: char) -> char {
    match c {
        // Cyrillic lookalikes
        'а' => 'a',
        'А' => 'A',
        'е' => 'e',
        'Е' => 'E',
        'о' => 'o',
        'О' => 'O',
        'р' => 'p',
        'Р' => 'P',
        'с' => 'c',
        'С' => 'C',
        'х' => 'x',
        'Х' => 'X',
        'у' => 'y',
        'У' => 'Y',
        'і' => 'i',
        'І' => 'I',
        'ѕ' => 's',
        'Ѕ' => 'S',
        // Greek lookalikes
        'α' => 'a',
        'Α' => 'A',
        'ο' => 'o',
        'Ο' => 'O',
        'ρ' => 'p',
        'Ρ' => 'P',
        // Dash variants
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' => '-',
        _ => c,
    }
}

/// Whether the query assembles a blocked command token from quoted
/// fragments, e.g. `eval cmd="del" + "ete"`.
///
/// Flags only when an `eval` is present alongside a concatenation or
/// substitution marker, and a quoted fragment of at least three
/// characters is a proper prefix of the command token.
fn is_dynamic_construction(token: &str, query: &str, quoted_concat: &regex::Regex) -> bool {
    if !query.contains("eval") || !(query.contains('+') || query.contains('$')) {
        return false;
    }

    let command = token.trim().trim_start_matches('|').trim();
    if command.len() < 4 {
        return false;
    }

    quoted_concat.captures_iter(query).any(|caps| {
        let fragment = &caps[1];
        fragment.len() < command.len() && command.starts_with(fragment)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyConfig;
    use crate::violation::{EnforcementLevel, ViolationCategory};

    fn validator() -> QueryValidator {
        let store = PolicyStore::from_config(PolicyConfig::default()).unwrap();
        QueryValidator::new(Arc::new(store))
    }

    fn standard_limits(store: &Arc<PolicyStore>) -> RoleLimits {
        store.limits_for(RoleName::StandardUser).unwrap()
    }

    fn validate(query: &str) -> ValidationResult {
        let store = Arc::new(PolicyStore::from_config(PolicyConfig::default()).unwrap());
        let limits = standard_limits(&store);
        QueryValidator::new(store).validate(query, &limits, RoleName::StandardUser)
    }

    #[test]
    fn test_blocked_command_after_pipe() {
        let verdict = validate("| delete index=main");
        assert!(verdict.blocked);
        assert_eq!(verdict.enforcement_level, EnforcementLevel::Strict);
        assert!(verdict.violations[0].message.contains("|delete"));
        assert_eq!(
            verdict.violations[0].category,
            ViolationCategory::BlockedCommand
        );
    }

    #[test]
    fn test_blocked_command_case_insensitive() {
        let verdict = validate("index=main | DELETE");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_blocked_command_whitespace_padding() {
        let verdict = validate("index=main |     delete");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_clean_query_passes() {
        let verdict = validate("index=main | stats count");
        assert!(!verdict.blocked);
        assert_eq!(verdict.enforcement_level, EnforcementLevel::None);
        assert!(verdict.warnings.is_empty());
        assert_eq!(verdict.original_query, "index=main | stats count");
    }

    #[test]
    fn test_command_name_outside_pipe_position_allowed() {
        let verdict = validate("index=main action=delete");
        assert!(!verdict.blocked);
    }

    #[test]
    fn test_bypass_command_blocks_skips_command_check_only() {
        let store = Arc::new(PolicyStore::from_config(PolicyConfig::default()).unwrap());
        let mut limits = standard_limits(&store);
        limits.bypass_command_blocks = true;

        let verdict = QueryValidator::new(store.clone()).validate(
            "| delete index=main",
            &limits,
            RoleName::Admin,
        );
        assert!(!verdict.blocked);

        // Pattern blocks have no bypass flag and stay enforced
        let verdict = QueryValidator::new(store).validate(
            "index=main ../../etc/passwd",
            &limits,
            RoleName::Admin,
        );
        assert!(verdict.blocked);
        assert_eq!(
            verdict.violations[0].category,
            ViolationCategory::BlockedPattern
        );
    }

    #[test]
    fn test_warning_pattern_does_not_block() {
        let verdict = validate("index=* | stats count");
        assert!(!verdict.blocked);
        assert_eq!(verdict.enforcement_level, EnforcementLevel::Advisory);
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[test]
    fn test_percent_encoded_command_detected() {
        // %7C is '|', %20 is ' '
        let verdict = validate("index=main %7C%20delete");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_plus_as_space_decoded() {
        // Form-style encoding uses '+' for a space
        let verdict = validate("index=main |+delete");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_compatibility_characters_decomposed() {
        // Fullwidth pipe and letters fold to ASCII under NFKD
        let verdict = validate("index=main ｜ｄｅｌｅｔｅ");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_confusable_characters_folded() {
        // Cyrillic 'е' in "delete"
        let verdict = validate("index=main | delеte");
        assert!(verdict.blocked);
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(normalize_query("  A  %7C b "), "a | b");
        assert_eq!(normalize_query("dеlеte"), "delete");
    }

    #[test]
    fn test_piecewise_command_construction_blocked() {
        // "del" + "ete" assembles a blocked command; the concatenation
        // precedes the eval, so the eval-concat pattern alone misses it
        let verdict = validate(r#"index=main | where x="del"+"ete" | eval y=1"#);
        assert!(verdict.blocked);
        assert!(verdict.violations[0]
            .message
            .contains("Dynamic construction"));
    }

    #[test]
    fn test_quoted_concat_of_unrelated_fragments_allowed() {
        let verdict = validate(r#"index=main | where x="ab"+"cd" | eval y=1"#);
        assert!(!verdict.blocked);
    }

    #[test]
    fn test_arithmetic_eval_not_flagged_as_construction() {
        let verdict = validate("index=main | eval total=count+1 | stats sum(total)");
        assert!(!verdict.blocked);
    }

    #[test]
    fn test_violations_in_rule_order() {
        let verdict = validate("| delete ../../secret");
        assert!(verdict.violations.len() >= 2);
        assert_eq!(
            verdict.violations[0].category,
            ViolationCategory::BlockedCommand
        );
        assert_eq!(
            verdict.violations[1].category,
            ViolationCategory::BlockedPattern
        );
    }

    #[test]
    fn test_validator_is_cheap_to_clone() {
        let v = validator();
        let _v2 = v.clone();
    }
}

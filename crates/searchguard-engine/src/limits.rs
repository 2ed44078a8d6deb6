//! Time-range and result-count limit enforcement
//!
//! Limits are enforced as clamp-with-notice query rewrites rather than
//! rejections: an over-broad query stays runnable at the role's ceiling,
//! and every rewrite is recorded so the caller can tell the user. Command
//! and pattern blocks stay reject-only; rewriting a malicious query is
//! unsafe, widening a legitimate one is not.

use regex::{Regex, RegexBuilder};

use crate::error::{GuardrailError, Result};
use crate::policy::RoleLimits;

/// Parsed interpretation of an `earliest=` value
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeRange {
    /// "0" or "@0": search over all time
    AllTime,
    Days(f64),
    /// Unparseable values are assumed safe, matching the lenient original
    /// behavior
    Unknown,
}

/// Outcome of limit enforcement for one query
#[derive(Debug, Clone)]
pub struct Rewrite {
    pub query: String,
    pub modifications: Vec<String>,
}

/// Rewrites queries to fit a role's time and result ceilings
///
/// The extraction regexes are fixed infrastructure compiled once at
/// construction, alongside the policy's own pattern lists.
#[derive(Debug, Clone)]
pub struct LimitRewriter {
    earliest: Regex,
    relative_range: Regex,
    result_cap: Regex,
}

impl LimitRewriter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            earliest: compile(r"earliest\s*=\s*(\S+)")?,
            relative_range: compile(r"^-(\d+)([smhd])")?,
            result_cap: compile(r"\|\s*(head|tail)\s+(\d+)")?,
        })
    }

    /// Apply time-range and result-limit enforcement, in that order
    pub fn apply(&self, query: &str, limits: &RoleLimits) -> Rewrite {
        let mut rewrite = Rewrite {
            query: query.to_string(),
            modifications: Vec::new(),
        };

        self.enforce_time_limits(&mut rewrite, limits);
        self.enforce_result_limits(&mut rewrite, limits);

        rewrite
    }

    fn enforce_time_limits(&self, rewrite: &mut Rewrite, limits: &RoleLimits) {
        let max_days = limits.max_time_range_days;

        let earliest_value = self
            .earliest
            .captures(&rewrite.query)
            .map(|caps| caps[1].trim_matches(|c| c == '"' || c == '\'').to_string());

        match earliest_value {
            Some(value) => {
                if limits.bypass_time_limits {
                    return;
                }
                if self.exceeds_limit(&value, max_days) {
                    let clamped = format!("earliest=-{}d", max_days);
                    rewrite.query = self
                        .earliest
                        .replace_all(&rewrite.query, clamped.as_str())
                        .into_owned();
                    rewrite.modifications.push(format!(
                        "Time range limited to maximum {} days",
                        max_days
                    ));
                }
            }
            None => {
                // No time range at all; substitute the role's default
                rewrite.query = format!("{} earliest={}", rewrite.query, limits.default_time_range);
                rewrite.modifications.push(format!(
                    "Added default time range: {}",
                    limits.default_time_range
                ));
            }
        }
    }

    fn enforce_result_limits(&self, rewrite: &mut Rewrite, limits: &RoleLimits) {
        let max_results = limits.max_results_per_search;

        let result_cap = self.result_cap.captures(&rewrite.query).map(|caps| {
            // A count too large for usize still exceeds any ceiling
            let requested = caps[2].parse::<usize>().unwrap_or(usize::MAX);
            (caps[1].to_string(), requested)
        });

        match result_cap {
            Some((command, requested)) => {
                if requested > max_results {
                    let clamped = format!("| {} {}", command, max_results);
                    rewrite.query = self
                        .result_cap
                        .replace(&rewrite.query, clamped.as_str())
                        .into_owned();
                    rewrite.modifications.push(format!(
                        "Result limit clamped to {} events",
                        max_results
                    ));
                }
            }
            None => {
                rewrite.query = format!("{} | head {}", rewrite.query, limits.default_result_limit);
                rewrite.modifications.push(format!(
                    "Added default result limit: {} events",
                    limits.default_result_limit
                ));
            }
        }
    }

    /// Whether a time-range value reaches further back than `max_days`
    fn exceeds_limit(&self, value: &str, max_days: u32) -> bool {
        match self.parse_time_range(value) {
            TimeRange::AllTime => true,
            TimeRange::Days(days) => days > f64::from(max_days),
            TimeRange::Unknown => false,
        }
    }

    fn parse_time_range(&self, value: &str) -> TimeRange {
        let value = value.to_lowercase();
        if value == "0" || value == "@0" {
            return TimeRange::AllTime;
        }

        if let Some(caps) = self.relative_range.captures(&value) {
            let number: f64 = match caps[1].parse() {
                Ok(n) => n,
                Err(_) => return TimeRange::Unknown,
            };
            let days = match &caps[2] {
                "s" => number / (60.0 * 60.0 * 24.0),
                "m" => number / (60.0 * 24.0),
                "h" => number / 24.0,
                "d" => number,
                _ => return TimeRange::Unknown,
            };
            return TimeRange::Days(days);
        }

        TimeRange::Unknown
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| GuardrailError::InvalidPattern {
            pattern: pattern.to_string(),
            source: e,
        })
}

//! Per-user concurrent-search accounting
//!
//! The one piece of shared mutable state in the engine. Counters live in a
//! sharded map; the entry API serializes access per key, so two racing
//! `try_acquire` calls for the same user cannot both take the last slot.
//!
//! Every successful acquisition must be released exactly once. A release
//! without a matching acquire is a lifecycle bug and is logged as an
//! invariant violation, never silently absorbed into a negative count.

use dashmap::DashMap;
use std::sync::Arc;

/// Tracks in-flight searches per user and admits against a role ceiling
pub struct ConcurrencyTracker {
    active: Arc<DashMap<String, usize>>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(DashMap::new()),
        }
    }

    /// Atomic check-and-increment against the user's ceiling.
    ///
    /// Returns false without mutating state when the user is already at
    /// `max_concurrent` in-flight searches.
    pub fn try_acquire(&self, username: &str, max_concurrent: usize) -> bool {
        if max_concurrent == 0 {
            return false;
        }

        // The entry guard holds the shard lock, making the check and the
        // increment one atomic step for this key.
        let mut entry = self.active.entry(username.to_string()).or_insert(0);
        if *entry >= max_concurrent {
            tracing::debug!(
                user = username,
                active = *entry,
                ceiling = max_concurrent,
                "Concurrency admission rejected"
            );
            false
        } else {
            *entry += 1;
            true
        }
    }

    /// Decrement the user's in-flight count. Returns whether a held slot
    /// was actually released.
    ///
    /// Releasing without a matching acquire indicates a paired-release bug
    /// upstream; it is surfaced at error level and the count stays at zero.
    pub fn release(&self, username: &str) -> bool {
        match self.active.get_mut(username) {
            Some(mut count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => {
                tracing::error!(
                    user = username,
                    "Invariant violation: release without matching acquire"
                );
                false
            }
        }
    }

    /// Acquire a slot wrapped in a guard that releases on drop.
    ///
    /// This is the preferred path for execution flows: the slot is freed
    /// on normal completion, failure, cancellation, and timeout alike.
    pub fn acquire_scoped(&self, username: &str, max_concurrent: usize) -> Option<SearchPermit> {
        if self.try_acquire(username, max_concurrent) {
            Some(SearchPermit {
                tracker: self.clone(),
                username: username.to_string(),
                released: false,
            })
        } else {
            None
        }
    }

    /// Current in-flight count for a user
    pub fn active_count(&self, username: &str) -> usize {
        self.active.get(username).map(|v| *v).unwrap_or(0)
    }
}

impl Clone for ConcurrencyTracker {
    fn clone(&self) -> Self {
        Self {
            active: Arc::clone(&self.active),
        }
    }
}

impl Default for ConcurrencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for one admitted search slot
///
/// Dropping the permit releases the slot. [`SearchPermit::detach`] hands
/// release responsibility back to the caller, for flows that pair a
/// `validate` call with an explicit later `release`.
pub struct SearchPermit {
    tracker: ConcurrencyTracker,
    username: String,
    released: bool,
}

impl SearchPermit {
    /// Release the slot now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Keep the slot held past this permit's lifetime; the caller takes
    /// over the obligation to call `ConcurrencyTracker::release` once.
    pub fn detach(mut self) {
        self.released = true;
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.tracker.release(&self.username);
        }
    }
}

impl Drop for SearchPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

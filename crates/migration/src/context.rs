//! Shared state of one migration run
//!
//! `MigrationContext` is shared by every migrator of every stage. It holds
//! the read-only configuration plus the concurrently updated counters,
//! summary messages and failed item list.

use std::fmt;
use std::thread;
use std::time::Duration;

use cnxrepo_core::ItemKind;
use parking_lot::Mutex;

use crate::config::MigrationConfig;
use crate::counters::{Counter, CounterSet};
use crate::retry::RetryPolicy;

/// An item that could not be migrated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    /// Item id, or the directory path when no id could be derived
    pub item: String,
    /// Final error
    pub error: String,
}

impl fmt::Display for FailedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.error)
    }
}

/// Configuration and shared counters of a run
#[derive(Debug)]
pub struct MigrationContext {
    config: MigrationConfig,
    counters: CounterSet,
    summary: Mutex<Vec<String>>,
    failures: Mutex<Vec<FailedItem>>,
}

impl MigrationContext {
    /// Create a context for `config`
    pub fn new(config: MigrationConfig) -> Self {
        MigrationContext {
            config,
            counters: CounterSet::new(),
            summary: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Run configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Run counters
    pub fn counters(&self) -> &CounterSet {
        &self.counters
    }

    /// Retry policy derived from the configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// Add `delta` to a per-kind counter
    pub fn increment(&self, counter: Counter, kind: ItemKind, delta: u64) {
        self.counters.increment_kind(counter, kind, delta);
    }

    /// Append a summary message
    pub fn add_summary(&self, message: impl Into<String>) {
        self.summary.lock().push(message.into());
    }

    /// Summary messages in insertion order
    pub fn summary(&self) -> Vec<String> {
        self.summary.lock().clone()
    }

    /// Record a failed item and bump its kind's failure counter
    pub fn record_failure(&self, kind: ItemKind, item: impl Into<String>, error: impl fmt::Display) {
        self.increment(Counter::ItemsFailed, kind, 1);
        self.failures.lock().push(FailedItem {
            item: item.into(),
            error: error.to_string(),
        });
    }

    /// Failed items in the order they were reported
    pub fn failures(&self) -> Vec<FailedItem> {
        self.failures.lock().clone()
    }

    /// Sleep for the configured pause before a version append
    pub fn transaction_pause(&self) {
        pause(self.config.transaction_delay());
    }
}

pub(crate) fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

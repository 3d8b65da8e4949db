//! Retry with a fixed delay for migration steps
//!
//! A step is tried up to `max_attempts` times. Only transient repository
//! errors (`RepoError::is_retryable`) are retried; any other error fails the
//! step at once.
//!
//! Counting convention: the first retried failure bumps the step's
//! "with retries" counter once; every failure that is followed by another
//! attempt bumps its retry counter. A step that exhausts its budget has
//! therefore bumped the retry counter `max_attempts - 1` times. Steps that
//! belong to one unit (a resource's creation and its upload ticket) share a
//! flag through `run_counted`, so the unit is counted once.

use std::time::Duration;

use cnxrepo_core::{ItemId, ItemKind, RepoError};
use tracing::warn;

use crate::config::MigrationConfig;
use crate::context::pause;
use crate::counters::{Counter, CounterSet};
use crate::error::{MigrationError, Result};

// ============================================================================
// Retry Configuration
// ============================================================================

/// Configuration for step retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per step, at least 1
    pub max_attempts: u32,
    /// Fixed pause after each failed attempt
    pub failure_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            failure_delay: Duration::from_millis(10),
        }
    }
}

/// Which counters a retried step updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStep {
    /// Item creation
    Create,
    /// Version append or resource upload
    Upload,
}

impl RetryStep {
    fn counters(self) -> (Counter, Counter) {
        match self {
            RetryStep::Create => (Counter::ItemsWithCreationRetries, Counter::CreationRetries),
            RetryStep::Upload => (
                Counter::VersionsWithUploadRetries,
                Counter::VersionUploadRetries,
            ),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy from the run configuration
    pub fn from_config(config: &MigrationConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            failure_delay: config.failure_delay(),
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the pause after a failed attempt
    pub fn with_failure_delay(mut self, failure_delay: Duration) -> Self {
        self.failure_delay = failure_delay;
        self
    }

    /// Run `op` until it succeeds, fails fatally, or the budget runs out
    ///
    /// `version` identifies the version for append steps; it only feeds
    /// diagnostics.
    pub fn run<T, F>(
        &self,
        counters: &CounterSet,
        step: RetryStep,
        item: ItemId,
        version: Option<u32>,
        op: F,
    ) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, RepoError>,
    {
        let mut retried = false;
        self.run_counted(counters, step, item, version, &mut retried, op)
    }

    /// Like `run`, with the "with retries" flag owned by the caller
    ///
    /// The "with retries" counter is bumped only while `retried` is false,
    /// which the first retry then sets.
    pub fn run_counted<T, F>(
        &self,
        counters: &CounterSet,
        step: RetryStep,
        item: ItemId,
        version: Option<u32>,
        retried: &mut bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> std::result::Result<T, RepoError>,
    {
        let kind: ItemKind = item.kind();
        let (with_retries, retries) = step.counters();
        let max_attempts = self.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(MigrationError::Repo(e)),
                Err(e) if attempt >= max_attempts => {
                    return Err(MigrationError::AttemptsExhausted {
                        item,
                        version,
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    if !*retried {
                        counters.increment_kind(with_retries, kind, 1);
                        *retried = true;
                    }
                    counters.increment_kind(retries, kind, 1);
                    warn!(
                        target: "cnxrepo::migrate",
                        item = %item,
                        version = ?version,
                        attempt,
                        error = %e,
                        "Attempt failed, will retry"
                    );
                    pause(self.failure_delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn module() -> ItemId {
        ItemId::new(ItemKind::Module, 12)
    }

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_failure_delay(Duration::ZERO)
    }

    #[test]
    fn test_success_first_try_counts_nothing() {
        let counters = CounterSet::new();
        let value = quick(3)
            .run(&counters, RetryStep::Create, module(), None, || Ok(7))
            .unwrap();
        assert_eq!(value, 7);
        assert!(counters.snapshot().is_empty());
    }

    #[test]
    fn test_exhaustion_after_exactly_max_attempts() {
        let counters = CounterSet::new();
        let calls = Cell::new(0);
        let err = quick(4)
            .run(&counters, RetryStep::Upload, module(), Some(2), || -> std::result::Result<(), RepoError> {
                calls.set(calls.get() + 1);
                Err(RepoError::storage("unavailable"))
            })
            .unwrap_err();

        assert_eq!(calls.get(), 4);
        match err {
            MigrationError::AttemptsExhausted {
                item,
                version,
                attempts,
                ..
            } => {
                assert_eq!(item, module());
                assert_eq!(version, Some(2));
                assert_eq!(attempts, 4);
            }
            other => panic!("expected AttemptsExhausted, got {:?}", other),
        }
        assert_eq!(counters.get("MODULE_VERSION_UPLOAD_RETRIES"), 3);
        assert_eq!(counters.get("MODULE_VERSIONS_WITH_UPLOAD_RETRIES"), 1);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let counters = CounterSet::new();
        let calls = Cell::new(0);
        quick(5)
            .run(&counters, RetryStep::Create, module(), None, || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(RepoError::TransactionAborted {
                        reason: "conflict".into(),
                    })
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert_eq!(counters.get("MODULE_CREATION_RETRIES"), 2);
        assert_eq!(counters.get("MODULES_WITH_CREATION_RETRIES"), 1);
    }

    #[test]
    fn test_shared_flag_counts_unit_once() {
        let counters = CounterSet::new();
        let policy = quick(3);
        let mut retried = false;
        for _ in 0..2 {
            let calls = Cell::new(0);
            policy
                .run_counted(&counters, RetryStep::Create, module(), None, &mut retried, || {
                    calls.set(calls.get() + 1);
                    if calls.get() == 1 {
                        Err(RepoError::storage("flaky"))
                    } else {
                        Ok(())
                    }
                })
                .unwrap();
        }
        assert!(retried);
        assert_eq!(counters.get("MODULES_WITH_CREATION_RETRIES"), 1);
        assert_eq!(counters.get("MODULE_CREATION_RETRIES"), 2);
    }

    #[test]
    fn test_fatal_error_not_retried() {
        let counters = CounterSet::new();
        let calls = Cell::new(0);
        let err = quick(5)
            .run(&counters, RetryStep::Create, module(), None, || -> std::result::Result<(), RepoError> {
                calls.set(calls.get() + 1);
                Err(RepoError::already_exists("m12"))
            })
            .unwrap_err();
        assert_eq!(calls.get(), 1);
        assert!(matches!(
            err,
            MigrationError::Repo(RepoError::AlreadyExists { .. })
        ));
        assert_eq!(counters.get("MODULE_CREATION_RETRIES"), 0);
    }

    #[test]
    fn test_single_attempt_budget() {
        let counters = CounterSet::new();
        let err = RetryPolicy::no_retry()
            .run(&counters, RetryStep::Create, module(), None, || -> std::result::Result<(), RepoError> {
                Err(RepoError::internal("x"))
            })
            .unwrap_err();
        assert!(matches!(
            err,
            MigrationError::AttemptsExhausted { attempts: 1, .. }
        ));
        assert!(counters.snapshot().is_empty());
    }
}

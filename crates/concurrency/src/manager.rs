//! Transaction manager for coordinating commit operations
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. begin_commit()       - Active → CommitStarted
//! 2. acquire commit lock  - serializes validate-and-apply
//! 3. validate_read_set()  - first-committer-wins
//! 4. IF conflicts: CommitFailed, return error
//! 5. apply_batch()        - one commit version for all writes
//! 6. CommitOk, return the commit version
//! ```
//!
//! The lock is held only across validation and apply, so a write can never
//! land between another transaction's validation and its apply.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use cnxrepo_core::Storage;

use crate::transaction::{CommitError, TransactionContext};
use crate::validation::validate_read_set;

/// Counters describing commit outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionStats {
    /// Transactions started
    pub started: u64,
    /// Commits that applied writes
    pub committed: u64,
    /// Commits aborted by validation
    pub conflicts: u64,
    /// Commits whose apply failed in the store
    pub apply_failures: u64,
}

/// Manages transaction ids and atomic commits
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    commit_lock: Mutex<()>,
    started: AtomicU64,
    committed: AtomicU64,
    conflicts: AtomicU64,
    apply_failures: AtomicU64,
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: AtomicU64::new(1),
            commit_lock: Mutex::new(()),
            started: AtomicU64::new(0),
            committed: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            apply_failures: AtomicU64::new(0),
        }
    }

    /// Begin a transaction against `store`
    pub fn begin(&self, store: Arc<dyn Storage>) -> TransactionContext {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
        TransactionContext::new(txn_id, store)
    }

    /// Validate and apply a transaction
    ///
    /// Returns the commit version. A read-only transaction commits without
    /// taking the lock and returns the store's current version.
    pub fn commit(&self, txn: &mut TransactionContext) -> Result<u64, CommitError> {
        txn.begin_commit()?;

        if txn.is_read_only() {
            txn.mark_commit_ok();
            return Ok(txn.store().current_version());
        }

        let store = Arc::clone(txn.store());
        let _guard = self.commit_lock.lock();

        let validation = match validate_read_set(txn.read_set(), store.as_ref()) {
            Ok(v) => v,
            Err(e) => {
                txn.mark_commit_failed(e.to_string());
                self.apply_failures.fetch_add(1, Ordering::Relaxed);
                return Err(CommitError::ApplyFailed(e));
            }
        };
        if !validation.is_valid() {
            let reason = validation.describe();
            debug!(target: "cnxrepo::txn", txn_id = txn.txn_id, %reason, "Transaction aborted");
            txn.mark_commit_failed(reason);
            self.conflicts.fetch_add(1, Ordering::Relaxed);
            return Err(CommitError::ValidationFailed(validation));
        }

        let writes = txn.take_writes();
        match store.apply_batch(writes) {
            Ok(version) => {
                txn.mark_commit_ok();
                self.committed.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cnxrepo::txn", txn_id = txn.txn_id, version, "Transaction committed");
                Ok(version)
            }
            Err(e) => {
                warn!(target: "cnxrepo::txn", txn_id = txn.txn_id, error = %e, "Commit apply failed");
                txn.mark_commit_failed(e.to_string());
                self.apply_failures.fetch_add(1, Ordering::Relaxed);
                Err(CommitError::ApplyFailed(e))
            }
        }
    }

    /// Snapshot of commit counters
    pub fn stats(&self) -> TransactionStats {
        TransactionStats {
            started: self.started.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionState;
    use cnxrepo_core::{Entity, EntityKind, Key, Property};
    use cnxrepo_storage::testing::FaultInjectingStore;
    use cnxrepo_storage::MemoryStore;

    fn entity(n: i64) -> Entity {
        Entity::new().with("n", Property::Int(n))
    }

    #[test]
    fn test_commit_applies_writes() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let manager = TransactionManager::new();
        let key = Key::root(EntityKind::Module, 1);

        let mut txn = manager.begin(Arc::clone(&store));
        txn.put(key.clone(), entity(1)).unwrap();
        let version = manager.commit(&mut txn).unwrap();

        assert_eq!(txn.state(), &TransactionState::CommitOk);
        assert_eq!(store.version_of(&key).unwrap(), version);
        assert_eq!(manager.stats().committed, 1);
    }

    #[test]
    fn test_first_committer_wins() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let manager = TransactionManager::new();
        let key = Key::root(EntityKind::Module, 1);
        store.put(key.clone(), entity(0)).unwrap();

        let mut t1 = manager.begin(Arc::clone(&store));
        let mut t2 = manager.begin(Arc::clone(&store));
        t1.get(&key).unwrap();
        t2.get(&key).unwrap();
        t1.put(key.clone(), entity(1)).unwrap();
        t2.put(key.clone(), entity(2)).unwrap();

        manager.commit(&mut t1).unwrap();
        let err = manager.commit(&mut t2).unwrap_err();
        assert!(matches!(err, CommitError::ValidationFailed(_)));
        assert!(matches!(t2.state(), TransactionState::CommitFailed { .. }));
        assert_eq!(store.get(&key).unwrap().unwrap().value, entity(1));
        assert_eq!(manager.stats().conflicts, 1);

        t2.rollback().unwrap();
        assert_eq!(t2.state(), &TransactionState::RollbackOk);
    }

    #[test]
    fn test_blind_writes_do_not_conflict() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let manager = TransactionManager::new();
        let key = Key::root(EntityKind::Module, 1);

        let mut t1 = manager.begin(Arc::clone(&store));
        let mut t2 = manager.begin(Arc::clone(&store));
        t1.put(key.clone(), entity(1)).unwrap();
        t2.put(key.clone(), entity(2)).unwrap();
        manager.commit(&mut t1).unwrap();
        manager.commit(&mut t2).unwrap();
        assert_eq!(store.get(&key).unwrap().unwrap().value, entity(2));
    }

    #[test]
    fn test_commit_twice_is_invalid() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let manager = TransactionManager::new();
        let mut txn = manager.begin(store);
        manager.commit(&mut txn).unwrap();
        assert!(matches!(
            manager.commit(&mut txn),
            Err(CommitError::InvalidState(_))
        ));
    }

    #[test]
    fn test_apply_failure_leaves_nothing_behind() {
        let faulty = Arc::new(FaultInjectingStore::new(MemoryStore::new()));
        faulty.fail_next_commits(1);
        let store: Arc<dyn Storage> = faulty.clone();
        let manager = TransactionManager::new();
        let key = Key::root(EntityKind::Module, 1);

        let mut txn = manager.begin(Arc::clone(&store));
        txn.put(key.clone(), entity(1)).unwrap();
        txn.put(key.child(EntityKind::ModuleVersion, 1), entity(1))
            .unwrap();
        assert!(matches!(
            manager.commit(&mut txn),
            Err(CommitError::ApplyFailed(_))
        ));
        assert!(matches!(txn.state(), TransactionState::CommitFailed { .. }));
        assert!(store.get(&key).unwrap().is_none());
        assert_eq!(manager.stats().apply_failures, 1);
    }

    #[test]
    fn test_rollback_after_commit_fails() {
        let store: Arc<dyn Storage> = Arc::new(MemoryStore::new());
        let manager = TransactionManager::new();
        let mut txn = manager.begin(store);
        txn.put(Key::root(EntityKind::Module, 1), entity(1)).unwrap();
        manager.commit(&mut txn).unwrap();
        assert!(txn.rollback().is_err());
        assert!(matches!(
            txn.state(),
            TransactionState::RollbackFailed { .. }
        ));
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use cnxrepo_core::{Entity, EntityKind, Key, RepoError, Result, Storage, Versioned, WriteOp};

/// Storage wrapper that injects transient commit failures
#[derive(Debug)]
pub struct FaultInjectingStore<S> {
    inner: S,
    pending_failures: AtomicU64,
    injected: AtomicU64,
}

impl<S: Storage> FaultInjectingStore<S> {
    /// Wrap a store with no faults scheduled
    pub fn new(inner: S) -> Self {
        FaultInjectingStore {
            inner,
            pending_failures: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` batch commits
    pub fn fail_next_commits(&self, n: u64) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Number of faults injected so far
    pub fn injected_faults(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    /// The wrapped store
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_fault(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl<S: Storage> Storage for FaultInjectingStore<S> {
    fn get(&self, key: &Key) -> Result<Option<Versioned<Entity>>> {
        self.inner.get(key)
    }

    fn version_of(&self, key: &Key) -> Result<u64> {
        self.inner.version_of(key)
    }

    fn children(&self, parent: &Key, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>> {
        self.inner.children(parent, kind)
    }

    fn scan_kind(&self, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>> {
        self.inner.scan_kind(kind)
    }

    fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<u64> {
        if self.take_fault() {
            let n = self.injected.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(target: "cnxrepo::store", injected = n, "Injected commit failure");
            return Err(RepoError::storage("injected commit failure"));
        }
        self.inner.apply_batch(writes)
    }

    fn allocate_id(&self, kind: EntityKind) -> Result<u64> {
        self.inner.allocate_id(kind)
    }

    fn reserve_ids(&self, kind: EntityKind, first_free_id: u64) -> Result<()> {
        self.inner.reserve_ids(kind, first_free_id)
    }

    fn current_version(&self) -> u64 {
        self.inner.current_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use cnxrepo_core::Property;

    #[test]
    fn test_fails_scripted_commits_then_recovers() {
        let store = FaultInjectingStore::new(MemoryStore::new());
        store.fail_next_commits(2);
        let key = Key::root(EntityKind::Module, 1);
        let entity = Entity::new().with("n", Property::Int(1));

        assert!(store.put(key.clone(), entity.clone()).is_err());
        assert!(store.put(key.clone(), entity.clone()).is_err());
        assert!(store.put(key.clone(), entity).is_ok());
        assert_eq!(store.injected_faults(), 2);
        assert!(store.inner().get(&key).unwrap().is_some());
    }

    #[test]
    fn test_injected_error_is_retryable() {
        let store = FaultInjectingStore::new(MemoryStore::new());
        store.fail_next_commits(1);
        let err = store
            .put(Key::root(EntityKind::Module, 1), Entity::new())
            .unwrap_err();
        assert!(err.is_retryable());
    }
}

//! MemoryStore: reference storage backend with BTreeMap and commit versions
//!
//! This module implements the Storage trait using:
//! - `BTreeMap<Key, Versioned<Entity>>` ordered by hierarchical key
//! - `parking_lot::RwLock` for thread-safe access
//! - `AtomicU64` for monotonically increasing commit versions
//! - One `IdAllocator` per root kind for auto-assignment
//!
//! # Design Notes
//!
//! - **No version history**: each key stores only its latest value. Content
//!   history lives in version child entities, not in the store.
//! - **Batch atomicity**: a batch is applied under one write lock and stamped
//!   with one commit version.
//! - **Children scans**: a parent key sorts right before its descendants, so
//!   child queries are a bounded range scan.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use cnxrepo_core::{Entity, EntityKind, Key, RepoError, Result, Storage, Versioned, WriteOp};

use crate::allocator::IdAllocator;

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Ordered map from key to latest value
    data: RwLock<BTreeMap<Key, Versioned<Entity>>>,
    /// Auto-assignment state per root kind
    allocators: Mutex<FxHashMap<EntityKind, IdAllocator>>,
    /// Global commit version counter
    version: AtomicU64,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Remove every entity under `ancestor`, the ancestor included
    ///
    /// Test support only; normal operation never deletes items.
    pub fn delete_subtree(&self, ancestor: &Key) -> usize {
        let mut data = self.data.write();
        let doomed: Vec<Key> = data
            .range(ancestor.clone()..)
            .take_while(|(key, _)| key.starts_with(ancestor))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            data.remove(key);
        }
        doomed.len()
    }

    fn scan_range(
        &self,
        start: Key,
        end: Key,
        keep: impl Fn(&Key) -> bool,
    ) -> Vec<(Key, Versioned<Entity>)> {
        let data = self.data.read();
        data.range(start..=end)
            .filter(|(key, _)| keep(key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl Storage for MemoryStore {
    fn get(&self, key: &Key) -> Result<Option<Versioned<Entity>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn version_of(&self, key: &Key) -> Result<u64> {
        Ok(self.data.read().get(key).map_or(0, |v| v.version))
    }

    fn children(&self, parent: &Key, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>> {
        Ok(self.scan_range(
            parent.child(kind, 0),
            parent.child(kind, u64::MAX),
            |key| key.is_child_of(parent),
        ))
    }

    fn scan_kind(&self, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>> {
        Ok(self.scan_range(Key::root(kind, 0), Key::root(kind, u64::MAX), Key::is_root))
    }

    fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<u64> {
        let mut data = self.data.write();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let count = writes.len();
        for write in writes {
            match write {
                WriteOp::Put(key, value) => {
                    trace!(target: "cnxrepo::store", key = %key, version, "put");
                    data.insert(key, Versioned { value, version });
                }
                WriteOp::Delete(key) => {
                    trace!(target: "cnxrepo::store", key = %key, version, "delete");
                    data.remove(&key);
                }
            }
        }
        debug!(target: "cnxrepo::store", version, writes = count, "Batch applied");
        Ok(version)
    }

    fn allocate_id(&self, kind: EntityKind) -> Result<u64> {
        if kind.parent_kind().is_some() {
            return Err(RepoError::bad_request(format!(
                "{} ids are not auto-assigned",
                kind
            )));
        }
        let mut allocators = self.allocators.lock();
        let allocator = allocators.entry(kind).or_default();
        loop {
            let candidate = allocator.next_candidate()?;
            if self.data.read().contains_key(&Key::root(kind, candidate)) {
                continue;
            }
            allocator.mark_allocated(candidate);
            debug!(target: "cnxrepo::store", kind = %kind, id = candidate, "Id allocated");
            return Ok(candidate);
        }
    }

    fn reserve_ids(&self, kind: EntityKind, first_free_id: u64) -> Result<()> {
        let mut allocators = self.allocators.lock();
        let changed = allocators.entry(kind).or_default().reserve(first_free_id)?;
        if changed {
            debug!(target: "cnxrepo::store", kind = %kind, first_free_id, "Id range reserved");
        }
        Ok(())
    }

    fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

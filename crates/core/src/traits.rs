//! Core traits for storage abstraction
//!
//! This module defines the Storage trait that the transaction layer and the
//! repository are written against, so the in-memory backend can be replaced
//! without touching upper layers.

use crate::entity::Entity;
use crate::error::Result;
use crate::types::{EntityKind, Key};

/// A stored value with the commit version that last wrote it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The value
    pub value: T,
    /// Commit version of the last write, always > 0
    pub version: u64,
}

/// One write of an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace
    Put(Key, Entity),
    /// Remove if present
    Delete(Key),
}

impl WriteOp {
    /// Key touched by this write
    pub fn key(&self) -> &Key {
        match self {
            WriteOp::Put(key, _) | WriteOp::Delete(key) => key,
        }
    }
}

/// Transactional key-value store with ancestor-scoped queries
///
/// Thread safety: all methods must be safe to call concurrently from
/// multiple threads (requires Send + Sync).
pub trait Storage: Send + Sync {
    /// Latest value of a key, `None` if absent
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    fn get(&self, key: &Key) -> Result<Option<Versioned<Entity>>>;

    /// Commit version of a key, 0 if absent
    ///
    /// Used by optimistic validation to detect concurrent writes.
    fn version_of(&self, key: &Key) -> Result<u64>;

    /// All direct children of `parent` with the given kind, in key order
    fn children(&self, parent: &Key, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>>;

    /// All root entities of a kind, in key order
    fn scan_kind(&self, kind: EntityKind) -> Result<Vec<(Key, Versioned<Entity>)>>;

    /// Apply a batch atomically
    ///
    /// Readers observe either none or all of the batch. All writes in the
    /// batch share one new commit version, which is returned.
    fn apply_batch(&self, writes: Vec<WriteOp>) -> Result<u64>;

    /// Auto-assign the next free id of a root kind
    ///
    /// Never returns an id inside a reserved range or an id whose key
    /// already holds an entity.
    fn allocate_id(&self, kind: EntityKind) -> Result<u64>;

    /// Exclude ids `[1, first_free_id)` of `kind` from auto-assignment
    ///
    /// Idempotent; a smaller boundary than the current one is a no-op.
    ///
    /// # Errors
    ///
    /// `StateMismatch` if an id inside the range was already auto-assigned.
    fn reserve_ids(&self, kind: EntityKind, first_free_id: u64) -> Result<()>;

    /// Latest commit version
    fn current_version(&self) -> u64;

    /// Convenience single put
    fn put(&self, key: Key, entity: Entity) -> Result<u64> {
        self.apply_batch(vec![WriteOp::Put(key, entity)])
    }
}

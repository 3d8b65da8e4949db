//! Transaction context and lifecycle
//!
//! A transaction buffers its writes and records the commit version of every
//! key it reads. Nothing is visible to other readers until the manager
//! validates the read set and applies the whole batch.
//!
//! ## State machine
//!
//! ```text
//! Active ──commit──▶ CommitStarted ──▶ CommitOk
//!    │                     └──────────▶ CommitFailed ──rollback──┐
//!    └──rollback──▶ RollbackStarted ◀────────────────────────────┘
//!                         ├──▶ RollbackOk
//!                         └──▶ RollbackFailed
//! ```
//!
//! Rolling back a transaction that already committed is refused and leaves
//! it in `RollbackFailed`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use cnxrepo_core::{Entity, EntityKind, Key, RepoError, Result, Storage, WriteOp};

use crate::validation::ValidationResult;

/// Error type for commit failures
#[derive(Debug, Clone)]
pub enum CommitError {
    /// Read-set validation found conflicting writes
    ValidationFailed(ValidationResult),

    /// Transaction was not in the Active state
    InvalidState(String),

    /// Validation passed but the store rejected the batch
    ApplyFailed(RepoError),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::ValidationFailed(result) => {
                write!(f, "Commit failed: {}", result.describe())
            }
            CommitError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            CommitError::ApplyFailed(e) => write!(f, "Apply failed: {}", e),
        }
    }
}

impl std::error::Error for CommitError {}

impl From<CommitError> for RepoError {
    fn from(e: CommitError) -> Self {
        match e {
            CommitError::ValidationFailed(result) => RepoError::TransactionAborted {
                reason: result.describe(),
            },
            CommitError::InvalidState(state) => RepoError::TransactionNotActive { state },
            CommitError::ApplyFailed(e) => e,
        }
    }
}

/// Lifecycle state of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionState {
    /// Executing, can read and write
    Active,
    /// Validation and apply in progress
    CommitStarted,
    /// Writes applied
    CommitOk,
    /// Validation or apply failed; nothing was applied
    CommitFailed {
        /// Why the commit failed
        reason: String,
    },
    /// Buffered writes being discarded
    RollbackStarted,
    /// Rolled back
    RollbackOk,
    /// Rollback refused or failed
    RollbackFailed {
        /// Why the rollback failed
        reason: String,
    },
}

impl TransactionState {
    /// Short state name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            TransactionState::Active => "ACTIVE",
            TransactionState::CommitStarted => "COMMIT_STARTED",
            TransactionState::CommitOk => "COMMIT_OK",
            TransactionState::CommitFailed { .. } => "COMMIT_FAILED",
            TransactionState::RollbackStarted => "ROLLBACK_STARTED",
            TransactionState::RollbackOk => "ROLLBACK_OK",
            TransactionState::RollbackFailed { .. } => "ROLLBACK_FAILED",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::CommitOk
                | TransactionState::RollbackOk
                | TransactionState::RollbackFailed { .. }
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::CommitFailed { reason }
            | TransactionState::RollbackFailed { reason } => {
                write!(f, "{} ({})", self.name(), reason)
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Buffered optimistic transaction
pub struct TransactionContext {
    /// Unique transaction id
    pub txn_id: u64,
    store: Arc<dyn Storage>,
    /// Key → commit version observed when read (0 = absent)
    read_set: FxHashMap<Key, u64>,
    /// Key → new value, `None` for a delete
    write_set: BTreeMap<Key, Option<Entity>>,
    state: TransactionState,
    start_time: Instant,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn_id", &self.txn_id)
            .field("state", &self.state)
            .field("reads", &self.read_set.len())
            .field("writes", &self.write_set.len())
            .finish()
    }
}

impl TransactionContext {
    /// Start a transaction against `store`
    pub fn new(txn_id: u64, store: Arc<dyn Storage>) -> Self {
        debug!(target: "cnxrepo::txn", txn_id, "Transaction started");
        TransactionContext {
            txn_id,
            store,
            read_set: FxHashMap::default(),
            write_set: BTreeMap::new(),
            state: TransactionState::Active,
            start_time: Instant::now(),
        }
    }

    /// Current state
    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    /// Whether the transaction accepts reads and writes
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// Fail unless Active
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(RepoError::TransactionNotActive {
                state: self.state.to_string(),
            })
        }
    }

    /// Read a key, seeing this transaction's own buffered writes
    pub fn get(&mut self, key: &Key) -> Result<Option<Entity>> {
        self.ensure_active()?;
        if let Some(buffered) = self.write_set.get(key) {
            return Ok(buffered.clone());
        }
        let stored = self.store.get(key)?;
        let version = stored.as_ref().map_or(0, |v| v.version);
        self.read_set.entry(key.clone()).or_insert(version);
        Ok(stored.map(|v| v.value))
    }

    /// Direct children of `parent` with `kind`, merged with buffered writes
    ///
    /// Every returned stored child joins the read set. Children created
    /// concurrently are not detected here; writers that must serialize
    /// also read and write the parent.
    pub fn children(&mut self, parent: &Key, kind: EntityKind) -> Result<Vec<(Key, Entity)>> {
        self.ensure_active()?;
        let mut merged: BTreeMap<Key, Entity> = BTreeMap::new();
        for (key, stored) in self.store.children(parent, kind)? {
            self.read_set.entry(key.clone()).or_insert(stored.version);
            merged.insert(key, stored.value);
        }
        for (key, buffered) in &self.write_set {
            if key.kind() != kind || !key.is_child_of(parent) {
                continue;
            }
            match buffered {
                Some(entity) => {
                    merged.insert(key.clone(), entity.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Buffer a put
    pub fn put(&mut self, key: Key, entity: Entity) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, Some(entity));
        Ok(())
    }

    /// Buffer a delete
    pub fn delete(&mut self, key: Key) -> Result<()> {
        self.ensure_active()?;
        self.write_set.insert(key, None);
        Ok(())
    }

    /// Number of keys read
    pub fn read_count(&self) -> usize {
        self.read_set.len()
    }

    /// Number of buffered writes
    pub fn write_count(&self) -> usize {
        self.write_set.len()
    }

    /// Whether nothing was written
    pub fn is_read_only(&self) -> bool {
        self.write_set.is_empty()
    }

    /// Time since the transaction started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Discard buffered writes
    ///
    /// Allowed from `Active` and `CommitFailed`.
    ///
    /// # Errors
    /// `TransactionNotActive` from any other state. A committed transaction
    /// is moved to `RollbackFailed`.
    pub fn rollback(&mut self) -> Result<()> {
        match &self.state {
            TransactionState::Active | TransactionState::CommitFailed { .. } => {
                self.state = TransactionState::RollbackStarted;
                let discarded = self.write_set.len();
                self.write_set.clear();
                self.read_set.clear();
                self.state = TransactionState::RollbackOk;
                debug!(target: "cnxrepo::txn", txn_id = self.txn_id, discarded, "Transaction rolled back");
                Ok(())
            }
            TransactionState::CommitOk => {
                let reason = "transaction already committed".to_string();
                self.state = TransactionState::RollbackFailed {
                    reason: reason.clone(),
                };
                Err(RepoError::TransactionNotActive { state: reason })
            }
            other => Err(RepoError::TransactionNotActive {
                state: other.to_string(),
            }),
        }
    }

    /// Roll back if still possible; never fails
    ///
    /// Intended for cleanup paths. Does nothing once the transaction has
    /// reached a terminal state.
    pub fn safe_rollback(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(e) = self.rollback() {
            warn!(target: "cnxrepo::txn", txn_id = self.txn_id, error = %e, "Rollback failed");
        }
    }

    // ========================================================================
    // Commit support (driven by TransactionManager)
    // ========================================================================

    pub(crate) fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    pub(crate) fn read_set(&self) -> &FxHashMap<Key, u64> {
        &self.read_set
    }

    pub(crate) fn begin_commit(&mut self) -> std::result::Result<(), CommitError> {
        if !self.is_active() {
            return Err(CommitError::InvalidState(format!(
                "cannot commit transaction {} from {} state",
                self.txn_id, self.state
            )));
        }
        self.state = TransactionState::CommitStarted;
        Ok(())
    }

    pub(crate) fn take_writes(&mut self) -> Vec<WriteOp> {
        std::mem::take(&mut self.write_set)
            .into_iter()
            .map(|(key, value)| match value {
                Some(entity) => WriteOp::Put(key, entity),
                None => WriteOp::Delete(key),
            })
            .collect()
    }

    pub(crate) fn mark_commit_ok(&mut self) {
        self.state = TransactionState::CommitOk;
    }

    pub(crate) fn mark_commit_failed(&mut self, reason: String) {
        self.state = TransactionState::CommitFailed { reason };
    }
}

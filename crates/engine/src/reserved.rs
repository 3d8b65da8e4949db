//! Reserved legacy id ranges
//!
//! Legacy items keep their numeric ids when migrated. To make that safe,
//! ids `[1, first_free_id)` of each kind are carved out of the allocator
//! before migration starts, and a marker record is persisted per kind.
//!
//! Reservation is idempotent: re-reserving the same or a smaller boundary is
//! a no-op, a larger one extends the range. `is_protected` answers from the
//! in-memory boundaries and never touches storage. Those boundaries follow
//! what is actually reserved: the persisted markers at open, then each
//! successful reservation. A kind with no reservation protects nothing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use cnxrepo_concurrency::TransactionManager;
use cnxrepo_core::{
    EntityKeySpace, ItemId, ItemKind, Key, RepoError, ReservedRangeRecord, Result, Storage,
};

use crate::config::ReservedIdsConfig;

/// What a reservation call did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// First reservation for the kind
    Reserved,
    /// An existing reservation was widened
    Extended {
        /// Boundary before the call
        previous: u64,
    },
    /// The range was already covered; nothing changed
    AlreadyReserved,
}

/// Reserves and answers questions about protected id ranges
pub struct ReservedRangeManager {
    store: Arc<dyn Storage>,
    txn_manager: Arc<TransactionManager>,
    config: ReservedIdsConfig,
    boundaries: RwLock<HashMap<ItemKind, u64>>,
}

impl ReservedRangeManager {
    /// Create a manager; boundaries are loaded from the persisted markers
    ///
    /// # Errors
    ///
    /// Storage errors, or a marker that does not decode.
    pub fn new(
        store: Arc<dyn Storage>,
        txn_manager: Arc<TransactionManager>,
        config: ReservedIdsConfig,
    ) -> Result<Self> {
        let mut boundaries = HashMap::new();
        for kind in ItemKind::ALL {
            let marker_key = EntityKeySpace::reserved_range_key(kind);
            if let Some(stored) = store.get(&marker_key)? {
                let record = ReservedRangeRecord::decode(&marker_key, &stored.value)?;
                boundaries.insert(kind, record.first_free_id);
            }
        }
        Ok(ReservedRangeManager {
            store,
            txn_manager,
            config,
            boundaries: RwLock::new(boundaries),
        })
    }

    /// Reserve `[1, first_free_id)` for `kind`
    ///
    /// # Errors
    ///
    /// `BadRequest` if `first_free_id <= 1`. `StateMismatch` if the
    /// allocator already handed out an id inside the range.
    pub fn reserve_range(&self, kind: ItemKind, first_free_id: u64) -> Result<ReserveOutcome> {
        if first_free_id <= 1 {
            return Err(RepoError::bad_request(format!(
                "{} first free id must be greater than 1, got {}",
                kind, first_free_id
            )));
        }

        let marker_key = EntityKeySpace::reserved_range_key(kind);
        let mut txn = self.txn_manager.begin(Arc::clone(&self.store));
        let existing = match txn.get(&marker_key) {
            Ok(entity) => entity,
            Err(e) => {
                txn.safe_rollback();
                return Err(e);
            }
        };
        let previous = match existing {
            Some(entity) => match ReservedRangeRecord::decode(&marker_key, &entity) {
                Ok(record) => Some(record.first_free_id),
                Err(e) => {
                    txn.safe_rollback();
                    return Err(e);
                }
            },
            None => None,
        };

        if let Some(previous) = previous {
            if previous >= first_free_id {
                txn.safe_rollback();
                // The allocator may be fresh even when the marker survived
                self.store.reserve_ids(kind.entity_kind(), previous)?;
                self.raise_boundary(kind, previous);
                return Ok(ReserveOutcome::AlreadyReserved);
            }
        }

        if let Err(e) = self.store.reserve_ids(kind.entity_kind(), first_free_id) {
            txn.safe_rollback();
            return Err(e);
        }
        let record = ReservedRangeRecord { first_free_id };
        let committed = txn
            .put(marker_key, record.encode())
            .and_then(|_| self.txn_manager.commit(&mut txn).map_err(RepoError::from));
        if let Err(e) = committed {
            txn.safe_rollback();
            return Err(e);
        }

        self.raise_boundary(kind, first_free_id);
        info!(target: "cnxrepo::reserved", kind = %kind, first_free_id, "Reserved legacy id range");
        Ok(match previous {
            Some(previous) => ReserveOutcome::Extended { previous },
            None => ReserveOutcome::Reserved,
        })
    }

    /// Reserve every kind at its configured boundary
    pub fn reserve_all(&self) -> Result<()> {
        for kind in ItemKind::ALL {
            self.reserve_range(kind, self.config.first_free_id(kind))?;
        }
        Ok(())
    }

    /// Whether an item key lies inside its kind's reserved range
    ///
    /// Non-item keys are never protected.
    pub fn is_protected(&self, key: &Key) -> bool {
        match EntityKeySpace::item_id(key) {
            Ok(id) => self.is_id_protected(id),
            Err(_) => false,
        }
    }

    /// Whether an item id lies inside its kind's reserved range
    pub fn is_id_protected(&self, id: ItemId) -> bool {
        id.number() >= 1 && id.number() < self.first_free_id(id.kind())
    }

    /// Fail with `OutOfRange` unless `id` is protected
    pub fn check_protected(&self, id: ItemId) -> Result<()> {
        if self.is_id_protected(id) {
            Ok(())
        } else {
            Err(RepoError::OutOfRange {
                id: id.to_string(),
                first_free_id: self.first_free_id(id.kind()),
            })
        }
    }

    /// Current boundary for `kind` (1 when nothing is reserved)
    pub fn first_free_id(&self, kind: ItemKind) -> u64 {
        self.boundaries.read().get(&kind).copied().unwrap_or(1)
    }

    fn raise_boundary(&self, kind: ItemKind, first_free_id: u64) {
        let mut boundaries = self.boundaries.write();
        let entry = boundaries.entry(kind).or_insert(first_free_id);
        *entry = (*entry).max(first_free_id);
    }
}

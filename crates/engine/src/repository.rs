//! Versioned entity store
//!
//! `Repository` owns every item and version lifecycle. Each public write is
//! a single transaction, so the version entity and the item's version count
//! are committed together or not at all.
//!
//! Two creation and append paths exist:
//!
//! | Operation | Strict path | Migration path |
//! |-----------|-------------|----------------|
//! | create | auto-assigned id, or explicit id that must be free | legacy id, idempotent while the item is still empty |
//! | append | version must be `count + 1` | `count` (retry) or anything above it (gap) |

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use cnxrepo_concurrency::{TransactionContext, TransactionManager, TransactionStats};
use cnxrepo_core::{
    BlobInfo, EntityKeySpace, ItemEntity, ItemId, ItemKind, Key, Limits, RepoError,
    ResourceState, Result, Storage, VersionEntity, VersionPayload, VersionSelector,
};
use cnxrepo_storage::MemoryStore;

use crate::config::RepositoryConfig;
use crate::reserved::ReservedRangeManager;

/// Reference to a stored item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemHandle {
    id: ItemId,
    key: Key,
}

impl ItemHandle {
    fn new(id: ItemId) -> Self {
        ItemHandle {
            id,
            key: EntityKeySpace::item_key(id),
        }
    }

    /// Item id
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Storage key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Item kind
    pub fn kind(&self) -> ItemKind {
        self.id.kind()
    }
}

/// Reference to a stored version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionHandle {
    /// Owning item
    pub item: ItemId,
    /// 1-based version number
    pub version_number: u32,
    /// Commit version of the write
    pub commit_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AppendMode {
    Strict,
    Migration,
}

/// The versioned entity store
pub struct Repository {
    store: Arc<dyn Storage>,
    txn_manager: Arc<TransactionManager>,
    reserved: ReservedRangeManager,
    limits: Limits,
}

impl Repository {
    /// Open an in-memory repository
    pub fn new(config: RepositoryConfig) -> Result<Self> {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    /// Open a repository over an existing store
    ///
    /// The configured legacy ranges are reserved before any id can be
    /// auto-assigned.
    pub fn with_store(store: Arc<dyn Storage>, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        let txn_manager = Arc::new(TransactionManager::new());
        let reserved = ReservedRangeManager::new(
            Arc::clone(&store),
            Arc::clone(&txn_manager),
            config.reserved.clone(),
        )?;
        reserved.reserve_all()?;
        Ok(Repository {
            store,
            txn_manager,
            reserved,
            limits: config.limits,
        })
    }

    /// Reserved range manager
    pub fn reserved_ranges(&self) -> &ReservedRangeManager {
        &self.reserved
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn Storage> {
        &self.store
    }

    /// Commit counters
    pub fn transaction_stats(&self) -> TransactionStats {
        self.txn_manager.stats()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin an explicit transaction
    pub fn begin_transaction(&self) -> TransactionContext {
        self.txn_manager.begin(Arc::clone(&self.store))
    }

    /// Commit an explicit transaction, returning the commit version
    pub fn commit(&self, txn: &mut TransactionContext) -> Result<u64> {
        self.txn_manager.commit(txn).map_err(RepoError::from)
    }

    /// Run `f` in a transaction
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err` or
    /// when the commit fails.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut TransactionContext) -> Result<T>,
    {
        let mut txn = self.begin_transaction();
        match f(&mut txn) {
            Ok(value) => match self.commit(&mut txn) {
                Ok(_) => Ok(value),
                Err(e) => {
                    txn.safe_rollback();
                    Err(e)
                }
            },
            Err(e) => {
                txn.safe_rollback();
                Err(e)
            }
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Create an item
    ///
    /// With `explicit_id`, the key is pinned to that number, which must lie
    /// inside the reserved range and must not exist yet. Otherwise the store
    /// assigns the next free id above the reserved range.
    pub fn create_item(&self, kind: ItemKind, explicit_id: Option<u64>) -> Result<ItemHandle> {
        let id = match explicit_id {
            Some(number) => {
                let id = ItemId::new(kind, number);
                self.check_legacy_id(id)?;
                id
            }
            None => ItemId::new(kind, self.store.allocate_id(kind.entity_kind())?),
        };
        let handle = ItemHandle::new(id);
        self.transaction(|txn| {
            if txn.get(handle.key())?.is_some() {
                return Err(RepoError::already_exists(id.to_string()));
            }
            let item = ItemEntity::new(kind, handle.key().clone(), Utc::now());
            txn.put(handle.key().clone(), item.encode())
        })?;
        info!(target: "cnxrepo::store", item = %id, "Item created");
        Ok(handle)
    }

    /// Create an item with its legacy id, tolerating a repeated call
    ///
    /// Succeeds without writing if the item already exists with no versions
    /// (or, for a resource, still awaiting upload): a retry after a lost
    /// reply must not fail.
    ///
    /// # Errors
    ///
    /// `OutOfRange` outside the reserved range, `AlreadyExists` if the
    /// existing item has versions or a completed upload.
    pub fn create_item_for_migration(&self, id: ItemId) -> Result<ItemHandle> {
        self.check_legacy_id(id)?;
        let handle = ItemHandle::new(id);
        let created = self.transaction(|txn| {
            if let Some(entity) = txn.get(handle.key())? {
                let existing = ItemEntity::decode(handle.key().clone(), &entity)?;
                let reusable = match &existing {
                    ItemEntity::Resource(r) => r.state == ResourceState::UploadPending,
                    other => other.version_count() == 0,
                };
                if !reusable {
                    return Err(RepoError::already_exists(id.to_string()));
                }
                return Ok(false);
            }
            let item = ItemEntity::new(id.kind(), handle.key().clone(), Utc::now());
            txn.put(handle.key().clone(), item.encode())?;
            Ok(true)
        })?;
        if created {
            info!(target: "cnxrepo::store", item = %id, "Legacy item created");
        } else {
            debug!(target: "cnxrepo::store", item = %id, "Legacy item already present");
        }
        Ok(handle)
    }

    fn check_legacy_id(&self, id: ItemId) -> Result<()> {
        if id.number() == 0 {
            return Err(RepoError::bad_request(format!("invalid item id: {}", id)));
        }
        self.reserved.check_protected(id)
    }

    /// Handle of an existing item
    pub fn item_handle(&self, id: ItemId) -> Result<ItemHandle> {
        let handle = ItemHandle::new(id);
        if self.store.get(handle.key())?.is_none() {
            return Err(RepoError::not_found(id.to_string()));
        }
        Ok(handle)
    }

    /// Item record; a completed resource carries its blob reference
    pub fn get_item(&self, id: ItemId) -> Result<ItemEntity> {
        let key = EntityKeySpace::item_key(id);
        let stored = self
            .store
            .get(&key)?
            .ok_or_else(|| RepoError::not_found(id.to_string()))?;
        let mut item = ItemEntity::decode(key.clone(), &stored.value)?;
        if let ItemEntity::Resource(resource) = &mut item {
            let blob_key = EntityKeySpace::blob_ref_key(&key)?;
            if let Some(blob) = self.store.get(&blob_key)? {
                resource.blob = Some(BlobInfo::decode(&blob_key, &blob.value)?);
            }
        }
        Ok(item)
    }

    /// Ids of all items of a kind, in id order
    pub fn list_items(&self, kind: ItemKind) -> Result<Vec<ItemId>> {
        Ok(self
            .store
            .scan_kind(kind.entity_kind())?
            .into_iter()
            .map(|(key, _)| ItemId::new(kind, key.id()))
            .collect())
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Append the next version
    ///
    /// # Errors
    ///
    /// `VersionConflict` unless `version_number == version_count + 1`.
    pub fn append_version(
        &self,
        item: &ItemHandle,
        version_number: u32,
        payload: VersionPayload,
    ) -> Result<VersionHandle> {
        self.write_version(item, version_number, payload, AppendMode::Strict)
    }

    /// Append a legacy version, allowing gaps and a repeated latest version
    ///
    /// `version_number == version_count` overwrites the latest version (a
    /// retry after a lost reply); a number above the count leaves the
    /// skipped numbers absent and raises the count to `version_number`.
    ///
    /// # Errors
    ///
    /// `BadRequest` for version 0, `VersionConflict` below the count.
    pub fn append_version_for_migration(
        &self,
        item: &ItemHandle,
        version_number: u32,
        payload: VersionPayload,
    ) -> Result<VersionHandle> {
        self.write_version(item, version_number, payload, AppendMode::Migration)
    }

    fn write_version(
        &self,
        item: &ItemHandle,
        version_number: u32,
        payload: VersionPayload,
        mode: AppendMode,
    ) -> Result<VersionHandle> {
        if version_number == 0 {
            return Err(RepoError::bad_request("version numbers start at 1"));
        }
        if payload.item_kind() != item.kind() {
            return Err(RepoError::bad_request(format!(
                "{} payload for {} {}",
                payload.item_kind(),
                item.kind(),
                item.id()
            )));
        }
        self.limits.check_payload(&payload)?;
        let version_key = EntityKeySpace::version_key(item.key(), version_number)?;

        let mut txn = self.begin_transaction();
        let staged = Self::stage_version(&mut txn, item, &version_key, version_number, payload, mode);
        let commit_version = match staged.and_then(|_| self.commit(&mut txn)) {
            Ok(v) => v,
            Err(e) => {
                txn.safe_rollback();
                return Err(e);
            }
        };

        info!(target: "cnxrepo::store", item = %item.id(), version = version_number, "Version appended");
        Ok(VersionHandle {
            item: item.id(),
            version_number,
            commit_version,
        })
    }

    fn stage_version(
        txn: &mut TransactionContext,
        item: &ItemHandle,
        version_key: &Key,
        version_number: u32,
        payload: VersionPayload,
        mode: AppendMode,
    ) -> Result<()> {
        let stored = txn
            .get(item.key())?
            .ok_or_else(|| RepoError::not_found(item.id().to_string()))?;
        let mut entity = ItemEntity::decode(item.key().clone(), &stored)?;
        let versioned = entity
            .versioned_mut()
            .ok_or_else(|| RepoError::bad_request(format!("{} has no versions", item.id())))?;
        let count = versioned.version_count;

        let accepted = match mode {
            AppendMode::Strict => count.checked_add(1) == Some(version_number),
            AppendMode::Migration => version_number >= count,
        };
        if !accepted {
            let expected = match mode {
                AppendMode::Strict => count.saturating_add(1),
                AppendMode::Migration => count,
            };
            return Err(RepoError::VersionConflict {
                id: item.id().to_string(),
                expected,
                actual: version_number,
            });
        }

        versioned.version_count = count.max(version_number);
        let version = VersionEntity {
            key: version_key.clone(),
            created: Utc::now(),
            payload,
        };
        txn.put(version_key.clone(), version.encode())?;
        txn.put(item.key().clone(), entity.encode())
    }

    /// Read a version
    ///
    /// # Errors
    ///
    /// `NotFound` if the item has no versions, the number exceeds the
    /// version count, or the number is a hole left by a migrated gap.
    pub fn get_version(&self, item: &ItemHandle, selector: VersionSelector) -> Result<VersionEntity> {
        let stored = self
            .store
            .get(item.key())?
            .ok_or_else(|| RepoError::not_found(item.id().to_string()))?;
        let count = ItemEntity::decode(item.key().clone(), &stored.value)?.version_count();
        let number = match selector {
            VersionSelector::Latest => count,
            VersionSelector::Number(n) => n,
        };
        if count == 0 || number == 0 || number > count {
            return Err(RepoError::not_found(format!(
                "{} version {}",
                item.id(),
                selector
            )));
        }
        let key = EntityKeySpace::version_key(item.key(), number)?;
        let version = self
            .store
            .get(&key)?
            .ok_or_else(|| RepoError::not_found(format!("{} version {}", item.id(), number)))?;
        VersionEntity::decode(key, &version.value)
    }

    /// Existing version numbers of an item, ascending
    pub fn list_versions(&self, item: &ItemHandle) -> Result<Vec<u32>> {
        let kind = item
            .kind()
            .version_kind()
            .ok_or_else(|| RepoError::bad_request(format!("{} has no versions", item.id())))?;
        Ok(self
            .store
            .children(item.key(), kind)?
            .iter()
            .filter_map(|(key, _)| EntityKeySpace::version_number(key))
            .collect())
    }

    // ========================================================================
    // Resources
    // ========================================================================

    /// Record a completed upload
    ///
    /// # Errors
    ///
    /// `StateMismatch` unless the resource is `UPLOAD_PENDING`.
    pub fn transition_resource_to_uploaded(
        &self,
        resource: &ItemHandle,
        blob: BlobInfo,
    ) -> Result<()> {
        let blob_key = EntityKeySpace::blob_ref_key(resource.key())?;
        self.transaction(|txn| {
            let stored = txn
                .get(resource.key())?
                .ok_or_else(|| RepoError::not_found(resource.id().to_string()))?;
            let mut item = match ItemEntity::decode(resource.key().clone(), &stored)? {
                ItemEntity::Resource(r) => r,
                other => {
                    return Err(RepoError::bad_request(format!(
                        "{} is a {}, not a resource",
                        resource.id(),
                        other.kind()
                    )))
                }
            };
            if item.state != ResourceState::UploadPending {
                return Err(RepoError::StateMismatch {
                    id: resource.id().to_string(),
                    expected: ResourceState::UploadPending.to_string(),
                    actual: item.state.to_string(),
                });
            }
            item.state = ResourceState::UploadComplete;
            txn.put(blob_key.clone(), blob.encode())?;
            txn.put(resource.key().clone(), ItemEntity::Resource(item).encode())
        })?;
        info!(target: "cnxrepo::store", resource = %resource.id(), "Resource upload complete");
        Ok(())
    }
}

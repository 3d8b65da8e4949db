//! Mapping between logical entities and storage keys
//!
//! Items are root keys of their kind. Versions are children of the item key
//! with the version number as the child id, so a version's identity is
//! `(item key, version number)`. A resource's blob reference is the single
//! `BlobRef` child with id 1.

use crate::error::{RepoError, Result};
use crate::ids::{IdCodec, ItemId};
use crate::types::{EntityKind, ItemKind, Key};

/// Child id of the one blob reference under a resource
pub const BLOB_REF_ID: u64 = 1;

/// Key construction and interpretation for every entity kind
pub struct EntityKeySpace;

impl EntityKeySpace {
    /// Key of an item
    pub fn item_key(id: ItemId) -> Key {
        Key::root(id.kind().entity_kind(), id.number())
    }

    /// Key of version `version` of the item at `item_key`
    ///
    /// # Errors
    /// `BadRequest` if the key is not a collection or module key or the
    /// version number is 0.
    pub fn version_key(item_key: &Key, version: u32) -> Result<Key> {
        let kind = Self::item_kind(item_key)?;
        let version_kind = kind
            .version_kind()
            .ok_or_else(|| RepoError::bad_request(format!("{} items have no versions", kind)))?;
        if version == 0 {
            return Err(RepoError::bad_request("version numbers start at 1"));
        }
        Ok(item_key.child(version_kind, u64::from(version)))
    }

    /// Key of a resource's blob reference
    pub fn blob_ref_key(resource_key: &Key) -> Result<Key> {
        match Self::item_kind(resource_key)? {
            ItemKind::Resource => Ok(resource_key.child(EntityKind::BlobRef, BLOB_REF_ID)),
            other => Err(RepoError::bad_request(format!(
                "{} items have no blob reference",
                other
            ))),
        }
    }

    /// Key of the reserved range marker of `kind`
    pub fn reserved_range_key(kind: ItemKind) -> Key {
        Key::root(EntityKind::ReservedRange, u64::from(kind.entity_kind().as_byte()))
    }

    /// Item kind of a root item key
    pub fn item_kind(key: &Key) -> Result<ItemKind> {
        if !key.is_root() {
            return Err(RepoError::bad_request(format!("not an item key: {}", key)));
        }
        ItemKind::from_entity_kind(key.kind())
            .ok_or_else(|| RepoError::bad_request(format!("not an item key: {}", key)))
    }

    /// Item id of a root item key
    pub fn item_id(key: &Key) -> Result<ItemId> {
        Ok(ItemId::new(Self::item_kind(key)?, key.id()))
    }

    /// Canonical string id of an item key (`m12`)
    pub fn id_string(key: &Key) -> Result<String> {
        let id = Self::item_id(key)?;
        let number = i64::try_from(id.number())
            .map_err(|_| RepoError::bad_request(format!("id out of range: {}", key)))?;
        IdCodec::encode(id.kind().id_prefix(), number)
    }

    /// Key of the item named by `id`
    ///
    /// # Errors
    /// `BadRequest` if `id` is not a well-formed id of `kind`.
    pub fn key_for_id(kind: ItemKind, id: &str) -> Result<Key> {
        ItemId::parse(kind, id).map(Self::item_key)
    }

    /// Version number of a version key, `None` for other keys
    pub fn version_number(key: &Key) -> Option<u32> {
        match key.kind() {
            EntityKind::CollectionVersion | EntityKind::ModuleVersion => {
                u32::try_from(key.id()).ok()
            }
            _ => None,
        }
    }
}

//! Stored records and their typed views
//!
//! The store persists every record as an [`Entity`], a flat property bag.
//! Each record kind has an explicit `encode`/`decode` pair mapping its fields
//! to named properties, so decoding never depends on runtime type discovery.

use crate::error::{RepoError, Result};
use crate::types::{EntityKind, ItemKind, Key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const PROP_CREATED: &str = "created";
const PROP_VERSION_COUNT: &str = "version_count";
const PROP_STATE: &str = "state";
const PROP_VERSION_NUMBER: &str = "version_number";
const PROP_COLXML: &str = "colxml";
const PROP_CNXML: &str = "cnxml";
const PROP_RESOURCE_MAP: &str = "resource_map";
const PROP_BLOB_KEY: &str = "blob_key";
const PROP_CONTENT_TYPE: &str = "content_type";
const PROP_SIZE: &str = "size";
const PROP_CONTENT_HASH: &str = "content_hash";
const PROP_FILE_NAME: &str = "file_name";
const PROP_FIRST_FREE_ID: &str = "first_free_id";

// ============================================================================
// Property bag
// ============================================================================

/// A single stored property value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Property {
    /// Signed integer
    Int(i64),
    /// UTF-8 text
    Text(String),
    /// UTC timestamp
    Time(DateTime<Utc>),
}

/// Stored record: named properties
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    properties: BTreeMap<String, Property>,
}

impl Entity {
    /// Create an empty entity
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property, replacing any previous value
    pub fn set(&mut self, name: &str, value: Property) {
        self.properties.insert(name.to_string(), value);
    }

    /// Builder form of [`Entity::set`]
    pub fn with(mut self, name: &str, value: Property) -> Self {
        self.set(name, value);
        self
    }

    /// Raw property lookup
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Number of properties
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Whether the entity has no properties
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Approximate payload size, the sum of text lengths
    pub fn text_bytes(&self) -> usize {
        self.properties
            .values()
            .map(|p| match p {
                Property::Text(s) => s.len(),
                _ => 0,
            })
            .sum()
    }

    fn require(&self, name: &str) -> Result<&Property> {
        self.properties
            .get(name)
            .ok_or_else(|| RepoError::internal(format!("missing property {:?}", name)))
    }

    /// Integer property
    pub fn get_int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Property::Int(v) => Ok(*v),
            other => Err(type_error(name, "int", other)),
        }
    }

    /// Text property
    pub fn get_text(&self, name: &str) -> Result<&str> {
        match self.require(name)? {
            Property::Text(v) => Ok(v),
            other => Err(type_error(name, "text", other)),
        }
    }

    /// Timestamp property
    pub fn get_time(&self, name: &str) -> Result<DateTime<Utc>> {
        match self.require(name)? {
            Property::Time(v) => Ok(*v),
            other => Err(type_error(name, "time", other)),
        }
    }

    fn get_u32(&self, name: &str) -> Result<u32> {
        let v = self.get_int(name)?;
        u32::try_from(v)
            .map_err(|_| RepoError::internal(format!("property {:?} out of range: {}", name, v)))
    }

    fn get_u64(&self, name: &str) -> Result<u64> {
        let v = self.get_int(name)?;
        u64::try_from(v)
            .map_err(|_| RepoError::internal(format!("property {:?} out of range: {}", name, v)))
    }
}

fn type_error(name: &str, expected: &str, found: &Property) -> RepoError {
    let found = match found {
        Property::Int(_) => "int",
        Property::Text(_) => "text",
        Property::Time(_) => "time",
    };
    RepoError::internal(format!(
        "property {:?}: expected {}, found {}",
        name, expected, found
    ))
}

fn expect_kind(key: &Key, expected: EntityKind) -> Result<()> {
    if key.kind() != expected {
        return Err(RepoError::internal(format!(
            "expected a {} key, found {}",
            expected, key
        )));
    }
    Ok(())
}

// ============================================================================
// Items
// ============================================================================

/// Collection or module record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedItem {
    /// Item key
    pub key: Key,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Highest version number written, 0 when unpublished
    pub version_count: u32,
}

/// Upload state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Key assigned, no blob yet
    UploadPending,
    /// Blob uploaded and referenced
    UploadComplete,
}

impl ResourceState {
    /// Stored name
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::UploadPending => "UPLOAD_PENDING",
            ResourceState::UploadComplete => "UPLOAD_COMPLETE",
        }
    }

    /// Parse a stored name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOAD_PENDING" => Some(ResourceState::UploadPending),
            "UPLOAD_COMPLETE" => Some(ResourceState::UploadComplete),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource record, with its blob reference embedded once uploaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceItem {
    /// Item key
    pub key: Key,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Upload state
    pub state: ResourceState,
    /// Blob metadata, present iff the state is `UploadComplete`
    pub blob: Option<BlobInfo>,
}

/// Root content item, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemEntity {
    /// Collection item
    Collection(VersionedItem),
    /// Module item
    Module(VersionedItem),
    /// Resource item
    Resource(ResourceItem),
}

impl ItemEntity {
    /// Fresh record for a newly created item
    pub fn new(kind: ItemKind, key: Key, created: DateTime<Utc>) -> Self {
        match kind {
            ItemKind::Collection => ItemEntity::Collection(VersionedItem {
                key,
                created,
                version_count: 0,
            }),
            ItemKind::Module => ItemEntity::Module(VersionedItem {
                key,
                created,
                version_count: 0,
            }),
            ItemKind::Resource => ItemEntity::Resource(ResourceItem {
                key,
                created,
                state: ResourceState::UploadPending,
                blob: None,
            }),
        }
    }

    /// Item kind
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemEntity::Collection(_) => ItemKind::Collection,
            ItemEntity::Module(_) => ItemKind::Module,
            ItemEntity::Resource(_) => ItemKind::Resource,
        }
    }

    /// Item key
    pub fn key(&self) -> &Key {
        match self {
            ItemEntity::Collection(item) | ItemEntity::Module(item) => &item.key,
            ItemEntity::Resource(item) => &item.key,
        }
    }

    /// Creation time
    pub fn created(&self) -> DateTime<Utc> {
        match self {
            ItemEntity::Collection(item) | ItemEntity::Module(item) => item.created,
            ItemEntity::Resource(item) => item.created,
        }
    }

    /// Version count, always 0 for resources
    pub fn version_count(&self) -> u32 {
        match self {
            ItemEntity::Collection(item) | ItemEntity::Module(item) => item.version_count,
            ItemEntity::Resource(_) => 0,
        }
    }

    /// Mutable access to the versioned part, `None` for resources
    pub fn versioned_mut(&mut self) -> Option<&mut VersionedItem> {
        match self {
            ItemEntity::Collection(item) | ItemEntity::Module(item) => Some(item),
            ItemEntity::Resource(_) => None,
        }
    }

    /// Encode to a stored entity
    ///
    /// The blob reference of a resource is stored as a separate child
    /// record and is not part of this encoding.
    pub fn encode(&self) -> Entity {
        let entity = Entity::new().with(PROP_CREATED, Property::Time(self.created()));
        match self {
            ItemEntity::Collection(item) | ItemEntity::Module(item) => entity.with(
                PROP_VERSION_COUNT,
                Property::Int(i64::from(item.version_count)),
            ),
            ItemEntity::Resource(item) => {
                entity.with(PROP_STATE, Property::Text(item.state.as_str().to_string()))
            }
        }
    }

    /// Decode a stored item entity; the kind comes from the key
    pub fn decode(key: Key, entity: &Entity) -> Result<Self> {
        let kind = ItemKind::from_entity_kind(key.kind())
            .ok_or_else(|| RepoError::internal(format!("not an item key: {}", key)))?;
        let created = entity.get_time(PROP_CREATED)?;
        match kind {
            ItemKind::Collection | ItemKind::Module => {
                let item = VersionedItem {
                    key,
                    created,
                    version_count: entity.get_u32(PROP_VERSION_COUNT)?,
                };
                Ok(if kind == ItemKind::Collection {
                    ItemEntity::Collection(item)
                } else {
                    ItemEntity::Module(item)
                })
            }
            ItemKind::Resource => {
                let raw = entity.get_text(PROP_STATE)?;
                let state = ResourceState::parse(raw)
                    .ok_or_else(|| RepoError::internal(format!("unknown resource state {:?}", raw)))?;
                Ok(ItemEntity::Resource(ResourceItem {
                    key,
                    created,
                    state,
                    blob: None,
                }))
            }
        }
    }
}

// ============================================================================
// Versions
// ============================================================================

/// Immutable document payload of a version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPayload {
    /// Collection XML body
    Collection {
        /// Collection document
        colxml: String,
    },
    /// Module CNXML body plus its resource-mapping document
    Module {
        /// Module document
        cnxml: String,
        /// Resource mapping XML
        resource_map: String,
    },
}

impl VersionPayload {
    /// Kind of item this payload belongs to
    pub fn item_kind(&self) -> ItemKind {
        match self {
            VersionPayload::Collection { .. } => ItemKind::Collection,
            VersionPayload::Module { .. } => ItemKind::Module,
        }
    }
}

/// Version record, keyed as a child of its item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntity {
    /// Version key (`item key / version kind / number`)
    pub key: Key,
    /// Creation time
    pub created: DateTime<Utc>,
    /// Document payload
    pub payload: VersionPayload,
}

impl VersionEntity {
    /// 1-based version number, the last key component
    pub fn version_number(&self) -> u32 {
        u32::try_from(self.key.id()).unwrap_or(u32::MAX)
    }

    /// Key of the owning item
    pub fn item_key(&self) -> Option<Key> {
        self.key.parent()
    }

    /// Encode to a stored entity
    pub fn encode(&self) -> Entity {
        let entity = Entity::new()
            .with(PROP_CREATED, Property::Time(self.created))
            .with(
                PROP_VERSION_NUMBER,
                Property::Int(i64::from(self.version_number())),
            );
        match &self.payload {
            VersionPayload::Collection { colxml } => {
                entity.with(PROP_COLXML, Property::Text(colxml.clone()))
            }
            VersionPayload::Module {
                cnxml,
                resource_map,
            } => entity
                .with(PROP_CNXML, Property::Text(cnxml.clone()))
                .with(PROP_RESOURCE_MAP, Property::Text(resource_map.clone())),
        }
    }

    /// Decode a stored version entity
    pub fn decode(key: Key, entity: &Entity) -> Result<Self> {
        let payload = match key.kind() {
            EntityKind::CollectionVersion => VersionPayload::Collection {
                colxml: entity.get_text(PROP_COLXML)?.to_string(),
            },
            EntityKind::ModuleVersion => VersionPayload::Module {
                cnxml: entity.get_text(PROP_CNXML)?.to_string(),
                resource_map: entity.get_text(PROP_RESOURCE_MAP)?.to_string(),
            },
            _ => return Err(RepoError::internal(format!("not a version key: {}", key))),
        };
        let stored_number = entity.get_u32(PROP_VERSION_NUMBER)?;
        if u64::from(stored_number) != key.id() {
            return Err(RepoError::internal(format!(
                "version number {} does not match key {}",
                stored_number, key
            )));
        }
        Ok(VersionEntity {
            created: entity.get_time(PROP_CREATED)?,
            key,
            payload,
        })
    }
}

// ============================================================================
// Blobs and reserved ranges
// ============================================================================

/// Durable metadata of an uploaded blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    /// Blob store reference
    pub blob_key: String,
    /// MIME type
    pub content_type: String,
    /// Size in bytes
    pub size: u64,
    /// Hex SHA-256 of the content
    pub content_hash: String,
    /// Original file name
    pub file_name: String,
    /// Upload completion time
    pub created: DateTime<Utc>,
}

impl BlobInfo {
    /// Encode to a stored `BlobRef` entity
    pub fn encode(&self) -> Entity {
        Entity::new()
            .with(PROP_BLOB_KEY, Property::Text(self.blob_key.clone()))
            .with(PROP_CONTENT_TYPE, Property::Text(self.content_type.clone()))
            .with(PROP_SIZE, Property::Int(self.size as i64))
            .with(PROP_CONTENT_HASH, Property::Text(self.content_hash.clone()))
            .with(PROP_FILE_NAME, Property::Text(self.file_name.clone()))
            .with(PROP_CREATED, Property::Time(self.created))
    }

    /// Decode a stored `BlobRef` entity
    pub fn decode(key: &Key, entity: &Entity) -> Result<Self> {
        expect_kind(key, EntityKind::BlobRef)?;
        Ok(BlobInfo {
            blob_key: entity.get_text(PROP_BLOB_KEY)?.to_string(),
            content_type: entity.get_text(PROP_CONTENT_TYPE)?.to_string(),
            size: entity.get_u64(PROP_SIZE)?,
            content_hash: entity.get_text(PROP_CONTENT_HASH)?.to_string(),
            file_name: entity.get_text(PROP_FILE_NAME)?.to_string(),
            created: entity.get_time(PROP_CREATED)?,
        })
    }
}

/// Persisted marker of a reserved id range `[1, first_free_id)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservedRangeRecord {
    /// First id left to auto-assignment
    pub first_free_id: u64,
}

impl ReservedRangeRecord {
    /// Encode to a stored entity
    pub fn encode(&self) -> Entity {
        Entity::new().with(PROP_FIRST_FREE_ID, Property::Int(self.first_free_id as i64))
    }

    /// Decode a stored marker
    pub fn decode(key: &Key, entity: &Entity) -> Result<Self> {
        expect_kind(key, EntityKind::ReservedRange)?;
        Ok(ReservedRangeRecord {
            first_free_id: entity.get_u64(PROP_FIRST_FREE_ID)?,
        })
    }
}

//! Entity kinds and hierarchical keys
//!
//! This module defines:
//! - ItemKind: the three kinds of root content items
//! - EntityKind: every kind of stored record, items and their children
//! - Key: an ancestor path of `(kind, numeric id)` elements
//! - VersionSelector: a specific version number or the latest one

use crate::error::{RepoError, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Kind of a root content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Ordered grouping of modules
    Collection,
    /// Single document
    Module,
    /// Binary attachment referenced from modules
    Resource,
}

impl ItemKind {
    /// All item kinds, in migration stage order
    pub const ALL: [ItemKind; 3] = [ItemKind::Resource, ItemKind::Module, ItemKind::Collection];

    /// Identifier prefix (`col`, `m`, `r`)
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ItemKind::Collection => "col",
            ItemKind::Module => "m",
            ItemKind::Resource => "r",
        }
    }

    /// Storage kind of the item record itself
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ItemKind::Collection => EntityKind::Collection,
            ItemKind::Module => EntityKind::Module,
            ItemKind::Resource => EntityKind::Resource,
        }
    }

    /// Storage kind of version children, `None` for unversioned resources
    pub fn version_kind(&self) -> Option<EntityKind> {
        match self {
            ItemKind::Collection => Some(EntityKind::CollectionVersion),
            ItemKind::Module => Some(EntityKind::ModuleVersion),
            ItemKind::Resource => None,
        }
    }

    /// Upper-case stem used in counter names (`MODULE`)
    pub fn counter_stem(&self) -> &'static str {
        match self {
            ItemKind::Collection => "COLLECTION",
            ItemKind::Module => "MODULE",
            ItemKind::Resource => "RESOURCE",
        }
    }

    /// Name of the legacy export directory holding this kind
    pub fn export_dir(&self) -> &'static str {
        match self {
            ItemKind::Collection => "collections",
            ItemKind::Module => "modules",
            ItemKind::Resource => "resources",
        }
    }

    /// Item kind of a root entity kind
    pub fn from_entity_kind(kind: EntityKind) -> Option<Self> {
        match kind {
            EntityKind::Collection => Some(ItemKind::Collection),
            EntityKind::Module => Some(ItemKind::Module),
            EntityKind::Resource => Some(ItemKind::Resource),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemKind::Collection => write!(f, "collection"),
            ItemKind::Module => write!(f, "module"),
            ItemKind::Resource => write!(f, "resource"),
        }
    }
}

/// Storage kind of a record
///
/// Root kinds occupy `0x01..0x0F`, child kinds `0x10..0x1F` and
/// bookkeeping records `0x20..`. The byte value orders keys of different
/// kinds inside the sorted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntityKind {
    /// Collection item
    Collection = 0x01,
    /// Module item
    Module = 0x02,
    /// Resource item
    Resource = 0x03,
    /// Version of a collection, child of a collection key
    CollectionVersion = 0x10,
    /// Version of a module, child of a module key
    ModuleVersion = 0x11,
    /// Uploaded blob metadata, child of a resource key
    BlobRef = 0x12,
    /// Reserved id range marker, one per item kind
    ReservedRange = 0x20,
}

impl EntityKind {
    /// Convert to byte representation
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Parse from byte representation
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(EntityKind::Collection),
            0x02 => Some(EntityKind::Module),
            0x03 => Some(EntityKind::Resource),
            0x10 => Some(EntityKind::CollectionVersion),
            0x11 => Some(EntityKind::ModuleVersion),
            0x12 => Some(EntityKind::BlobRef),
            0x20 => Some(EntityKind::ReservedRange),
            _ => None,
        }
    }

    /// Storage key-kind name
    pub fn key_kind(&self) -> &'static str {
        match self {
            EntityKind::Collection => "Collection",
            EntityKind::Module => "Module",
            EntityKind::Resource => "Resource",
            EntityKind::CollectionVersion => "CollectionVer",
            EntityKind::ModuleVersion => "ModuleVer",
            EntityKind::BlobRef => "BlobRef",
            EntityKind::ReservedRange => "ReservedRange",
        }
    }

    /// Kind of the required parent, `None` for root kinds
    pub fn parent_kind(&self) -> Option<EntityKind> {
        match self {
            EntityKind::CollectionVersion => Some(EntityKind::Collection),
            EntityKind::ModuleVersion => Some(EntityKind::Module),
            EntityKind::BlobRef => Some(EntityKind::Resource),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_kind())
    }
}

/// One `(kind, id)` step of a key path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    /// Kind of the entity at this level
    pub kind: EntityKind,
    /// Numeric id, unique among siblings of the same kind
    pub id: u64,
}

/// Hierarchical storage key
///
/// A key is the path from a root entity down to the addressed entity.
/// Ordering is element-wise, so a parent sorts immediately before all of its
/// descendants and a range scan starting at the parent visits its children
/// contiguously.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    path: SmallVec<[PathElement; 2]>,
}

impl Key {
    /// Create a root key
    pub fn root(kind: EntityKind, id: u64) -> Self {
        let mut path = SmallVec::new();
        path.push(PathElement { kind, id });
        Key { path }
    }

    /// Create a child key under this key
    pub fn child(&self, kind: EntityKind, id: u64) -> Self {
        let mut path = self.path.clone();
        path.push(PathElement { kind, id });
        Key { path }
    }

    /// Parent key, `None` for a root key
    pub fn parent(&self) -> Option<Key> {
        if self.path.len() < 2 {
            return None;
        }
        let mut path = self.path.clone();
        path.pop();
        Some(Key { path })
    }

    fn leaf(&self) -> &PathElement {
        // Keys are only built through root/child, so the path is never empty
        &self.path[self.path.len() - 1]
    }

    /// Kind of the addressed entity
    pub fn kind(&self) -> EntityKind {
        self.leaf().kind
    }

    /// Numeric id of the addressed entity
    pub fn id(&self) -> u64 {
        self.leaf().id
    }

    /// Root element of the path
    pub fn root_element(&self) -> PathElement {
        self.path[0]
    }

    /// Number of path elements
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Whether this is a root key
    pub fn is_root(&self) -> bool {
        self.path.len() == 1
    }

    /// Whether `self` is `ancestor` or one of its descendants
    pub fn starts_with(&self, ancestor: &Key) -> bool {
        self.path.starts_with(&ancestor.path)
    }

    /// Whether `self` is a direct child of `parent`
    pub fn is_child_of(&self, parent: &Key) -> bool {
        self.path.len() == parent.path.len() + 1 && self.starts_with(parent)
    }

    /// Path elements from the root down
    pub fn path(&self) -> &[PathElement] {
        &self.path
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.path.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}({})", element.kind, element.id)?;
        }
        Ok(())
    }
}

/// Selects a version of an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector {
    /// Resolves to the item's current version count
    Latest,
    /// A specific 1-based version number
    Number(u32),
}

impl VersionSelector {
    /// Parse `latest` or a positive decimal version number
    pub fn parse(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("latest") {
            return Ok(VersionSelector::Latest);
        }
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RepoError::bad_request(format!("invalid version: {:?}", s)));
        }
        match s.parse::<u32>() {
            Ok(0) | Err(_) => Err(RepoError::bad_request(format!("invalid version: {:?}", s))),
            Ok(n) => Ok(VersionSelector::Number(n)),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => write!(f, "latest"),
            VersionSelector::Number(n) => write!(f, "{}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_byte_roundtrip() {
        for kind in [
            EntityKind::Collection,
            EntityKind::Module,
            EntityKind::Resource,
            EntityKind::CollectionVersion,
            EntityKind::ModuleVersion,
            EntityKind::BlobRef,
            EntityKind::ReservedRange,
        ] {
            assert_eq!(EntityKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(EntityKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_item_kind_mappings() {
        assert_eq!(ItemKind::Module.id_prefix(), "m");
        assert_eq!(ItemKind::Collection.id_prefix(), "col");
        assert_eq!(ItemKind::Resource.id_prefix(), "r");
        assert_eq!(
            ItemKind::Module.version_kind(),
            Some(EntityKind::ModuleVersion)
        );
        assert_eq!(ItemKind::Resource.version_kind(), None);
        assert_eq!(
            ItemKind::from_entity_kind(EntityKind::Collection),
            Some(ItemKind::Collection)
        );
        assert_eq!(ItemKind::from_entity_kind(EntityKind::BlobRef), None);
    }

    #[test]
    fn test_child_kinds_have_parents() {
        assert_eq!(
            EntityKind::ModuleVersion.parent_kind(),
            Some(EntityKind::Module)
        );
        assert_eq!(EntityKind::BlobRef.parent_kind(), Some(EntityKind::Resource));
        assert_eq!(EntityKind::Module.parent_kind(), None);
    }

    #[test]
    fn test_key_parent_child() {
        let item = Key::root(EntityKind::Module, 12);
        let version = item.child(EntityKind::ModuleVersion, 3);

        assert!(item.is_root());
        assert!(!version.is_root());
        assert_eq!(version.parent(), Some(item.clone()));
        assert_eq!(item.parent(), None);
        assert_eq!(version.kind(), EntityKind::ModuleVersion);
        assert_eq!(version.id(), 3);
        assert!(version.is_child_of(&item));
        assert!(!item.is_child_of(&version));
        assert_eq!(version.root_element().id, 12);
    }

    #[test]
    fn test_key_ordering_groups_children_after_parent() {
        let m12 = Key::root(EntityKind::Module, 12);
        let m12v1 = m12.child(EntityKind::ModuleVersion, 1);
        let m12v2 = m12.child(EntityKind::ModuleVersion, 2);
        let m13 = Key::root(EntityKind::Module, 13);

        assert!(m12 < m12v1);
        assert!(m12v1 < m12v2);
        assert!(m12v2 < m13);
    }

    #[test]
    fn test_key_display() {
        let key = Key::root(EntityKind::Module, 12).child(EntityKind::ModuleVersion, 3);
        assert_eq!(key.to_string(), "Module(12)/ModuleVer(3)");
    }

    #[test]
    fn test_version_selector_parse() {
        assert_eq!(
            VersionSelector::parse("latest").unwrap(),
            VersionSelector::Latest
        );
        assert_eq!(
            VersionSelector::parse("LATEST").unwrap(),
            VersionSelector::Latest
        );
        assert_eq!(
            VersionSelector::parse("7").unwrap(),
            VersionSelector::Number(7)
        );
        assert!(VersionSelector::parse("0").is_err());
        assert!(VersionSelector::parse("-1").is_err());
        assert!(VersionSelector::parse("1.2").is_err());
        assert!(VersionSelector::parse("").is_err());
        assert!(matches!(
            VersionSelector::parse("abc"),
            Err(RepoError::BadRequest { .. })
        ));
    }
}

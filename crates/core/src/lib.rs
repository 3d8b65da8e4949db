//! Core types and traits for the CNX content repository
//!
//! This crate defines the foundational types used throughout the system:
//! - ItemId / IdCodec: prefixed numeric identifiers (`col12`, `m0012`, `r31`)
//! - ItemKind / EntityKind: closed set of stored entity kinds
//! - Key: hierarchical (ancestor) key, item key plus version/blob children
//! - EntityKeySpace: builds and interprets keys for every entity kind
//! - Entity: stored property bag, plus typed records with explicit decode
//! - Limits: document size limits
//! - Error: domain error taxonomy
//! - Traits: the Storage contract implemented by backends

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entity;
pub mod error;
pub mod ids;
pub mod keyspace;
pub mod limits;
pub mod traits;
pub mod types;

pub use entity::{
    BlobInfo, Entity, ItemEntity, Property, ReservedRangeRecord, ResourceItem, ResourceState,
    VersionEntity, VersionPayload, VersionedItem,
};
pub use error::{RepoError, Result, StatusClass};
pub use ids::{IdCodec, ItemId};
pub use keyspace::EntityKeySpace;
pub use limits::Limits;
pub use traits::{Storage, Versioned, WriteOp};
pub use types::{EntityKind, ItemKind, Key, PathElement, VersionSelector};

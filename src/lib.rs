//! cnxrepo - Versioned content repository for CNX collections, modules and
//! resources
//!
//! Items accumulate append-only sequences of immutable versions. Legacy
//! exports can be replayed with their original ids and version numbers.
//!
//! # Quick Start
//!
//! ```
//! use cnxrepo::{ItemKind, Repository, RepositoryConfig, VersionPayload, VersionSelector};
//!
//! let repo = Repository::new(RepositoryConfig::default())?;
//! let module = repo.create_item(ItemKind::Module, None)?;
//! repo.append_version(
//!     &module,
//!     1,
//!     VersionPayload::Module {
//!         cnxml: "<document/>".into(),
//!         resource_map: "<resources/>".into(),
//!     },
//! )?;
//! let latest = repo.get_version(&module, VersionSelector::Latest)?;
//! assert_eq!(latest.version_number(), 1);
//! # Ok::<(), cnxrepo::RepoError>(())
//! ```
//!
//! # Architecture
//!
//! - `cnxrepo-core`: ids, keys, typed entities, errors and the `Storage` trait
//! - `cnxrepo-storage`: in-memory store with per-kind id allocators
//! - `cnxrepo-concurrency`: optimistic transactions
//! - `cnxrepo-engine`: `Repository`, reserved ranges, blob store, config
//! - `cnxrepo-migration`: legacy export replay

pub use cnxrepo_core::{
    BlobInfo, EntityKeySpace, IdCodec, ItemEntity, ItemId, ItemKind, Key, Limits, RepoError,
    ResourceState, Result, StatusClass, VersionEntity, VersionPayload, VersionSelector,
};
pub use cnxrepo_engine::{
    BlobStore, ItemHandle, MemoryBlobStore, Repository, RepositoryConfig, ReserveOutcome,
    ReservedRangeManager, VersionHandle,
};
pub use cnxrepo_migration::{
    GapPolicy, LocalClient, MigrationConfig, MigrationError, MigrationReport,
    ParallelMigrationRunner, RepositoryClient,
};

/// Lower layers, for callers that need more than the facade
pub mod layers {
    pub use cnxrepo_concurrency as concurrency;
    pub use cnxrepo_core as core;
    pub use cnxrepo_engine as engine;
    pub use cnxrepo_migration as migration;
    pub use cnxrepo_storage as storage;
}

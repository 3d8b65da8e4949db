//! Repository engine for cnxrepo
//!
//! This crate ties the lower layers together:
//! - Repository: item and version lifecycle over a `Storage`
//! - Reserved ranges: legacy id protection
//! - Blob store: resource payload uploads
//! - Config: `cnxrepo.toml` loading
//!
//! All writes go through `TransactionManager`, so the engine is the only
//! component that knows how items, versions and blob references relate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob;
pub mod config;
pub mod repository;
pub mod reserved;

pub use blob::{content_hash, BlobStore, MemoryBlobStore, UploadTicket};
pub use config::{RepositoryConfig, ReservedIdsConfig, CONFIG_FILE_NAME};
pub use repository::{ItemHandle, Repository, VersionHandle};
pub use reserved::{ReserveOutcome, ReservedRangeManager};

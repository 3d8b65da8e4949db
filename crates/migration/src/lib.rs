//! Legacy export migration for cnxrepo
//!
//! Replays a legacy CNX export into a `Repository`, keeping legacy item ids
//! and version numbers:
//! - export: directory layout and file formats of the export
//! - migrators: per-item drivers for collections, modules and resources
//! - retry: fixed-delay retry with diagnostic counters
//! - runner: staged, parallel execution and the final report
//!
//! Items are independent. A failed item is reported and the run continues;
//! versions committed before the failure stay in the repository.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod context;
pub mod counters;
pub mod error;
pub mod export;
pub mod migrators;
pub mod retry;
pub mod runner;
pub mod work_queue;

pub use client::{LocalClient, RepositoryClient};
pub use config::{GapPolicy, MigrationConfig};
pub use context::{FailedItem, MigrationContext};
pub use counters::{content_type_counter, Counter, CounterSet, DEFAULT_CONTENT_TYPE};
pub use error::{MigrationError, Result};
pub use export::{ExportRoot, ItemDir, VersionDir};
pub use migrators::{
    migrator_for, CollectionMigrator, ItemMigrator, MigratorState, ModuleMigrator,
    ResourceMigrator,
};
pub use retry::{RetryPolicy, RetryStep};
pub use runner::{MigrationReport, ParallelMigrationRunner};
pub use work_queue::{QueueStats, WorkQueue};

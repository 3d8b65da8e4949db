//! Per-item migrators
//!
//! One migrator replays one legacy item directory:
//!
//! ```text
//! NotStarted -> ItemCreated -> ReplayingVersions* -> Done
//!                                                  \-> Failed
//! ```
//!
//! Collections and modules share the version replay loop and differ only in
//! how a version directory becomes a payload. Resources have no versions:
//! after creation they upload their data once.

pub mod collection;
pub mod module;
pub mod resource;

pub use collection::CollectionMigrator;
pub use module::ModuleMigrator;
pub use resource::ResourceMigrator;

use std::fmt;
use std::sync::Arc;

use cnxrepo_core::{ItemId, ItemKind, VersionPayload};
use tracing::{info, warn};

use crate::client::RepositoryClient;
use crate::config::GapPolicy;
use crate::context::MigrationContext;
use crate::counters::Counter;
use crate::error::{MigrationError, Result};
use crate::export::{ItemDir, VersionDir};
use crate::retry::RetryStep;

/// Progress of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigratorState {
    /// Nothing written yet
    NotStarted,
    /// The item exists in the repository
    ItemCreated,
    /// Versions below `next_version` are replayed
    ReplayingVersions {
        /// Next legacy version number expected
        next_version: u32,
    },
    /// Every step succeeded
    Done,
    /// A step failed fatally
    Failed,
}

impl fmt::Display for MigratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigratorState::NotStarted => write!(f, "NOT_STARTED"),
            MigratorState::ItemCreated => write!(f, "ITEM_CREATED"),
            MigratorState::ReplayingVersions { next_version } => {
                write!(f, "REPLAYING_VERSIONS({})", next_version)
            }
            MigratorState::Done => write!(f, "DONE"),
            MigratorState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Driver that replays one legacy item
pub trait ItemMigrator: Send {
    /// Item being migrated
    fn item(&self) -> ItemId;

    /// Current progress
    fn state(&self) -> &MigratorState;

    /// Replay the item; on error the state is `Failed` and versions
    /// committed before the failure stay in the repository
    fn migrate(&mut self) -> Result<()>;
}

/// Build the migrator for an item directory of `kind`
pub fn migrator_for(
    kind: ItemKind,
    dir: ItemDir,
    ctx: Arc<MigrationContext>,
    client: Arc<dyn RepositoryClient>,
) -> Box<dyn ItemMigrator> {
    match kind {
        ItemKind::Collection => Box::new(CollectionMigrator::new(ctx, client, dir)),
        ItemKind::Module => Box::new(ModuleMigrator::new(ctx, client, dir)),
        ItemKind::Resource => Box::new(ResourceMigrator::new(ctx, client, dir)),
    }
}

// ============================================================================
// Shared steps
// ============================================================================

/// State shared by every migrator variant
pub(crate) struct MigratorCore {
    pub(crate) ctx: Arc<MigrationContext>,
    pub(crate) client: Arc<dyn RepositoryClient>,
    pub(crate) dir: ItemDir,
    pub(crate) state: MigratorState,
    /// Set once any creation step of this item has been retried
    pub(crate) creation_retried: bool,
}

impl MigratorCore {
    pub(crate) fn new(
        ctx: Arc<MigrationContext>,
        client: Arc<dyn RepositoryClient>,
        dir: ItemDir,
    ) -> Self {
        MigratorCore {
            ctx,
            client,
            dir,
            state: MigratorState::NotStarted,
            creation_retried: false,
        }
    }

    pub(crate) fn id(&self) -> ItemId {
        self.dir.id
    }

    /// Run `steps`, moving to `Done` or `Failed`
    pub(crate) fn run<F>(&mut self, steps: F) -> Result<()>
    where
        F: FnOnce(&mut MigratorCore) -> Result<()>,
    {
        let result = steps(self);
        self.state = match &result {
            Ok(()) => MigratorState::Done,
            Err(_) => MigratorState::Failed,
        };
        result
    }

    /// Create the item under its legacy id
    pub(crate) fn create_item(&mut self) -> Result<()> {
        let id = self.id();
        self.ctx.increment(Counter::Items, id.kind(), 1);
        info!(target: "cnxrepo::migrate", item = %id, path = %self.dir.path.display(), "Migrating item");

        let client = Arc::clone(&self.client);
        self.ctx.retry_policy().run_counted(
            self.ctx.counters(),
            RetryStep::Create,
            id,
            None,
            &mut self.creation_retried,
            || client.create_item_for_migration(id),
        )?;
        self.state = MigratorState::ItemCreated;
        Ok(())
    }

    /// Replay every version directory in order
    ///
    /// A version directory numbered above the next expected version marks a
    /// takedown gap. The gap is counted, and the directory's version is
    /// stored either under its own number or under the next sequential one,
    /// depending on the gap policy.
    pub(crate) fn replay_versions<R>(&mut self, read_payload: R) -> Result<()>
    where
        R: Fn(&VersionDir) -> Result<VersionPayload>,
    {
        let id = self.id();
        let kind = id.kind();
        let versions = self.dir.versions()?;
        if versions.is_empty() {
            return Err(MigrationError::NoVersions { item: id });
        }

        let policy = self.ctx.config().gap_policy;
        let mut next_version: u32 = 1;
        let mut last_stored: u32 = 0;
        self.state = MigratorState::ReplayingVersions { next_version };

        for version_dir in &versions {
            let found = version_dir.number;
            if found < next_version {
                return Err(MigrationError::OutOfOrderVersion {
                    item: id,
                    found,
                    expected: next_version,
                });
            }
            if found > next_version {
                let missing = found - next_version;
                self.ctx.increment(Counter::VersionGaps, kind, 1);
                self.ctx
                    .increment(Counter::VersionTakedowns, kind, u64::from(missing));
                warn!(
                    target: "cnxrepo::migrate",
                    item = %id,
                    first_missing = next_version,
                    missing,
                    "Version gap in export"
                );
            }

            let store_number = match policy {
                GapPolicy::PreserveHoles => found,
                GapPolicy::Compact => last_stored + 1,
            };
            let payload = read_payload(version_dir)?;
            self.append(store_number, payload)?;

            last_stored = store_number;
            next_version = found.saturating_add(1);
            self.state = MigratorState::ReplayingVersions { next_version };
        }
        Ok(())
    }

    fn append(&mut self, version_number: u32, payload: VersionPayload) -> Result<()> {
        let id = self.id();
        self.ctx.increment(Counter::Versions, id.kind(), 1);
        self.ctx.transaction_pause();

        let client = Arc::clone(&self.client);
        self.ctx.retry_policy().run(
            self.ctx.counters(),
            RetryStep::Upload,
            id,
            Some(version_number),
            || client.append_version_for_migration(id, version_number, payload.clone()),
        )?;
        info!(target: "cnxrepo::migrate", item = %id, version = version_number, "Migrated version");
        Ok(())
    }
}

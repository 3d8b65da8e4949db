//! Collection migrator

use std::sync::Arc;

use cnxrepo_core::ItemId;

use super::{ItemMigrator, MigratorCore, MigratorState};
use crate::client::RepositoryClient;
use crate::context::MigrationContext;
use crate::error::Result;
use crate::export::ItemDir;

/// Replays a collection and its `collection.xml` versions
pub struct CollectionMigrator {
    core: MigratorCore,
}

impl CollectionMigrator {
    /// Migrator for one collection directory
    pub fn new(
        ctx: Arc<MigrationContext>,
        client: Arc<dyn RepositoryClient>,
        dir: ItemDir,
    ) -> Self {
        CollectionMigrator {
            core: MigratorCore::new(ctx, client, dir),
        }
    }
}

impl ItemMigrator for CollectionMigrator {
    fn item(&self) -> ItemId {
        self.core.id()
    }

    fn state(&self) -> &MigratorState {
        &self.core.state
    }

    fn migrate(&mut self) -> Result<()> {
        self.core.run(|core| {
            core.create_item()?;
            core.replay_versions(|version| version.read_collection())
        })
    }
}

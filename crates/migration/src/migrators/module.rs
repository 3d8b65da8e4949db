//! Module migrator

use std::sync::Arc;

use cnxrepo_core::ItemId;

use super::{ItemMigrator, MigratorCore, MigratorState};
use crate::client::RepositoryClient;
use crate::context::MigrationContext;
use crate::error::Result;
use crate::export::ItemDir;

/// Replays a module and its versions
///
/// Each version carries `index.cnxml` plus a resource map built from the
/// version's `resources` file.
pub struct ModuleMigrator {
    core: MigratorCore,
}

impl ModuleMigrator {
    /// Migrator for one module directory
    pub fn new(
        ctx: Arc<MigrationContext>,
        client: Arc<dyn RepositoryClient>,
        dir: ItemDir,
    ) -> Self {
        ModuleMigrator {
            core: MigratorCore::new(ctx, client, dir),
        }
    }
}

impl ItemMigrator for ModuleMigrator {
    fn item(&self) -> ItemId {
        self.core.id()
    }

    fn state(&self) -> &MigratorState {
        &self.core.state
    }

    fn migrate(&mut self) -> Result<()> {
        self.core.run(|core| {
            core.create_item()?;
            core.replay_versions(|version| version.read_module())
        })
    }
}

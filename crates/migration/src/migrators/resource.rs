//! Resource migrator

use std::sync::Arc;

use cnxrepo_core::ItemId;
use tracing::info;

use super::{ItemMigrator, MigratorCore, MigratorState};
use crate::client::RepositoryClient;
use crate::context::MigrationContext;
use crate::counters::content_type_counter;
use crate::error::Result;
use crate::export::{read_resource, ItemDir};
use crate::retry::RetryStep;

/// Creates a resource and uploads its data
pub struct ResourceMigrator {
    core: MigratorCore,
}

impl ResourceMigrator {
    /// Migrator for one resource directory
    pub fn new(
        ctx: Arc<MigrationContext>,
        client: Arc<dyn RepositoryClient>,
        dir: ItemDir,
    ) -> Self {
        ResourceMigrator {
            core: MigratorCore::new(ctx, client, dir),
        }
    }
}

fn upload(core: &mut MigratorCore) -> Result<()> {
    let id = core.id();
    core.create_item()?;
    let resource = read_resource(&core.dir)?;

    let policy = core.ctx.retry_policy();
    let client = Arc::clone(&core.client);
    let ticket = policy.run_counted(
        core.ctx.counters(),
        RetryStep::Create,
        id,
        None,
        &mut core.creation_retried,
        || client.create_upload(id),
    )?;
    policy.run(core.ctx.counters(), RetryStep::Upload, id, None, || {
        client.upload_resource(
            &ticket,
            &resource.file_name,
            &resource.content_type,
            &resource.data,
        )
    })?;

    core.ctx
        .counters()
        .increment(&content_type_counter(&resource.content_type), 1);
    info!(
        target: "cnxrepo::migrate",
        item = %id,
        content_type = %resource.content_type,
        size = resource.data.len(),
        "Resource uploaded"
    );
    Ok(())
}

impl ItemMigrator for ResourceMigrator {
    fn item(&self) -> ItemId {
        self.core.id()
    }

    fn state(&self) -> &MigratorState {
        &self.core.state
    }

    fn migrate(&mut self) -> Result<()> {
        self.core.run(upload)
    }
}

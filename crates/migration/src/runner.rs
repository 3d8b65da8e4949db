//! Parallel migration runner
//!
//! Runs the stages in the order resources, modules, collections, each on
//! its own `WorkQueue`. Items inside a stage are independent: a failed item
//! is recorded and the rest of the stage continues. The report is produced
//! whether or not items failed.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cnxrepo_core::ItemKind;
use tracing::{error, info, warn};

use crate::client::RepositoryClient;
use crate::config::MigrationConfig;
use crate::context::{FailedItem, MigrationContext};
use crate::counters::{render_counters, Counter};
use crate::error::{MigrationError, Result};
use crate::export::{ExportRoot, ItemDir};
use crate::migrators::migrator_for;
use crate::work_queue::WorkQueue;

/// Outcome of a migration run
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Rendered configuration
    pub config: String,
    /// Counter values sorted by name
    pub counters: Vec<(String, u64)>,
    /// Summary messages in order
    pub summary: Vec<String>,
    /// Items that failed
    pub failures: Vec<FailedItem>,
}

impl MigrationReport {
    fn from_context(ctx: &MigrationContext) -> Self {
        MigrationReport {
            config: ctx.config().to_string(),
            counters: ctx.counters().snapshot(),
            summary: ctx.summary(),
            failures: ctx.failures(),
        }
    }

    /// Value of a counter; zero if it was never incremented
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }

    /// Value of a per-kind counter
    pub fn kind_counter(&self, counter: Counter, kind: ItemKind) -> u64 {
        self.counter(&counter.name(kind))
    }

    /// Whether every item migrated
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The report, or `RunFailed` if any item failed
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(MigrationError::RunFailed {
                failed: self.failures.len(),
            })
        }
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CONFIG:")?;
        write!(f, "{}", self.config)?;
        writeln!(f)?;
        writeln!(f, "COUNTERS:")?;
        render_counters(f, &self.counters)?;
        writeln!(f)?;
        writeln!(f, "SUMMARY MESSAGES:")?;
        for message in &self.summary {
            writeln!(f, "* {}", message)?;
        }
        writeln!(f)?;
        writeln!(f, "FAILED ITEMS:")?;
        if self.failures.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for failure in &self.failures {
            writeln!(f, "  {}", failure)?;
        }
        Ok(())
    }
}

/// Replays a whole legacy export
pub struct ParallelMigrationRunner {
    ctx: Arc<MigrationContext>,
    client: Arc<dyn RepositoryClient>,
    export: ExportRoot,
}

impl ParallelMigrationRunner {
    /// Runner for `config` writing through `client`
    ///
    /// # Errors
    ///
    /// `Config` if the configuration is invalid.
    pub fn new(config: MigrationConfig, client: Arc<dyn RepositoryClient>) -> Result<Self> {
        config.validate()?;
        let export = ExportRoot::new(config.data_root.clone());
        Ok(ParallelMigrationRunner {
            ctx: Arc::new(MigrationContext::new(config)),
            client,
            export,
        })
    }

    /// Shared run context
    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.ctx
    }

    /// Run every requested stage and report
    ///
    /// Item failures do not make this return `Err`; they are listed in the
    /// report, as are export directories that cannot be listed. `Err` means
    /// the run could not proceed at all: the legacy ranges could not be
    /// reserved, or workers could not be started.
    pub fn run(&self) -> Result<MigrationReport> {
        let started = Instant::now();
        info!(target: "cnxrepo::runner", "Migration config:\n{}", self.ctx.config());

        self.client.reserve_legacy_ranges()?;

        for kind in ItemKind::ALL {
            if self.ctx.config().should_migrate(kind) {
                self.run_stage(kind)?;
            } else {
                self.ctx
                    .add_summary(format!("{} migration not requested. SKIPPING", kind));
            }
        }

        self.ctx
            .add_summary(format!("Migration completed in {:?}", started.elapsed()));
        let report = MigrationReport::from_context(&self.ctx);
        info!(target: "cnxrepo::runner", "\n{}", report);
        Ok(report)
    }

    fn run_stage(&self, kind: ItemKind) -> Result<usize> {
        let started = Instant::now();
        let config = self.ctx.config();
        let queue = WorkQueue::new(
            &format!("cnx-{}", kind),
            config.threads(kind),
            config.queue_capacity,
        )
        .map_err(MigrationError::WorkerSpawn)?;

        let kind_root = self.export.kind_root(kind);
        info!(target: "cnxrepo::runner", kind = %kind, root = %kind_root.display(), "Starting stage");
        let mut submitted = 0usize;
        let shards = match self.export.shards(kind) {
            Ok(shards) => shards,
            Err(e) => {
                self.listing_failed(kind, &kind_root, e);
                Vec::new()
            }
        };
        for shard in shards {
            let selected = shard.number.map(|n| config.shard_selected(n)).unwrap_or(false);
            if !selected {
                info!(target: "cnxrepo::runner", shard = %shard.path.display(), "Shard excluded by shard filter");
                self.ctx.increment(Counter::ShardsIgnored, kind, 1);
                continue;
            }
            self.ctx.increment(Counter::ShardsProcessed, kind, 1);

            let items = match shard.items() {
                Ok(items) => items,
                Err(e) => {
                    self.listing_failed(kind, &shard.path, e);
                    continue;
                }
            };
            for item_path in items {
                let dir = match ItemDir::from_path(kind, item_path.clone()) {
                    Ok(dir) => dir,
                    Err(e) => {
                        warn!(target: "cnxrepo::runner", path = %item_path.display(), error = %e, "Skipping malformed item directory");
                        self.ctx
                            .record_failure(kind, item_path.display().to_string(), e);
                        continue;
                    }
                };
                self.submit_item(&queue, kind, dir)?;
                submitted += 1;
            }
        }

        queue.drain();
        queue.shutdown();
        self.ctx.add_summary(format!(
            "Migrated {} {}s in {:?}",
            submitted,
            kind,
            started.elapsed()
        ));
        Ok(submitted)
    }

    /// A directory of the export could not be listed; its items are skipped
    fn listing_failed(&self, kind: ItemKind, path: &Path, e: MigrationError) {
        error!(target: "cnxrepo::runner", kind = %kind, path = %path.display(), error = %e, "Cannot list export directory");
        self.ctx.add_summary(format!(
            "Could not list {} directory {}: {}",
            kind,
            path.display(),
            e
        ));
        self.ctx.record_failure(kind, path.display().to_string(), e);
    }

    fn submit_item(&self, queue: &WorkQueue, kind: ItemKind, dir: ItemDir) -> Result<()> {
        let ctx = Arc::clone(&self.ctx);
        let mut migrator = migrator_for(kind, dir, Arc::clone(&ctx), Arc::clone(&self.client));
        queue
            .submit(move || {
                let item = migrator.item();
                let outcome = catch_unwind(AssertUnwindSafe(|| migrator.migrate()));
                let message = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => format!(
                        "migrator panicked: {}",
                        panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "(non-string panic)".to_string())
                    ),
                };
                error!(target: "cnxrepo::runner", item = %item, error = %message, "Item failed");
                ctx.record_failure(kind, item.to_string(), message);
            })
            .map_err(MigrationError::from)
    }
}

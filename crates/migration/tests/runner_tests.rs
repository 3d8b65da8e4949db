//! Parallel Runner Tests
//!
//! Whole-export runs: concurrency, stage selection, shard filtering,
//! transient store faults and failure reporting.

mod common;

use std::sync::Arc;

use cnxrepo_core::{ItemId, ItemKind, Storage};
use cnxrepo_migration::{Counter, MigrationError, ParallelMigrationRunner};
use cnxrepo_storage::testing::FaultInjectingStore;
use cnxrepo_storage::MemoryStore;
use common::{init_tracing, local_client, local_client_over, ExportBuilder};

// ============================================================================
// Concurrency
// ============================================================================

/// 50 independent modules with 3 versions each
#[test]
fn test_fifty_items_three_versions_each() {
    init_tracing();
    let export = ExportBuilder::new();
    for i in 1..=50 {
        let shard = format!("{:03}", i % 4);
        export.module(&shard, &format!("{:07}", i), &["1", "2", "3"]);
    }
    let (repo, client) = local_client();

    let mut config = export.config();
    config.module_threads = 8;
    config.queue_capacity = 4;
    let runner = ParallelMigrationRunner::new(config, client).unwrap();
    let report = runner.run().unwrap();

    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(report.kind_counter(Counter::Items, ItemKind::Module), 50);
    assert_eq!(report.kind_counter(Counter::Versions, ItemKind::Module), 150);
    assert_eq!(report.kind_counter(Counter::ShardsProcessed, ItemKind::Module), 4);

    let ids = repo.list_items(ItemKind::Module).unwrap();
    assert_eq!(ids.len(), 50);
    let versions: u32 = ids
        .iter()
        .map(|id| repo.get_item(*id).unwrap().version_count())
        .sum();
    assert_eq!(versions, 150);
    for id in ids {
        let handle = repo.item_handle(id).unwrap();
        assert_eq!(repo.list_versions(&handle).unwrap(), vec![1, 2, 3]);
    }
}

// ============================================================================
// Stages and Shards
// ============================================================================

#[test]
fn test_all_stages_in_order() {
    let export = ExportBuilder::new();
    export.resource("000", "0000031", "image/png", b"png");
    export.module("000", "0000012", &["1", "3"]);
    export.collection("000", "0000002", &["1"]);
    let (repo, client) = local_client();

    let runner = ParallelMigrationRunner::new(export.config(), client).unwrap();
    let report = runner.run().unwrap().into_result().unwrap();

    assert_eq!(report.counter("RESOURCES"), 1);
    assert_eq!(report.counter("MODULES"), 1);
    assert_eq!(report.counter("COLLECTIONS"), 1);
    assert_eq!(report.counter("MODULE_VERSION_GAPS"), 1);
    assert!(report.summary[0].starts_with("Migrated 1 resources"));
    assert!(report.summary[1].starts_with("Migrated 1 modules"));
    assert!(report.summary[2].starts_with("Migrated 1 collections"));
    assert!(report.summary[3].starts_with("Migration completed"));
    assert!(repo.item_handle(ItemId::new(ItemKind::Collection, 2)).is_ok());

    let text = report.to_string();
    for section in ["CONFIG:", "COUNTERS:", "SUMMARY MESSAGES:", "FAILED ITEMS:"] {
        assert!(text.contains(section), "missing {} in\n{}", section, text);
    }
    assert!(text.contains("* Migrated 1 modules"));
}

#[test]
fn test_unrequested_stages_skipped() {
    let export = ExportBuilder::new();
    export.resource("000", "0000031", "image/png", b"png");
    export.module("000", "0000012", &["1"]);
    let (repo, client) = local_client();

    let mut config = export.config();
    config.migrate_all = false;
    config.migrate_modules = true;
    let report = ParallelMigrationRunner::new(config, client)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.counter("RESOURCES"), 0);
    assert_eq!(report.counter("MODULES"), 1);
    assert!(report
        .summary
        .iter()
        .any(|m| m == "resource migration not requested. SKIPPING"));
    assert!(report
        .summary
        .iter()
        .any(|m| m == "collection migration not requested. SKIPPING"));
    assert!(repo.list_items(ItemKind::Resource).unwrap().is_empty());
}

#[test]
fn test_shard_filter() {
    let export = ExportBuilder::new();
    export.collection("001", "0000001", &["1"]);
    export.collection("002", "0000002", &["1"]);
    export.collection("003", "0000003", &["1"]);
    export.collection("misc", "0000004", &["1"]);
    let (repo, client) = local_client();

    let mut config = export.config();
    config.min_shard = 2;
    config.max_shard = 2;
    let report = ParallelMigrationRunner::new(config, client)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.counter("COLLECTION_SHARDS_PROCESSED"), 1);
    assert_eq!(report.counter("COLLECTION_SHARDS_IGNORED"), 3);
    assert_eq!(
        repo.list_items(ItemKind::Collection).unwrap(),
        vec![ItemId::new(ItemKind::Collection, 2)]
    );
}

// ============================================================================
// Failures
// ============================================================================

/// Transient commit failures are retried and the run still succeeds
#[test]
fn test_transient_store_faults_retried() {
    let export = ExportBuilder::new();
    export.module("000", "0000001", &["1", "2"]);
    let faulty = Arc::new(FaultInjectingStore::new(MemoryStore::new()));
    let store: Arc<dyn Storage> = faulty.clone();
    let (repo, client) = local_client_over(store);

    let mut config = export.config();
    config.module_threads = 1;
    let runner = ParallelMigrationRunner::new(config, client).unwrap();
    faulty.fail_next_commits(2);
    let report = runner.run().unwrap();

    assert!(report.is_success(), "failures: {:?}", report.failures);
    assert_eq!(faulty.injected_faults(), 2);
    assert_eq!(report.counter("MODULES_WITH_CREATION_RETRIES"), 1);
    assert_eq!(report.counter("MODULE_CREATION_RETRIES"), 2);
    assert_eq!(
        repo.get_item(ItemId::new(ItemKind::Module, 1))
            .unwrap()
            .version_count(),
        2
    );
}

/// One bad item is reported; the others still migrate
#[test]
fn test_failed_item_reported_others_continue() {
    let export = ExportBuilder::new();
    export.module("000", "0000001", &["1"]);
    export.module("000", "0000002", &[]);
    export.module("000", "0000003", &["1", "2"]);
    export.module("000", "not-a-number", &["1"]);
    let (repo, client) = local_client();

    let report = ParallelMigrationRunner::new(export.config(), client)
        .unwrap()
        .run()
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.kind_counter(Counter::ItemsFailed, ItemKind::Module), 2);
    assert!(report.failures.iter().any(|f| f.item == "m2"));
    assert!(report
        .failures
        .iter()
        .any(|f| f.item.ends_with("not-a-number")));
    assert!(report.to_string().contains("m2: m2 has no versions"));

    assert_eq!(repo.list_items(ItemKind::Module).unwrap().len(), 3);
    assert_eq!(
        repo.get_item(ItemId::new(ItemKind::Module, 3))
            .unwrap()
            .version_count(),
        2
    );
    assert!(matches!(
        report.into_result(),
        Err(MigrationError::RunFailed { failed: 2 })
    ));
}

/// An unlistable kind root fails that stage only; the report still comes back
#[test]
fn test_unlistable_export_directory_reported() {
    let export = ExportBuilder::new();
    export.resource("000", "0000031", "image/png", b"png");
    export.collection("000", "0000005", &["1"]);
    std::fs::write(export.root().join("modules"), "not a directory").unwrap();
    let (repo, client) = local_client();

    let report = ParallelMigrationRunner::new(export.config(), client)
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].item.ends_with("modules"));
    assert_eq!(report.kind_counter(Counter::ItemsFailed, ItemKind::Module), 1);
    assert!(report
        .summary
        .iter()
        .any(|m| m.starts_with("Could not list module directory")));

    // Stages before and after the failing one still ran
    assert_eq!(report.kind_counter(Counter::Items, ItemKind::Resource), 1);
    assert_eq!(report.kind_counter(Counter::Items, ItemKind::Collection), 1);
    assert_eq!(repo.list_items(ItemKind::Collection).unwrap().len(), 1);
    assert!(report.to_string().contains("COUNTERS:"));
    assert!(matches!(
        report.into_result(),
        Err(MigrationError::RunFailed { failed: 1 })
    ));
}

/// Running the same export twice leaves the first run's data untouched
#[test]
fn test_second_run_reports_existing_items() {
    let export = ExportBuilder::new();
    export.collection("000", "0000001", &["1", "2"]);
    let (repo, client) = local_client();

    let first = ParallelMigrationRunner::new(export.config(), client.clone())
        .unwrap()
        .run()
        .unwrap();
    assert!(first.is_success());

    let second = ParallelMigrationRunner::new(export.config(), client)
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(second.failures.len(), 1);
    assert_eq!(
        repo.get_item(ItemId::new(ItemKind::Collection, 1))
            .unwrap()
            .version_count(),
        2
    );
}

#[test]
fn test_invalid_config_rejected() {
    let export = ExportBuilder::new();
    let (_repo, client) = local_client();
    let mut config = export.config();
    config.module_threads = 0;
    assert!(matches!(
        ParallelMigrationRunner::new(config, client),
        Err(MigrationError::Config(_))
    ));
}

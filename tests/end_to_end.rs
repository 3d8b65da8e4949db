//! End-to-end tests through the `cnxrepo` facade
//!
//! Migrate a small legacy export, then use the repository the way the
//! serving layer would: read versions, append new ones, map errors.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use cnxrepo::{
    GapPolicy, ItemId, ItemKind, LocalClient, MemoryBlobStore, MigrationConfig,
    ParallelMigrationRunner, RepoError, Repository, RepositoryConfig, StatusClass,
    VersionPayload, VersionSelector,
};
use tempfile::TempDir;

fn write_version(dir: &Path, file: &str, body: &str) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(file), body).unwrap();
}

fn legacy_export() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let module = tmp.path().join("modules/012/0000012");
    write_version(&module.join("1"), "index.cnxml", "<document>one</document>");
    write_version(&module.join("3"), "index.cnxml", "<document>three</document>");
    fs::write(
        module.join("3/resources"),
        "[resource]\nfilename = graph.png\nfileid = 31\n",
    )
    .unwrap();

    let resource = tmp.path().join("resources/031/0000031");
    fs::create_dir_all(&resource).unwrap();
    fs::write(
        resource.join("resource_properties.txt"),
        "filename=graph.png\nmime_type=image/png\n",
    )
    .unwrap();
    fs::write(resource.join("resource_data"), b"png").unwrap();
    tmp
}

#[test]
fn test_migrate_then_serve() {
    let export = legacy_export();
    let repo = Arc::new(Repository::new(RepositoryConfig::default()).unwrap());
    let client = Arc::new(LocalClient::new(
        Arc::clone(&repo),
        Arc::new(MemoryBlobStore::new()),
    ));

    let config = MigrationConfig::from_toml_str(&format!(
        "data_root = {:?}\nfailure_delay_ms = 0\ntransaction_delay_ms = 0\n",
        export.path().display().to_string()
    ))
    .unwrap();
    assert_eq!(config.gap_policy, GapPolicy::PreserveHoles);
    let report = ParallelMigrationRunner::new(config, client)
        .unwrap()
        .run()
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(report.counter("MODULE_VERSION_TAKEDOWNS"), 1);

    let module = repo
        .item_handle(ItemId::parse(ItemKind::Module, "m0012").unwrap())
        .unwrap();
    let latest = repo.get_version(&module, VersionSelector::Latest).unwrap();
    assert_eq!(latest.version_number(), 3);
    match latest.payload {
        VersionPayload::Module { resource_map, .. } => {
            assert!(resource_map.contains("<resourceId>r0031</resourceId>"));
        }
        other => panic!("expected module payload, got {:?}", other),
    }

    // Taken-down version maps to not-found
    let err = repo
        .get_version(&module, VersionSelector::parse("2").unwrap())
        .unwrap_err();
    assert_eq!(err.status_class(), StatusClass::NotFound);

    // New edits continue after the legacy history
    repo.append_version(
        &module,
        4,
        VersionPayload::Module {
            cnxml: "<document>four</document>".into(),
            resource_map: String::new(),
        },
    )
    .unwrap();
    let err = repo
        .append_version(
            &module,
            4,
            VersionPayload::Module {
                cnxml: String::new(),
                resource_map: String::new(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, RepoError::VersionConflict { .. }));
    assert_eq!(err.status_class(), StatusClass::Conflict);

    // Fresh items land above the legacy range
    let fresh = repo.create_item(ItemKind::Module, None).unwrap();
    assert_eq!(fresh.id().to_string(), "m50000");
}

#[test]
fn test_bad_version_selector_is_precondition_failure() {
    let err = VersionSelector::parse("latest-ish").unwrap_err();
    assert_eq!(err.status_class(), StatusClass::PreconditionFailed);
    assert_eq!(err.status_class().http_status(), 412);
}

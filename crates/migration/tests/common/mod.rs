//! Shared test utilities for the migration integration suites.
//!
//! Import via `mod common;`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};

use cnxrepo_core::{ItemId, ItemKind, RepoError, Result as RepoResult, Storage, VersionPayload};
use cnxrepo_engine::{MemoryBlobStore, Repository, RepositoryConfig, UploadTicket};
use cnxrepo_migration::{LocalClient, MigrationConfig, RepositoryClient};
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Export fixtures
// ============================================================================

/// Builds a legacy export tree in a temp directory.
pub struct ExportBuilder {
    pub dir: TempDir,
}

impl ExportBuilder {
    pub fn new() -> Self {
        ExportBuilder {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Unthrottled config over this export.
    pub fn config(&self) -> MigrationConfig {
        MigrationConfig::unthrottled(self.root())
    }

    fn item_dir(&self, kind: ItemKind, shard: &str, item: &str) -> PathBuf {
        let path = self.root().join(kind.export_dir()).join(shard).join(item);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Module `item` with one version directory per name.
    pub fn module(&self, shard: &str, item: &str, versions: &[&str]) -> PathBuf {
        let path = self.item_dir(ItemKind::Module, shard, item);
        for version in versions {
            let version_dir = path.join(version);
            fs::create_dir_all(&version_dir).unwrap();
            fs::write(
                version_dir.join("index.cnxml"),
                format!("<document id=\"{}\" version=\"{}\"/>", item, version),
            )
            .unwrap();
            fs::write(
                version_dir.join("resources"),
                "[resource]\nfilename = figure.png\nfileid = 31\n",
            )
            .unwrap();
        }
        path
    }

    /// Collection `item` with one version directory per name.
    pub fn collection(&self, shard: &str, item: &str, versions: &[&str]) -> PathBuf {
        let path = self.item_dir(ItemKind::Collection, shard, item);
        for version in versions {
            let version_dir = path.join(version);
            fs::create_dir_all(&version_dir).unwrap();
            fs::write(
                version_dir.join("collection.xml"),
                format!("<collection id=\"{}\" version=\"{}\"/>", item, version),
            )
            .unwrap();
        }
        path
    }

    /// Resource `item` with the given content type and data.
    pub fn resource(&self, shard: &str, item: &str, content_type: &str, data: &[u8]) -> PathBuf {
        let path = self.item_dir(ItemKind::Resource, shard, item);
        fs::write(
            path.join("resource_properties.txt"),
            format!("filename = {}.bin\nmime_type = {}\n", item, content_type),
        )
        .unwrap();
        fs::write(path.join("resource_data"), data).unwrap();
        path
    }
}

// ============================================================================
// Clients
// ============================================================================

/// In-memory repository plus a client over it.
pub fn local_client() -> (Arc<Repository>, Arc<LocalClient>) {
    let repo = Arc::new(Repository::new(RepositoryConfig::default()).unwrap());
    let client = Arc::new(LocalClient::new(
        Arc::clone(&repo),
        Arc::new(MemoryBlobStore::new()),
    ));
    (repo, client)
}

/// Repository over a custom store plus a client over it.
pub fn local_client_over(store: Arc<dyn Storage>) -> (Arc<Repository>, Arc<LocalClient>) {
    let repo = Arc::new(Repository::with_store(store, RepositoryConfig::default()).unwrap());
    let client = Arc::new(LocalClient::new(
        Arc::clone(&repo),
        Arc::new(MemoryBlobStore::new()),
    ));
    (repo, client)
}

/// Client whose every write fails with a transient storage error.
#[derive(Default)]
pub struct AlwaysFailingClient {
    pub calls: AtomicU32,
}

impl AlwaysFailingClient {
    fn fail<T>(&self) -> RepoResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(RepoError::storage("store unavailable"))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RepositoryClient for AlwaysFailingClient {
    fn reserve_legacy_ranges(&self) -> RepoResult<()> {
        Ok(())
    }

    fn create_item_for_migration(&self, _id: ItemId) -> RepoResult<()> {
        self.fail()
    }

    fn append_version_for_migration(
        &self,
        _id: ItemId,
        _version_number: u32,
        _payload: VersionPayload,
    ) -> RepoResult<()> {
        self.fail()
    }

    fn create_upload(&self, _id: ItemId) -> RepoResult<UploadTicket> {
        self.fail()
    }

    fn upload_resource(
        &self,
        _ticket: &UploadTicket,
        _file_name: &str,
        _content_type: &str,
        _data: &[u8],
    ) -> RepoResult<()> {
        self.fail()
    }
}

/// Client that delegates to `inner` but fails appends of one version.
pub struct FailingVersionClient {
    pub inner: Arc<LocalClient>,
    pub failing_version: u32,
}

impl RepositoryClient for FailingVersionClient {
    fn reserve_legacy_ranges(&self) -> RepoResult<()> {
        self.inner.reserve_legacy_ranges()
    }

    fn create_item_for_migration(&self, id: ItemId) -> RepoResult<()> {
        self.inner.create_item_for_migration(id)
    }

    fn append_version_for_migration(
        &self,
        id: ItemId,
        version_number: u32,
        payload: VersionPayload,
    ) -> RepoResult<()> {
        if version_number == self.failing_version {
            return Err(RepoError::internal("version rejected"));
        }
        self.inner
            .append_version_for_migration(id, version_number, payload)
    }

    fn create_upload(&self, id: ItemId) -> RepoResult<UploadTicket> {
        self.inner.create_upload(id)
    }

    fn upload_resource(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> RepoResult<()> {
        self.inner
            .upload_resource(ticket, file_name, content_type, data)
    }
}

/// Client that delegates to `inner` after failing the first item creation
/// and the first upload ticket request with a transient error.
pub struct FlakyCreationClient {
    pub inner: Arc<LocalClient>,
    create_failed: AtomicU32,
    upload_ticket_failed: AtomicU32,
}

impl FlakyCreationClient {
    pub fn new(inner: Arc<LocalClient>) -> Self {
        FlakyCreationClient {
            inner,
            create_failed: AtomicU32::new(0),
            upload_ticket_failed: AtomicU32::new(0),
        }
    }

    fn fail_once(flag: &AtomicU32) -> bool {
        flag.fetch_add(1, Ordering::SeqCst) == 0
    }
}

impl RepositoryClient for FlakyCreationClient {
    fn reserve_legacy_ranges(&self) -> RepoResult<()> {
        self.inner.reserve_legacy_ranges()
    }

    fn create_item_for_migration(&self, id: ItemId) -> RepoResult<()> {
        if Self::fail_once(&self.create_failed) {
            return Err(RepoError::storage("create timed out"));
        }
        self.inner.create_item_for_migration(id)
    }

    fn append_version_for_migration(
        &self,
        id: ItemId,
        version_number: u32,
        payload: VersionPayload,
    ) -> RepoResult<()> {
        self.inner
            .append_version_for_migration(id, version_number, payload)
    }

    fn create_upload(&self, id: ItemId) -> RepoResult<UploadTicket> {
        if Self::fail_once(&self.upload_ticket_failed) {
            return Err(RepoError::storage("upload ticket timed out"));
        }
        self.inner.create_upload(id)
    }

    fn upload_resource(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> RepoResult<()> {
        self.inner
            .upload_resource(ticket, file_name, content_type, data)
    }
}

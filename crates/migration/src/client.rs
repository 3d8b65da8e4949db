//! Repository access used by the migrators
//!
//! Migrators talk to the repository through `RepositoryClient` so a run can
//! target an in-process `Repository` or a test double that injects failures.
//! Every call is a single repository operation, which is the unit the retry
//! policy repeats.

use std::sync::Arc;

use cnxrepo_core::{ItemEntity, ItemId, RepoError, ResourceState, Result, VersionPayload};
use cnxrepo_engine::{BlobStore, Repository, UploadTicket};
use tracing::debug;

/// Operations a migration run needs from the repository
pub trait RepositoryClient: Send + Sync {
    /// Reserve the legacy id ranges of every kind
    fn reserve_legacy_ranges(&self) -> Result<()>;

    /// Create an item with its legacy id; repeated calls on an empty item
    /// succeed
    fn create_item_for_migration(&self, id: ItemId) -> Result<()>;

    /// Append a legacy version
    fn append_version_for_migration(
        &self,
        id: ItemId,
        version_number: u32,
        payload: VersionPayload,
    ) -> Result<()>;

    /// Open an upload for a created resource
    fn create_upload(&self, id: ItemId) -> Result<UploadTicket>;

    /// Upload resource data and mark the resource complete
    fn upload_resource(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<()>;
}

/// Client over an in-process repository and blob store
pub struct LocalClient {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
}

impl LocalClient {
    /// Client over `repo` and `blobs`
    pub fn new(repo: Arc<Repository>, blobs: Arc<dyn BlobStore>) -> Self {
        LocalClient { repo, blobs }
    }

    /// Underlying repository
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn already_uploaded(&self, id: ItemId, blob_key: &str) -> Result<bool> {
        Ok(match self.repo.get_item(id)? {
            ItemEntity::Resource(resource) => {
                resource.state == ResourceState::UploadComplete
                    && resource.blob.map(|b| b.blob_key == blob_key).unwrap_or(false)
            }
            _ => false,
        })
    }
}

impl RepositoryClient for LocalClient {
    fn reserve_legacy_ranges(&self) -> Result<()> {
        self.repo.reserved_ranges().reserve_all()
    }

    fn create_item_for_migration(&self, id: ItemId) -> Result<()> {
        self.repo.create_item_for_migration(id).map(|_| ())
    }

    fn append_version_for_migration(
        &self,
        id: ItemId,
        version_number: u32,
        payload: VersionPayload,
    ) -> Result<()> {
        let handle = self.repo.item_handle(id)?;
        self.repo
            .append_version_for_migration(&handle, version_number, payload)
            .map(|_| ())
    }

    fn create_upload(&self, id: ItemId) -> Result<UploadTicket> {
        self.blobs.create_upload(id)
    }

    fn upload_resource(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<()> {
        let handle = self.repo.item_handle(ticket.resource)?;
        // Uploading twice on one ticket returns the first blob
        let info = self.blobs.upload(ticket, file_name, content_type, data)?;
        match self.repo.transition_resource_to_uploaded(&handle, info.clone()) {
            Ok(()) => Ok(()),
            Err(RepoError::StateMismatch { .. })
                if self.already_uploaded(ticket.resource, &info.blob_key)? =>
            {
                debug!(target: "cnxrepo::migrate", resource = %ticket.resource, "Upload already recorded");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

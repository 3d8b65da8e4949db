//! Blob store contract and in-memory implementation
//!
//! A resource upload is a two-step exchange: `create_upload` hands out an
//! upload ticket for a resource, `upload` stores the bytes against it and
//! returns durable metadata. Uploading again with a completed ticket returns
//! the original metadata so a retried upload after a lost reply is harmless.

use std::fmt::Write;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use cnxrepo_core::{BlobInfo, ItemId, RepoError, Result};

/// Handle returned by `create_upload`, the target of one upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UploadTicket {
    /// Resource the upload belongs to
    pub resource: ItemId,
    /// Opaque upload reference
    pub upload_key: String,
}

/// External blob storage
pub trait BlobStore: Send + Sync {
    /// Open an upload slot for `resource`
    fn create_upload(&self, resource: ItemId) -> Result<UploadTicket>;

    /// Store `data` against `ticket`
    fn upload(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<BlobInfo>;

    /// Fetch a blob by reference
    fn fetch(&self, blob_key: &str) -> Result<Option<(BlobInfo, Arc<Vec<u8>>)>>;
}

/// Hex SHA-256 of `data`
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        // Writing to a String cannot fail
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

enum UploadSlot {
    Pending(ItemId),
    Complete(String),
}

/// In-memory blob store
#[derive(Default)]
pub struct MemoryBlobStore {
    slots: DashMap<String, UploadSlot>,
    blobs: DashMap<String, (BlobInfo, Arc<Vec<u8>>)>,
}

impl MemoryBlobStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether no blob is stored
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn create_upload(&self, resource: ItemId) -> Result<UploadTicket> {
        let upload_key = Uuid::new_v4().to_string();
        self.slots
            .insert(upload_key.clone(), UploadSlot::Pending(resource));
        Ok(UploadTicket {
            resource,
            upload_key,
        })
    }

    fn upload(
        &self,
        ticket: &UploadTicket,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<BlobInfo> {
        let mut slot = self
            .slots
            .get_mut(&ticket.upload_key)
            .ok_or_else(|| RepoError::not_found(format!("upload {}", ticket.upload_key)))?;

        match &*slot {
            UploadSlot::Complete(blob_key) => {
                return self
                    .blobs
                    .get(blob_key)
                    .map(|entry| entry.0.clone())
                    .ok_or_else(|| RepoError::internal(format!("blob {} vanished", blob_key)));
            }
            UploadSlot::Pending(resource) if *resource != ticket.resource => {
                return Err(RepoError::bad_request(format!(
                    "upload {} belongs to {}, not {}",
                    ticket.upload_key, resource, ticket.resource
                )));
            }
            UploadSlot::Pending(_) => {}
        }

        let info = BlobInfo {
            blob_key: Uuid::new_v4().to_string(),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            content_hash: content_hash(data),
            file_name: file_name.to_string(),
            created: Utc::now(),
        };
        self.blobs
            .insert(info.blob_key.clone(), (info.clone(), Arc::new(data.to_vec())));
        *slot = UploadSlot::Complete(info.blob_key.clone());
        debug!(target: "cnxrepo::store", resource = %ticket.resource, size = info.size, "Blob uploaded");
        Ok(info)
    }

    fn fetch(&self, blob_key: &str) -> Result<Option<(BlobInfo, Arc<Vec<u8>>)>> {
        Ok(self
            .blobs
            .get(blob_key)
            .map(|entry| (entry.0.clone(), Arc::clone(&entry.1))))
    }
}

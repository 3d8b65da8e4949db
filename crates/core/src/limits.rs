//! Size limits for version documents
//!
//! Violations result in `Oversize` errors. Limits are part of the
//! repository configuration and can be lowered for tests.

use crate::entity::VersionPayload;
use crate::error::{RepoError, Result};
use serde::{Deserialize, Serialize};

/// Size limits for stored documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum module CNXML size in bytes (default: 2MB)
    pub max_cnxml_bytes: usize,

    /// Maximum collection XML size in bytes (default: 2MB)
    pub max_colxml_bytes: usize,

    /// Maximum resource mapping size in bytes (default: 1MB)
    pub max_resource_map_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_cnxml_bytes: 2 * 1024 * 1024,
            max_colxml_bytes: 2 * 1024 * 1024,
            max_resource_map_bytes: 1024 * 1024,
        }
    }
}

impl Limits {
    /// Create limits with small values for testing
    pub fn with_small_limits() -> Self {
        Limits {
            max_cnxml_bytes: 100,
            max_colxml_bytes: 100,
            max_resource_map_bytes: 50,
        }
    }

    /// Validate every document of a payload
    pub fn check_payload(&self, payload: &VersionPayload) -> Result<()> {
        match payload {
            VersionPayload::Collection { colxml } => {
                check("collection xml", colxml.len(), self.max_colxml_bytes)
            }
            VersionPayload::Module {
                cnxml,
                resource_map,
            } => {
                check("cnxml", cnxml.len(), self.max_cnxml_bytes)?;
                check(
                    "resource map",
                    resource_map.len(),
                    self.max_resource_map_bytes,
                )
            }
        }
    }
}

fn check(what: &str, size: usize, limit: usize) -> Result<()> {
    if size > limit {
        return Err(RepoError::Oversize {
            what: what.to_string(),
            size,
            limit,
        });
    }
    Ok(())
}

//! Repository configuration via `cnxrepo.toml`
//!
//! Holds the reserved legacy id boundaries per item kind and the document
//! size limits. Every field has a default, so an empty file is valid.

use cnxrepo_core::{ItemKind, Limits, RepoError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name used by deployments
pub const CONFIG_FILE_NAME: &str = "cnxrepo.toml";

/// First collection id left to auto-assignment
pub const COLLECTION_FIRST_FREE_ID: u64 = 20_000;
/// First module id left to auto-assignment
pub const MODULE_FIRST_FREE_ID: u64 = 50_000;
/// First resource id left to auto-assignment
pub const RESOURCE_FIRST_FREE_ID: u64 = 300_000;

/// Reserved legacy id boundaries, one per item kind
///
/// Ids `[1, first_free_id)` of each kind are protected: only the migration
/// path may create them, and the allocator never hands them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIdsConfig {
    /// First auto-assigned collection id
    #[serde(default = "default_collection_first_free_id")]
    pub collection_first_free_id: u64,
    /// First auto-assigned module id
    #[serde(default = "default_module_first_free_id")]
    pub module_first_free_id: u64,
    /// First auto-assigned resource id
    #[serde(default = "default_resource_first_free_id")]
    pub resource_first_free_id: u64,
}

fn default_collection_first_free_id() -> u64 {
    COLLECTION_FIRST_FREE_ID
}

fn default_module_first_free_id() -> u64 {
    MODULE_FIRST_FREE_ID
}

fn default_resource_first_free_id() -> u64 {
    RESOURCE_FIRST_FREE_ID
}

impl Default for ReservedIdsConfig {
    fn default() -> Self {
        ReservedIdsConfig {
            collection_first_free_id: COLLECTION_FIRST_FREE_ID,
            module_first_free_id: MODULE_FIRST_FREE_ID,
            resource_first_free_id: RESOURCE_FIRST_FREE_ID,
        }
    }
}

impl ReservedIdsConfig {
    /// Boundary for one kind
    pub fn first_free_id(&self, kind: ItemKind) -> u64 {
        match kind {
            ItemKind::Collection => self.collection_first_free_id,
            ItemKind::Module => self.module_first_free_id,
            ItemKind::Resource => self.resource_first_free_id,
        }
    }
}

/// Repository configuration loaded from `cnxrepo.toml`.
///
/// # Example
///
/// ```toml
/// [reserved]
/// module_first_free_id = 50000
///
/// [limits]
/// max_cnxml_bytes = 2097152
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Reserved legacy id ranges
    #[serde(default)]
    pub reserved: ReservedIdsConfig,
    /// Document size limits
    #[serde(default)]
    pub limits: Limits,
}

impl RepositoryConfig {
    /// Check value constraints
    ///
    /// # Errors
    ///
    /// Returns an error if a reserved boundary does not leave room for at
    /// least id 1.
    pub fn validate(&self) -> Result<()> {
        for kind in ItemKind::ALL {
            let first_free_id = self.reserved.first_free_id(kind);
            if first_free_id <= 1 {
                return Err(RepoError::bad_request(format!(
                    "{} first free id must be greater than 1, got {}",
                    kind, first_free_id
                )));
            }
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# CNX repository configuration
#
# Legacy id ranges. Ids below each boundary are reserved for migration
# and never auto-assigned.
[reserved]
collection_first_free_id = 20000
module_first_free_id = 50000
resource_first_free_id = 300000

# Document size limits in bytes.
[limits]
max_cnxml_bytes = 2097152
max_colxml_bytes = 2097152
max_resource_map_bytes = 1048576
"#
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RepositoryConfig = toml::from_str(content)
            .map_err(|e| RepoError::bad_request(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RepoError::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            RepoError::BadRequest { message } => RepoError::bad_request(format!(
                "config file '{}': {}",
                path.display(),
                message
            )),
            other => other,
        })
    }
}

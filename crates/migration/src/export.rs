//! Legacy export layout
//!
//! ```text
//! {data_root}/
//!   resources/{shard}/{item}/resource_properties.txt
//!                           /resource_data
//!   modules/{shard}/{item}/{version}/index.cnxml
//!                                   /resources
//!   collections/{shard}/{item}/{version}/collection.xml
//! ```
//!
//! Shard, item and version directories are zero-padded decimal numbers, so
//! lexicographic order is numeric order. Entries starting with `.` are
//! ignored.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use cnxrepo_core::{IdCodec, ItemId, ItemKind, VersionPayload};

use crate::counters::DEFAULT_CONTENT_TYPE;
use crate::error::{MigrationError, Result};

/// Module body file
pub const MODULE_BODY_FILE: &str = "index.cnxml";
/// Module resource list file (INI)
pub const MODULE_RESOURCES_FILE: &str = "resources";
/// Collection body file
pub const COLLECTION_BODY_FILE: &str = "collection.xml";
/// Resource metadata file (Java properties)
pub const RESOURCE_PROPERTIES_FILE: &str = "resource_properties.txt";
/// Resource payload file
pub const RESOURCE_DATA_FILE: &str = "resource_data";
/// Repository id written into resource maps
pub const RESOURCE_MAP_REPOSITORY_ID: &str = "cnx-repo";

/// Sorted, non-hidden subdirectories of `dir`
pub fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| MigrationError::io(dir, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MigrationError::io(dir, e))?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type().map_err(|e| MigrationError::io(entry.path(), e))?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MigrationError::invalid_export(path, "directory name is not UTF-8"))
}

fn numeric_dir_name(path: &Path) -> Result<u64> {
    let name = dir_name(path)?;
    IdCodec::parse_digits(name).ok_or_else(|| {
        MigrationError::invalid_export(path, format!("'{}' is not a decimal number", name))
    })
}

/// Read a UTF-8 text file
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))
}

// ============================================================================
// Export root and shards
// ============================================================================

/// Root of a legacy export
#[derive(Debug, Clone)]
pub struct ExportRoot {
    root: PathBuf,
}

impl ExportRoot {
    /// Export rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ExportRoot { root: root.into() }
    }

    /// Root path
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Directory holding the shards of `kind`
    pub fn kind_root(&self, kind: ItemKind) -> PathBuf {
        self.root.join(kind.export_dir())
    }

    /// Shard directories of `kind`; empty if the kind has no export
    pub fn shards(&self, kind: ItemKind) -> Result<Vec<Shard>> {
        let kind_root = self.kind_root(kind);
        // Absent means nothing to migrate; anything else must list
        if !kind_root.exists() {
            return Ok(Vec::new());
        }
        Ok(list_subdirs(&kind_root)?
            .into_iter()
            .map(|path| {
                let number = dir_name(&path)
                    .ok()
                    .and_then(IdCodec::parse_digits)
                    .and_then(|n| u32::try_from(n).ok());
                Shard { kind, number, path }
            })
            .collect())
    }
}

/// One shard directory
#[derive(Debug, Clone)]
pub struct Shard {
    /// Kind of items in the shard
    pub kind: ItemKind,
    /// Shard number; `None` if the name is not numeric
    pub number: Option<u32>,
    /// Shard path
    pub path: PathBuf,
}

impl Shard {
    /// Item directories in the shard
    pub fn items(&self) -> Result<Vec<PathBuf>> {
        list_subdirs(&self.path)
    }
}

// ============================================================================
// Items and versions
// ============================================================================

/// Export directory of one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDir {
    /// Legacy id decoded from the directory name
    pub id: ItemId,
    /// Directory path
    pub path: PathBuf,
}

impl ItemDir {
    /// Decode the item id from a zero-padded directory name
    ///
    /// `modules/012/0000012` becomes `m12` (legacy form `m0012`).
    pub fn from_path(kind: ItemKind, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let number = numeric_dir_name(&path)?;
        Ok(ItemDir {
            id: ItemId::new(kind, number),
            path,
        })
    }

    /// Version directories in ascending order
    pub fn versions(&self) -> Result<Vec<VersionDir>> {
        list_subdirs(&self.path)?
            .into_iter()
            .map(|path| {
                let number = numeric_dir_name(&path)?;
                let number = u32::try_from(number).map_err(|_| {
                    MigrationError::invalid_export(&path, "version number out of range")
                })?;
                Ok(VersionDir { number, path })
            })
            .collect()
    }
}

/// Export directory of one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDir {
    /// Legacy version number
    pub number: u32,
    /// Directory path
    pub path: PathBuf,
}

impl VersionDir {
    /// Collection version payload
    pub fn read_collection(&self) -> Result<VersionPayload> {
        Ok(VersionPayload::Collection {
            colxml: read_text(&self.path.join(COLLECTION_BODY_FILE))?,
        })
    }

    /// Module version payload, with the resource list turned into a
    /// resource map document
    pub fn read_module(&self) -> Result<VersionPayload> {
        let cnxml = read_text(&self.path.join(MODULE_BODY_FILE))?;
        let resources_path = self.path.join(MODULE_RESOURCES_FILE);
        let sections = if resources_path.is_file() {
            parse_ini(&read_text(&resources_path)?)
                .map_err(|reason| MigrationError::invalid_export(&resources_path, reason))?
        } else {
            Vec::new()
        };
        let resource_map = resource_map_xml(&sections)
            .map_err(|reason| MigrationError::invalid_export(&resources_path, reason))?;
        Ok(VersionPayload::Module {
            cnxml,
            resource_map,
        })
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Resource file and metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceData {
    /// Original file name
    pub file_name: String,
    /// MIME type, `application/octet-stream` if none was declared
    pub content_type: String,
    /// Payload
    pub data: Vec<u8>,
}

/// Read a resource directory
pub fn read_resource(dir: &ItemDir) -> Result<ResourceData> {
    let props_path = dir.path.join(RESOURCE_PROPERTIES_FILE);
    let props = parse_properties(&read_text(&props_path)?);
    let data_path = dir.path.join(RESOURCE_DATA_FILE);
    let data = fs::read(&data_path).map_err(|e| MigrationError::io(&data_path, e))?;

    let content_type = props
        .get("mime_type")
        .or_else(|| props.get("content_type"))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();
    let file_name = props
        .get("filename")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .unwrap_or(RESOURCE_DATA_FILE)
        .to_string();

    Ok(ResourceData {
        file_name,
        content_type,
        data,
    })
}

// ============================================================================
// File formats
// ============================================================================

/// Parse Java-style `key=value` / `key: value` properties
///
/// Blank lines and lines starting with `#` or `!` are skipped.
pub fn parse_properties(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| {
            let split = line.find(['=', ':'])?;
            Some((
                line[..split].trim().to_string(),
                line[split + 1..].trim().to_string(),
            ))
        })
        .collect()
}

/// One `[name]` section of an INI file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    /// Section name
    pub name: String,
    /// Section keys
    pub values: HashMap<String, String>,
}

/// Parse an INI file; repeated section names are kept as separate sections
pub fn parse_ini(text: &str) -> std::result::Result<Vec<IniSection>, String> {
    let mut sections: Vec<IniSection> = Vec::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(IniSection {
                name: name.trim().to_string(),
                values: HashMap::new(),
            });
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key = value", lineno + 1))?;
        let section = sections
            .last_mut()
            .ok_or_else(|| format!("line {}: key outside of a section", lineno + 1))?;
        section
            .values
            .insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(sections)
}

/// Build the resource map document from `[resource]` sections
pub fn resource_map_xml(sections: &[IniSection]) -> std::result::Result<String, String> {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
         <resources xmlns=\"http://cnx.rice.edu/resourcemapping\" version=\"1.0\">\n",
    );
    for section in sections {
        if section.name != "resource" {
            return Err(format!("unexpected section [{}]", section.name));
        }
        let name = section
            .values
            .get("filename")
            .ok_or("resource section without filename")?;
        let file_id = section
            .values
            .get("fileid")
            .and_then(|id| IdCodec::parse_digits(id))
            .ok_or_else(|| format!("resource {} has no numeric fileid", name))?;
        let resource_id = ItemId::new(ItemKind::Resource, file_id).legacy();

        xml.push_str(&format!("  <resource name=\"{}\">\n", escape_xml(name)));
        xml.push_str("    <locationInformation>\n      <repository>\n");
        xml.push_str(&format!(
            "        <repositoryId>{}</repositoryId>\n",
            RESOURCE_MAP_REPOSITORY_ID
        ));
        xml.push_str(&format!("        <resourceId>{}</resourceId>\n", resource_id));
        xml.push_str("      </repository>\n    </locationInformation>\n  </resource>\n");
    }
    xml.push_str("</resources>\n");
    Ok(xml)
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

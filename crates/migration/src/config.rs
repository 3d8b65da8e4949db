//! Migration run configuration via `migration.toml`
//!
//! Every field has a default, so an empty file runs a full migration of
//! `./data` with the legacy throttling values.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cnxrepo_core::ItemKind;
use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};

/// Highest shard directory number in a legacy export
pub const MAX_SHARD: u32 = 999;

/// How a version directory after a takedown gap is numbered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Keep the legacy number; the skipped numbers stay absent
    #[default]
    PreserveHoles,
    /// Renumber sequentially; the store sees no holes
    Compact,
}

impl fmt::Display for GapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GapPolicy::PreserveHoles => write!(f, "preserve_holes"),
            GapPolicy::Compact => write!(f, "compact"),
        }
    }
}

/// Migration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Root of the legacy export
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Attempts per step before the item fails
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause after a failed attempt
    #[serde(default = "default_failure_delay_ms")]
    pub failure_delay_ms: u64,
    /// Pause before each version append
    #[serde(default = "default_transaction_delay_ms")]
    pub transaction_delay_ms: u64,
    /// Workers for the resource stage
    #[serde(default = "default_resource_threads")]
    pub resource_threads: usize,
    /// Workers for the module stage
    #[serde(default = "default_module_threads")]
    pub module_threads: usize,
    /// Workers for the collection stage
    #[serde(default = "default_collection_threads")]
    pub collection_threads: usize,
    /// Pending items a stage may queue ahead of its workers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Run every stage regardless of the per-kind switches
    #[serde(default = "default_true")]
    pub migrate_all: bool,
    /// Run the resource stage
    #[serde(default)]
    pub migrate_resources: bool,
    /// Run the module stage
    #[serde(default)]
    pub migrate_modules: bool,
    /// Run the collection stage
    #[serde(default)]
    pub migrate_collections: bool,
    /// Lowest shard to process
    #[serde(default)]
    pub min_shard: u32,
    /// Highest shard to process
    #[serde(default = "default_max_shard")]
    pub max_shard: u32,
    /// Numbering of versions after a gap
    #[serde(default)]
    pub gap_policy: GapPolicy,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_attempts() -> u32 {
    10
}

fn default_failure_delay_ms() -> u64 {
    10
}

fn default_transaction_delay_ms() -> u64 {
    1000
}

fn default_resource_threads() -> usize {
    16
}

fn default_module_threads() -> usize {
    16
}

fn default_collection_threads() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    500
}

fn default_true() -> bool {
    true
}

fn default_max_shard() -> u32 {
    MAX_SHARD
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            data_root: default_data_root(),
            max_attempts: default_max_attempts(),
            failure_delay_ms: default_failure_delay_ms(),
            transaction_delay_ms: default_transaction_delay_ms(),
            resource_threads: default_resource_threads(),
            module_threads: default_module_threads(),
            collection_threads: default_collection_threads(),
            queue_capacity: default_queue_capacity(),
            migrate_all: true,
            migrate_resources: false,
            migrate_modules: false,
            migrate_collections: false,
            min_shard: 0,
            max_shard: MAX_SHARD,
            gap_policy: GapPolicy::default(),
        }
    }
}

impl MigrationConfig {
    /// Config for an export rooted at `data_root`, without delays
    ///
    /// Handy for tests and small local imports.
    pub fn unthrottled(data_root: impl Into<PathBuf>) -> Self {
        MigrationConfig {
            data_root: data_root.into(),
            failure_delay_ms: 0,
            transaction_delay_ms: 0,
            ..Default::default()
        }
    }

    /// Whether the stage for `kind` runs
    pub fn should_migrate(&self, kind: ItemKind) -> bool {
        self.migrate_all
            || match kind {
                ItemKind::Resource => self.migrate_resources,
                ItemKind::Module => self.migrate_modules,
                ItemKind::Collection => self.migrate_collections,
            }
    }

    /// Worker count for the stage of `kind`
    pub fn threads(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::Resource => self.resource_threads,
            ItemKind::Module => self.module_threads,
            ItemKind::Collection => self.collection_threads,
        }
    }

    /// Whether shard number `shard` is inside `min_shard..=max_shard`
    pub fn shard_selected(&self, shard: u32) -> bool {
        (self.min_shard..=self.max_shard).contains(&shard)
    }

    /// Pause after a failed attempt
    pub fn failure_delay(&self) -> Duration {
        Duration::from_millis(self.failure_delay_ms)
    }

    /// Pause before each version append
    pub fn transaction_delay(&self) -> Duration {
        Duration::from_millis(self.transaction_delay_ms)
    }

    /// Check value constraints
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            return Err(MigrationError::Config(
                "max_attempts must be at least 1".into(),
            ));
        }
        for kind in ItemKind::ALL {
            if self.threads(kind) == 0 {
                return Err(MigrationError::Config(format!(
                    "{}_threads must be at least 1",
                    kind
                )));
            }
        }
        if self.queue_capacity == 0 {
            return Err(MigrationError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_shard > MAX_SHARD || self.min_shard > self.max_shard {
            return Err(MigrationError::Config(format!(
                "shard range {}..={} must lie within 0..={}",
                self.min_shard, self.max_shard, MAX_SHARD
            )));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# CNX legacy export migration
data_root = "data"

# Retry and throttling
max_attempts = 10
failure_delay_ms = 10
transaction_delay_ms = 1000

# Worker pools, one per stage
resource_threads = 16
module_threads = 16
collection_threads = 8
queue_capacity = 500

# Stages. migrate_all overrides the per-kind switches.
migrate_all = true
migrate_resources = false
migrate_modules = false
migrate_collections = false

# Shard filter, inclusive
min_shard = 0
max_shard = 999

# "preserve_holes" keeps legacy version numbers, "compact" renumbers
gap_policy = "preserve_holes"
"#
    }

    /// Parse and validate config text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MigrationConfig = toml::from_str(content)
            .map_err(|e| MigrationError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| MigrationError::io(path, e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            MigrationError::Config(message) => {
                MigrationError::Config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }
}

const DOTS_WIDTH: usize = 24;

fn dotted_line(f: &mut fmt::Formatter<'_>, name: &str, value: &dyn fmt::Display) -> fmt::Result {
    let dots = DOTS_WIDTH.saturating_sub(name.len()).max(3);
    writeln!(f, "  {} {} [{}]", name, ".".repeat(dots), value)
}

impl fmt::Display for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dotted_line(f, "data_root", &self.data_root.display())?;
        dotted_line(f, "max_attempts", &self.max_attempts)?;
        dotted_line(f, "failure_delay_ms", &self.failure_delay_ms)?;
        dotted_line(f, "transaction_delay_ms", &self.transaction_delay_ms)?;
        dotted_line(f, "resource_threads", &self.resource_threads)?;
        dotted_line(f, "module_threads", &self.module_threads)?;
        dotted_line(f, "collection_threads", &self.collection_threads)?;
        dotted_line(f, "queue_capacity", &self.queue_capacity)?;
        dotted_line(f, "migrate_all", &self.migrate_all)?;
        dotted_line(f, "migrate_resources", &self.migrate_resources)?;
        dotted_line(f, "migrate_modules", &self.migrate_modules)?;
        dotted_line(f, "migrate_collections", &self.migrate_collections)?;
        dotted_line(f, "min_shard", &self.min_shard)?;
        dotted_line(f, "max_shard", &self.max_shard)?;
        dotted_line(f, "gap_policy", &self.gap_policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_valid() {
        let config = MigrationConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.queue_capacity, 500);
        assert_eq!(config.gap_policy, GapPolicy::PreserveHoles);
        assert!(config.validate().is_ok());
        assert!(config.should_migrate(ItemKind::Module));
    }

    #[test]
    fn test_default_toml_matches_default() {
        let parsed = MigrationConfig::from_toml_str(MigrationConfig::default_toml()).unwrap();
        assert_eq!(parsed, MigrationConfig::default());
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            MigrationConfig::from_toml_str("").unwrap(),
            MigrationConfig::default()
        );
    }

    #[test]
    fn test_stage_switches() {
        let config = MigrationConfig::from_toml_str(
            "migrate_all = false\nmigrate_modules = true\ngap_policy = \"compact\"\n",
        )
        .unwrap();
        assert!(config.should_migrate(ItemKind::Module));
        assert!(!config.should_migrate(ItemKind::Resource));
        assert!(!config.should_migrate(ItemKind::Collection));
        assert_eq!(config.gap_policy, GapPolicy::Compact);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = MigrationConfig::from_toml_str("max_attempts = 0").unwrap_err();
        assert!(matches!(err, MigrationError::Config(_)));
    }

    #[test]
    fn test_bad_shard_range_rejected() {
        assert!(MigrationConfig::from_toml_str("min_shard = 5\nmax_shard = 4").is_err());
        assert!(MigrationConfig::from_toml_str("max_shard = 1000").is_err());
    }

    #[test]
    fn test_shard_selected() {
        let mut config = MigrationConfig::default();
        config.min_shard = 10;
        config.max_shard = 12;
        assert!(!config.shard_selected(9));
        assert!(config.shard_selected(10));
        assert!(config.shard_selected(12));
        assert!(!config.shard_selected(13));
    }

    #[test]
    fn test_from_file_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("migration.toml");
        std::fs::write(&path, "max_attempts = 0").unwrap();
        let msg = MigrationConfig::from_file(&path).unwrap_err().to_string();
        assert!(msg.contains("migration.toml"));

        let missing = MigrationConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, MigrationError::Io { .. }));
    }

    #[test]
    fn test_display_is_aligned_table() {
        let text = MigrationConfig::default().to_string();
        assert!(text.contains("  max_attempts ............ [10]"));
        let bracket_columns: Vec<usize> = text
            .lines()
            .map(|l| l.find('[').unwrap())
            .collect();
        assert!(bracket_columns.windows(2).all(|w| w[0] == w[1]));
    }
}

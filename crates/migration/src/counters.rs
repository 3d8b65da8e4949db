//! Named migration counters
//!
//! Counters are created on first increment. Workers of every stage update
//! them concurrently, so the set is a sharded concurrent map rather than a
//! single lock.

use std::fmt;

use cnxrepo_core::ItemKind;
use dashmap::DashMap;

/// Content type recorded when the legacy metadata declares none
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Per-kind counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Items started
    Items,
    /// Versions started
    Versions,
    /// Runs of missing version directories
    VersionGaps,
    /// Version numbers missing from the export
    VersionTakedowns,
    /// Items whose creation needed at least one retry
    ItemsWithCreationRetries,
    /// Creation retries
    CreationRetries,
    /// Versions (or resource uploads) that needed at least one retry
    VersionsWithUploadRetries,
    /// Version append (or resource upload) retries
    VersionUploadRetries,
    /// Items that failed
    ItemsFailed,
    /// Shard directories processed
    ShardsProcessed,
    /// Shard directories skipped by the shard filter
    ShardsIgnored,
}

impl Counter {
    /// Counter name for `kind`, e.g. `MODULE_VERSION_GAPS`
    pub fn name(self, kind: ItemKind) -> String {
        let stem = kind.counter_stem();
        match self {
            Counter::Items => format!("{}S", stem),
            Counter::Versions => format!("{}_VERSIONS", stem),
            Counter::VersionGaps => format!("{}_VERSION_GAPS", stem),
            Counter::VersionTakedowns => format!("{}_VERSION_TAKEDOWNS", stem),
            Counter::ItemsWithCreationRetries => format!("{}S_WITH_CREATION_RETRIES", stem),
            Counter::CreationRetries => format!("{}_CREATION_RETRIES", stem),
            Counter::VersionsWithUploadRetries => {
                format!("{}_VERSIONS_WITH_UPLOAD_RETRIES", stem)
            }
            Counter::VersionUploadRetries => format!("{}_VERSION_UPLOAD_RETRIES", stem),
            Counter::ItemsFailed => format!("{}S_FAILED", stem),
            Counter::ShardsProcessed => format!("{}_SHARDS_PROCESSED", stem),
            Counter::ShardsIgnored => format!("{}_SHARDS_IGNORED", stem),
        }
    }
}

/// Name of the per-content-type resource counter
pub fn content_type_counter(content_type: &str) -> String {
    let content_type = if content_type.trim().is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        content_type.trim()
    };
    format!("RESOURCE_CONTENT_TYPE[{}]", content_type)
}

/// Concurrent set of named counters
#[derive(Debug, Default)]
pub struct CounterSet {
    counters: DashMap<String, u64>,
}

impl CounterSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to `name`, creating it at zero first if needed
    pub fn increment(&self, name: &str, delta: u64) {
        if let Some(mut count) = self.counters.get_mut(name) {
            *count += delta;
            return;
        }
        *self.counters.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Add `delta` to a per-kind counter
    pub fn increment_kind(&self, counter: Counter, kind: ItemKind, delta: u64) {
        self.increment(&counter.name(kind), delta);
    }

    /// Current value; zero if never incremented
    pub fn get(&self, name: &str) -> u64 {
        self.counters.get(name).map(|c| *c).unwrap_or(0)
    }

    /// Current value of a per-kind counter
    pub fn get_kind(&self, counter: Counter, kind: ItemKind) -> u64 {
        self.get(&counter.name(kind))
    }

    /// All counters sorted by name, ignoring case
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| {
            a.0.to_lowercase()
                .cmp(&b.0.to_lowercase())
                .then_with(|| a.0.cmp(&b.0))
        });
        entries
    }
}

/// Render counters as `NAME ..... [       n]` lines with aligned brackets
pub fn render_counters(f: &mut fmt::Formatter<'_>, counters: &[(String, u64)]) -> fmt::Result {
    let width = counters.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, value) in counters {
        let dots = ".".repeat(width - name.len() + 3);
        writeln!(f, "  {} {} [{:>8}]", name, dots, value)?;
    }
    Ok(())
}

impl fmt::Display for CounterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_counters(f, &self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counter_names() {
        assert_eq!(Counter::Items.name(ItemKind::Module), "MODULES");
        assert_eq!(
            Counter::VersionTakedowns.name(ItemKind::Collection),
            "COLLECTION_VERSION_TAKEDOWNS"
        );
        assert_eq!(
            Counter::ItemsWithCreationRetries.name(ItemKind::Resource),
            "RESOURCES_WITH_CREATION_RETRIES"
        );
    }

    #[test]
    fn test_content_type_default() {
        assert_eq!(
            content_type_counter(""),
            "RESOURCE_CONTENT_TYPE[application/octet-stream]"
        );
        assert_eq!(
            content_type_counter("image/png"),
            "RESOURCE_CONTENT_TYPE[image/png]"
        );
    }

    #[test]
    fn test_increment_and_get() {
        let counters = CounterSet::new();
        assert_eq!(counters.get("MODULES"), 0);
        counters.increment("MODULES", 1);
        counters.increment("MODULES", 2);
        counters.increment_kind(Counter::Items, ItemKind::Module, 1);
        assert_eq!(counters.get_kind(Counter::Items, ItemKind::Module), 4);
    }

    #[test]
    fn test_concurrent_increments_not_lost() {
        let counters = Arc::new(CounterSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = Arc::clone(&counters);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        counters.increment("HITS", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.get("HITS"), 8000);
    }

    #[test]
    fn test_snapshot_case_insensitive_order() {
        let counters = CounterSet::new();
        counters.increment("b", 1);
        counters.increment("A", 1);
        counters.increment("C", 1);
        let names: Vec<String> = counters.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "b", "C"]);
    }

    #[test]
    fn test_display_aligned() {
        let counters = CounterSet::new();
        counters.increment("MODULES", 3);
        counters.increment("MODULE_VERSIONS", 12);
        let text = counters.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  MODULES "));
        assert!(lines[0].ends_with("[       3]"));
        assert_eq!(lines[0].len(), lines[1].len());
    }
}

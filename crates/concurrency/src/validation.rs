//! Transaction validation for OCC
//!
//! Rules:
//! - First-committer-wins based on the READ-SET, not the write-set
//! - Blind writes (write without read) do NOT conflict
//! - A key read as absent (version 0) conflicts if it was created since

use cnxrepo_core::{Key, Result, Storage};
use rustc_hash::FxHashMap;

/// Types of conflicts that can occur during transaction validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Key was read at one version but its current version differs
    ReadWriteConflict {
        /// The key that has a conflict
        key: Key,
        /// Version recorded in read_set when read
        read_version: u64,
        /// Current version in storage at validation time
        current_version: u64,
    },
}

/// Result of validating a transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    /// Conflicts found, empty when valid
    pub conflicts: Vec<ConflictType>,
}

impl ValidationResult {
    /// A passing result
    pub fn ok() -> Self {
        Self::default()
    }

    /// A result carrying one conflict
    pub fn conflict(conflict: ConflictType) -> Self {
        ValidationResult {
            conflicts: vec![conflict],
        }
    }

    /// Whether no conflicts were found
    pub fn is_valid(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Merge another result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        self.conflicts.extend(other.conflicts);
    }

    /// Number of conflicts
    pub fn conflict_count(&self) -> usize {
        self.conflicts.len()
    }

    /// Short description of the first conflict, for abort reasons
    pub fn describe(&self) -> String {
        match self.conflicts.first() {
            None => "no conflicts".to_string(),
            Some(ConflictType::ReadWriteConflict {
                key,
                read_version,
                current_version,
            }) => format!(
                "{} conflict(s), first on {} (read at {}, now {})",
                self.conflicts.len(),
                key,
                read_version,
                current_version
            ),
        }
    }
}

/// Check every read-set entry against the store's current versions
pub fn validate_read_set<S: Storage + ?Sized>(
    read_set: &FxHashMap<Key, u64>,
    store: &S,
) -> Result<ValidationResult> {
    let mut result = ValidationResult::ok();
    for (key, &read_version) in read_set {
        let current_version = store.version_of(key)?;
        if current_version != read_version {
            result.merge(ValidationResult::conflict(ConflictType::ReadWriteConflict {
                key: key.clone(),
                read_version,
                current_version,
            }));
        }
    }
    Ok(result)
}

//! Testing utilities for failure handling
//!
//! - **FaultInjectingStore**: wraps any `Storage` and fails a scripted number
//!   of batch commits with a transient `Storage` error, so retry paths in
//!   upper layers can be exercised deterministically.
//!
//! # Example
//!
//! ```ignore
//! use cnxrepo_storage::{testing::FaultInjectingStore, MemoryStore};
//!
//! let store = FaultInjectingStore::new(MemoryStore::new());
//! store.fail_next_commits(2);
//! ```

mod fault;

pub use fault::FaultInjectingStore;

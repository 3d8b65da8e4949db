//! Optimistic transactions over the Storage trait
//!
//! This crate provides:
//! - TransactionContext: buffered writes with read-your-writes and a read set
//! - TransactionState: the full commit/rollback state machine
//! - validation: first-committer-wins read-set validation
//! - TransactionManager: serialized validate-and-apply commit
//!
//! Reads go to the live store and record the commit version they observed.
//! Commit re-checks those versions; any change aborts the transaction.
//! Writes are invisible to others until the whole batch is applied.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;
pub mod validation;

pub use manager::{TransactionManager, TransactionStats};
pub use transaction::{CommitError, TransactionContext, TransactionState};
pub use validation::{validate_read_set, ConflictType, ValidationResult};

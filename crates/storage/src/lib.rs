//! Storage layer for the content repository
//!
//! This crate implements the reference backend for the `Storage` trait:
//! - MemoryStore: BTreeMap-based storage under a RwLock
//! - IdAllocator: per-kind auto-assignment with reserved ranges
//! - Commit versions with AtomicU64
//! - testing: fault injection wrapper for retry tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod memory;
pub mod testing;

pub use allocator::IdAllocator;
pub use memory::MemoryStore;

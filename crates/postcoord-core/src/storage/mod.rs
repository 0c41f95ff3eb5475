//! # Persistent Storage
//!
//! Disk-backed implementations of `ExpressionStore`.

pub mod redb_store;

pub use redb_store::{RedbCommit, RedbStore};

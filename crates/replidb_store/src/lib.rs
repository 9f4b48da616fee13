//! # RepliDB Store
//!
//! The transactional key-value interface RepliDB consumes.
//!
//! RepliDB does not implement its own storage engine. It expects a store
//! giving per-transaction atomicity, ordered range scans, and a single
//! writer at a time. This crate defines that boundary ([`KvStore`],
//! [`ReadTxn`], [`WriteTxn`], [`ScanRange`]) and ships [`InMemoryStore`],
//! a `BTreeMap`-backed implementation used by tests and embedded
//! deployments. Production deployments plug a persistent engine in
//! behind the same traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod txn;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use txn::{KvStore, ReadTxn, ScanRange, WriteTxn};

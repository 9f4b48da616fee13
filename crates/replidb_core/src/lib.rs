//! # RepliDB Core
//!
//! The operation-log data model and apply engine for RepliDB.
//!
//! Each replica keeps an append-only log of operations keyed by a
//! locally-assigned monotonic sequence number (the *local clock*).
//! Operations carry the id of their originating replica and that
//! replica's own sequence number (the *origin clock*), so any replica can
//! deduplicate replayed operations and resume a peer stream from an
//! arbitrary point.
//!
//! Conflicting concurrent edits are resolved per operation kind: any two
//! replicas holding the same set of operations for a document converge to
//! the same state regardless of arrival order.
//!
//! This crate provides:
//! - The operation record and its payload kinds ([`Op`], [`OpPayload`])
//!   with bit-exact encoding and per-kind merge/integrate/unintegrate
//! - The log store and its secondary indexes over a [`replidb_store`]
//!   transaction
//! - The causal clock tracker used for dedup and resumable streaming
//! - The apply engine ([`Replica`]) that admits local and remote batches
//! - The authorization gate filtering remote operations
//! - The ordered event buffer ([`OrderedEvents`]) releasing applied
//!   operations in strict local-clock order
//! - Tree queries over the parent/child index
//!
//! ## Key invariants
//!
//! - `local_clock` is assigned exactly once, at durable append, and never
//!   reused
//! - Merging the full history of a (owner, collection, doc, kind) stream
//!   yields the same result regardless of arrival order
//! - Compaction is idempotent: merging the merge result alone reproduces
//!   the merge result
//! - Observers see operations exactly once, strictly increasing by
//!   `local_clock`, with no gaps

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod apply;
mod clocks;
mod crdt;
mod error;
mod events;
mod keys;
mod log;
mod op;
mod tree;
mod types;

pub use access::AccessGate;
pub use apply::{ApplyOutcome, RemoteBatch, Replica};
pub use clocks::{ClockEntry, ClockScope, ClockTracker};
pub use crdt::{CrdtMerge, DeltaConcat};
pub use error::{CoreError, CoreResult};
pub use events::{OpEvent, OrderedEvents};
pub use log::{OpBatch, OpLog};
pub use op::{Op, OpKind, OpPayload};
pub use tree::{ChildEntry, MAX_TREE_DEPTH};
pub use types::{AccessLevel, ClientId, OwnerId, Scope, UserHash, WILDCARD_DOC};

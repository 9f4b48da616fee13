//! # RepliDB Testkit
//!
//! Shared test utilities: session fixtures over the in-memory store
//! and proptest generators for log operations. Used by the integration
//! tests across the workspace; not part of the public API surface.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;

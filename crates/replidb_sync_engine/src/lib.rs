//! # RepliDB Sync Engine
//!
//! The per-connection protocol state machine: mutual challenge
//! authentication, op streaming with resume points and byte-budgeted
//! flow control, live tailing of the replica's event buffer, and
//! reconnect supervision with bounded exponential backoff.
//!
//! The entry point is [`Session`], which bundles a replica with the
//! identity it presents to peers. [`Session::connect`] prepares a
//! [`Connection`] over any [`Duplex`] transport; [`Connection::run`]
//! drives it to completion. [`Reconnector`] wraps the whole thing in a
//! retry loop for long-lived links.
//!
//! ```no_run
//! # use replidb_sync_engine::*;
//! # use replidb_core::{AccessGate, DeltaConcat};
//! # use replidb_identity::{DeviceIdentity, UserIdentity};
//! # use replidb_store::InMemoryStore;
//! # use std::sync::Arc;
//! # async fn demo() -> SyncResult<()> {
//! let session = Session::open(
//!     InMemoryStore::new(),
//!     UserIdentity::generate(),
//!     DeviceIdentity::generate(),
//!     AccessGate::default(),
//!     Arc::new(DeltaConcat),
//!     SyncConfig::default(),
//! )?;
//! let (here, there) = duplex_pair(64);
//! # let _ = there;
//! let connection = session.connect(here);
//! let progress = connection.progress();
//! tokio::spawn(connection.run());
//! progress.synced(None).await.ok();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod handshake;
mod reconnect;
mod session;
mod transport;

pub use config::{RetryConfig, SyncConfig};
pub use connection::{Connection, SyncProgress};
pub use error::{SyncError, SyncResult};
pub use handshake::{Handshake, LocalIdentity, PeerIdentity};
pub use reconnect::{ConnectionStatus, Reconnector};
pub use session::Session;
pub use transport::{duplex_pair, ChannelTransport, Duplex, MockTransport};

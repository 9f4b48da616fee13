//! The per-process sync context.
//!
//! Everything a process needs to participate in replication lives in
//! one [`Session`]: the replica over its store, the user and device
//! keys, the client id, and the sync configuration. There is no global
//! state; two sessions in one process are fully independent.

use crate::config::SyncConfig;
use crate::connection::Connection;
use crate::error::SyncResult;
use crate::handshake::LocalIdentity;
use crate::transport::Duplex;
use replidb_core::{AccessGate, ClientId, CrdtMerge, Replica, Scope, UserHash};
use replidb_identity::{DeviceIdentity, UserIdentity};
use replidb_store::KvStore;
use std::sync::Arc;

/// One replica plus the identity it presents to peers.
pub struct Session<S: KvStore> {
    replica: Arc<Replica<S>>,
    identity: Arc<LocalIdentity>,
    config: SyncConfig,
}

impl<S: KvStore> Session<S> {
    /// Opens a session with a random client id.
    pub fn open(
        store: S,
        user: UserIdentity,
        device: DeviceIdentity,
        gate: AccessGate,
        crdt: Arc<dyn CrdtMerge>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        Self::open_with_client(
            store,
            ClientId::new(rand::random()),
            user,
            device,
            gate,
            crdt,
            config,
        )
    }

    /// Opens a session with a fixed client id, for replicas whose id
    /// must survive restarts.
    pub fn open_with_client(
        store: S,
        client: ClientId,
        user: UserIdentity,
        device: DeviceIdentity,
        gate: AccessGate,
        crdt: Arc<dyn CrdtMerge>,
        config: SyncConfig,
    ) -> SyncResult<Self> {
        let replica = Arc::new(Replica::open(store, client, gate, crdt)?);
        let identity = Arc::new(LocalIdentity::new(client, user, device));
        Ok(Self {
            replica,
            identity,
            config,
        })
    }

    /// This session's client id.
    #[must_use]
    pub fn client(&self) -> ClientId {
        self.identity.client
    }

    /// Hash of this session's user key.
    #[must_use]
    pub fn user_hash(&self) -> UserHash {
        self.identity.user_hash()
    }

    /// The scope rooted at this session's own user, for the given
    /// collection.
    #[must_use]
    pub fn own_scope(&self, collection: impl Into<String>) -> Scope {
        Scope::new(self.identity.user.key().owner_id(), collection)
    }

    /// The replica, for local writes and queries.
    #[must_use]
    pub fn replica(&self) -> &Arc<Replica<S>> {
        &self.replica
    }

    /// The identity presented during handshakes.
    #[must_use]
    pub fn identity(&self) -> &Arc<LocalIdentity> {
        &self.identity
    }

    /// The sync configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Prepares a connection to one peer over `transport`.
    #[must_use]
    pub fn connect<T: Duplex>(&self, transport: T) -> Connection<S, T> {
        Connection::new(
            Arc::clone(&self.replica),
            Arc::clone(&self.identity),
            self.config.clone(),
            transport,
        )
    }
}

impl<S: KvStore> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.identity.client)
            .field("user", &self.user_hash())
            .finish_non_exhaustive()
    }
}

//! One authenticated peer connection.
//!
//! [`Connection::run`] drives the whole lifecycle on the calling task:
//! handshake, then catch-up streaming of every scope the peer requests,
//! then live tailing of the replica's event buffer. Inbound `Ops` go
//! through the apply engine; a causality gap, a protocol violation, or
//! a failed signature destroys the connection instead of patching
//! around it.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::handshake::{Handshake, LocalIdentity, PeerIdentity};
use crate::reconnect::ConnectionStatus;
use crate::transport::Duplex;
use parking_lot::Mutex;
use replidb_core::{OpEvent, OpKind, OpPayload, RemoteBatch, Replica, Scope};
use replidb_store::KvStore;
use replidb_sync_protocol::{Message, OpsFrame};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Progress of catch-up per stream, shared with observers of the
/// connection.
///
/// A stream is synced once the peer sent its `Synced`/`SyncedAll`
/// marker; live tailing keeps it synced from then on.
#[derive(Debug, Clone, Default)]
pub struct SyncProgress {
    inner: Arc<Mutex<ProgressInner>>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    synced: BTreeSet<Option<Scope>>,
    waiters: Vec<(Option<Scope>, oneshot::Sender<()>)>,
}

impl SyncProgress {
    /// True once the peer declared the stream caught up.
    #[must_use]
    pub fn is_synced(&self, scope: Option<&Scope>) -> bool {
        self.inner.lock().synced.contains(&scope.cloned())
    }

    /// Fires once when the stream reaches its first `Synced` marker,
    /// immediately if it already did.
    #[must_use]
    pub fn synced(&self, scope: Option<Scope>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if inner.synced.contains(&scope) {
            let _ = tx.send(());
        } else {
            inner.waiters.push((scope, tx));
        }
        rx
    }

    fn mark(&self, scope: Option<Scope>) {
        let mut inner = self.inner.lock();
        inner.synced.insert(scope.clone());
        let waiters = std::mem::take(&mut inner.waiters);
        for (wanted, tx) in waiters {
            if wanted == scope {
                let _ = tx.send(());
            } else {
                inner.waiters.push((wanted, tx));
            }
        }
    }
}

/// Outbound position for one stream the peer requested.
#[derive(Debug)]
struct StreamState {
    /// Next local clock to send.
    next: u64,
    /// Reached the log head; forwarding events as they apply.
    live: bool,
}

/// A single peer connection over a [`Duplex`] transport.
pub struct Connection<S: KvStore, T: Duplex> {
    replica: Arc<Replica<S>>,
    transport: T,
    local: Arc<LocalIdentity>,
    config: SyncConfig,
    handshake: Handshake,
    hello: Option<Message>,
    outbound: BTreeMap<Option<Scope>, StreamState>,
    interests: Vec<Option<Scope>>,
    rerequested: BTreeSet<Scope>,
    events: mpsc::Receiver<OpEvent>,
    progress: SyncProgress,
    status: Option<watch::Sender<ConnectionStatus>>,
    shutdown: watch::Receiver<bool>,
    _shutdown_guard: Option<watch::Sender<bool>>,
}

impl<S: KvStore, T: Duplex> Connection<S, T> {
    /// Prepares a connection over `transport`. By default the global
    /// stream is requested from the peer once authenticated.
    #[must_use]
    pub fn new(
        replica: Arc<Replica<S>>,
        local: Arc<LocalIdentity>,
        config: SyncConfig,
        transport: T,
    ) -> Self {
        let (handshake, hello) = Handshake::initiate(&local);
        let events = replica.subscribe(config.event_buffer);
        let (guard, shutdown) = watch::channel(false);
        Self {
            replica,
            transport,
            local,
            config,
            handshake,
            hello: Some(hello),
            outbound: BTreeMap::new(),
            interests: vec![None],
            rerequested: BTreeSet::new(),
            events,
            progress: SyncProgress::default(),
            status: None,
            shutdown,
            _shutdown_guard: Some(guard),
        }
    }

    /// Requests only the given scopes from the peer instead of the
    /// global stream.
    #[must_use]
    pub fn with_scopes(mut self, scopes: impl IntoIterator<Item = Scope>) -> Self {
        self.interests = scopes.into_iter().map(Some).collect();
        self
    }

    /// Reports lifecycle transitions on `status` (set to `Connected`
    /// once authentication completes).
    #[must_use]
    pub fn with_status(mut self, status: watch::Sender<ConnectionStatus>) -> Self {
        self.status = Some(status);
        self
    }

    /// Stops the connection cleanly when `shutdown` turns true.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self._shutdown_guard = None;
        self
    }

    /// Handle to observe catch-up progress, usable after `run` consumes
    /// the connection.
    #[must_use]
    pub fn progress(&self) -> SyncProgress {
        self.progress.clone()
    }

    /// Drives the connection until the peer disconnects, a fatal error
    /// occurs, or shutdown is signalled.
    pub async fn run(mut self) -> SyncResult<()> {
        if let Some(hello) = self.hello.take() {
            self.transport.send(hello).await?;
        }
        // The watch guard must not be held across the other arms'
        // awaits, so the wait runs on a local receiver and resolves to
        // a plain unit.
        let mut shutdown = self.shutdown.clone();
        loop {
            let authenticated = self.handshake.is_authenticated();
            let pump_ready = authenticated && self.outbound.values().any(|s| !s.live);
            let any_live = authenticated && self.outbound.values().any(|s| s.live);
            tokio::select! {
                biased;
                () = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                    tracing::debug!("connection cancelled");
                    return Ok(());
                }
                message = self.transport.recv() => match message? {
                    Some(message) => self.handle_message(message).await?,
                    None => return Err(SyncError::ConnectionClosed),
                },
                event = self.events.recv(), if any_live => {
                    let event = event.ok_or(SyncError::EventLag)?;
                    self.forward_event(event).await?;
                }
                () = std::future::ready(()), if pump_ready => {
                    self.pump_one().await?;
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> SyncResult<()> {
        if !self.handshake.is_authenticated() {
            match message {
                Message::Info(info) => {
                    let auto_register = self.config.auto_register;
                    let own_user = self.local.user_hash();
                    let gate = self.replica.gate();
                    let answer = self.handshake.on_info(&self.local, &info, |user| {
                        auto_register || *user == own_user || gate.is_trusted(user)
                    })?;
                    self.transport.send(answer).await?;
                }
                Message::ChallengeAnswer { token } => self.handshake.on_answer(&token)?,
                other => {
                    return Err(SyncError::OutOfOrderMessage {
                        message: other.name(),
                        state: self.handshake.state(),
                    })
                }
            }
            if self.handshake.is_authenticated() {
                self.on_authenticated().await?;
            }
            return Ok(());
        }

        match message {
            Message::Ops(frame) => self.apply_frame(frame).await?,
            Message::RequestOps { scope, from } => {
                tracing::debug!(from, scoped = scope.is_some(), "peer requested ops");
                self.outbound.insert(
                    scope,
                    StreamState {
                        next: from.max(1),
                        live: false,
                    },
                );
            }
            Message::Synced { scope, clock } => self.on_synced(Some(scope), clock)?,
            Message::SyncedAll { clock } => self.on_synced(None, clock)?,
            other @ (Message::Info(_) | Message::ChallengeAnswer { .. }) => {
                return Err(SyncError::OutOfOrderMessage {
                    message: other.name(),
                    state: self.handshake.state(),
                })
            }
        }
        Ok(())
    }

    async fn on_authenticated(&mut self) -> SyncResult<()> {
        let peer = self.authenticated_peer()?;
        tracing::info!(peer = %peer.client, "peer authenticated");
        if let Some(status) = &self.status {
            status.send_replace(ConnectionStatus::Connected);
        }
        for scope in self.interests.clone() {
            let from = self.replica.frontier(peer.client, scope.as_ref())? + 1;
            self.transport
                .send(Message::RequestOps { scope, from })
                .await?;
        }
        Ok(())
    }

    async fn apply_frame(&mut self, frame: OpsFrame) -> SyncResult<()> {
        let peer = self.authenticated_peer()?;
        let batch = RemoteBatch {
            ops: frame.ops,
            start_clock: frame.start_clock,
            end_clock: frame.end_clock,
        };
        let outcome = self.replica.apply_remote_ops(
            &batch,
            peer.client,
            frame.scope.as_ref(),
            Some(&peer.user_hash),
        )?;

        // A grant may unlock content we only hold as placeholders; pull
        // the affected scope again from the beginning. Overlap dedups.
        for scope in outcome.perm_changed {
            if self.rerequested.contains(&scope) {
                continue;
            }
            if self.replica.pending_docs(&scope)?.is_empty() {
                continue;
            }
            tracing::debug!(collection = %scope.collection, "permissions changed; re-requesting scope");
            self.rerequested.insert(scope.clone());
            self.transport
                .send(Message::RequestOps {
                    scope: Some(scope),
                    from: 1,
                })
                .await?;
        }
        Ok(())
    }

    fn on_synced(&mut self, scope: Option<Scope>, clock: u64) -> SyncResult<()> {
        tracing::debug!(?scope, clock, "peer reached log head");
        if let Some(scope) = &scope {
            if self.rerequested.remove(scope) {
                let resolved = self.replica.resolve_pending(scope)?;
                if !resolved.is_empty() {
                    tracing::debug!(count = resolved.len(), "resolved pending docs");
                }
            }
        }
        self.progress.mark(scope);
        Ok(())
    }

    /// Streams one batch for the first stream still catching up. When a
    /// stream reaches the head it goes live and the sync marker is sent.
    async fn pump_one(&mut self) -> SyncResult<()> {
        let peer = self.authenticated_peer()?;
        let Some(scope) = self
            .outbound
            .iter()
            .find(|(_, state)| !state.live)
            .map(|(scope, _)| scope.clone())
        else {
            return Ok(());
        };
        let Some(next) = self.outbound.get(&scope).map(|state| state.next) else {
            return Ok(());
        };

        let batch = self.replica.ops_since(
            scope.as_ref(),
            next,
            peer.client,
            Some(&peer.user_hash),
            self.config.batch_ops,
            self.config.batch_bytes,
        )?;

        if batch.is_empty() {
            if let Some(state) = self.outbound.get_mut(&scope) {
                state.live = true;
            }
            let clock = next.saturating_sub(1);
            let marker = match scope {
                Some(scope) => Message::Synced { scope, clock },
                None => Message::SyncedAll { clock },
            };
            self.transport.send(marker).await?;
            return Ok(());
        }

        let end = batch.end_clock;
        if let Some(state) = self.outbound.get_mut(&scope) {
            state.next = end + 1;
        }
        self.transport
            .send(Message::Ops(OpsFrame {
                scope,
                start_clock: batch.start_clock,
                end_clock: end,
                ops: batch.ops,
            }))
            .await?;
        Ok(())
    }

    /// Forwards one applied operation to every live stream it falls in.
    ///
    /// Echoes of the peer's own operations still consume the covered
    /// range, as an empty frame, so the peer's resume point never sees
    /// a gap.
    async fn forward_event(&mut self, event: OpEvent) -> SyncResult<()> {
        let peer = self.authenticated_peer()?;
        let op_scope = Scope::new(event.op.owner, event.op.collection.clone());
        let reveals = matches!(
            event.op.kind(),
            OpKind::CrdtUpdate | OpKind::Lww | OpKind::ChildOf
        );
        let readable =
            !reveals || self.replica.can_read(&peer.user_hash, &op_scope, &event.op.doc)?;

        let mut frames = Vec::new();
        for (scope, state) in self.outbound.iter_mut() {
            if !state.live {
                continue;
            }
            if let Some(scope) = scope {
                if *scope != op_scope {
                    continue;
                }
            }
            if event.op.local_clock < state.next {
                // Already covered by the catch-up pump.
                continue;
            }
            let start = state.next;
            state.next = event.op.local_clock + 1;

            let ops = if event.op.client == peer.client {
                Vec::new()
            } else {
                let mut op = (*event.op).clone();
                if !readable {
                    op.payload = OpPayload::NoPermission;
                }
                vec![op]
            };
            frames.push(Message::Ops(OpsFrame {
                scope: scope.clone(),
                start_clock: start,
                end_clock: event.op.local_clock,
                ops,
            }));
        }
        for frame in frames {
            self.transport.send(frame).await?;
        }
        Ok(())
    }

    fn authenticated_peer(&self) -> SyncResult<PeerIdentity> {
        self.handshake
            .peer()
            .cloned()
            .ok_or(SyncError::OutOfOrderMessage {
                message: "ops",
                state: self.handshake.state(),
            })
    }
}

impl<S: KvStore, T: Duplex> std::fmt::Debug for Connection<S, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.handshake.state())
            .field("outbound", &self.outbound)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use replidb_core::{AccessGate, ClientId, DeltaConcat};
    use replidb_store::InMemoryStore;

    fn replica(client: u32) -> Arc<Replica<InMemoryStore>> {
        Arc::new(
            Replica::open(
                InMemoryStore::new(),
                ClientId::new(client),
                AccessGate::default(),
                Arc::new(DeltaConcat),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn sends_info_first_and_rejects_pre_auth_traffic() {
        let mut mock = MockTransport::new();
        mock.queue(Message::SyncedAll { clock: 0 });
        let sent = mock.sent();

        let local = Arc::new(LocalIdentity::generate(ClientId::new(1)));
        let connection = Connection::new(replica(1), local, SyncConfig::default(), mock);
        let err = connection.run().await.unwrap_err();

        assert!(matches!(
            err,
            SyncError::OutOfOrderMessage {
                message: "synced-all",
                state: "info-sent",
            }
        ));
        assert!(matches!(sent.lock()[0], Message::Info(_)));
    }

    #[tokio::test]
    async fn peer_close_surfaces_as_retryable() {
        let mock = MockTransport::new();
        let local = Arc::new(LocalIdentity::generate(ClientId::new(1)));
        let connection = Connection::new(replica(1), local, SyncConfig::default(), mock);
        let err = connection.run().await.unwrap_err();
        assert!(matches!(err, SyncError::ConnectionClosed));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (tx, rx) = watch::channel(false);
        let mock = MockTransport::new();
        let local = Arc::new(LocalIdentity::generate(ClientId::new(1)));
        let connection =
            Connection::new(replica(1), local, SyncConfig::default(), mock).with_shutdown(rx);
        tx.send_replace(true);
        assert!(connection.run().await.is_ok());
    }

    #[test]
    fn progress_fires_waiters_once_synced() {
        let progress = SyncProgress::default();
        let mut before = progress.synced(None);
        assert!(before.try_recv().is_err());

        progress.mark(None);
        assert!(progress.is_synced(None));
        assert!(before.try_recv().is_ok());

        // Late observers resolve immediately.
        let mut after = progress.synced(None);
        assert!(after.try_recv().is_ok());
    }
}

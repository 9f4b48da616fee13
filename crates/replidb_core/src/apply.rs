//! The apply engine: one replica's view of the log.
//!
//! [`Replica`] owns a store and admits operations from two directions:
//! local writes, which mint fresh clocks, and remote batches, which are
//! deduplicated by origin clock and gated by authorization before they
//! reach the log. Everything that survives is committed atomically with
//! the clock entries confirming it, then released to observers in
//! local-clock order.

use crate::access::AccessGate;
use crate::clocks::{ClockScope, ClockTracker};
use crate::crdt::CrdtMerge;
use crate::error::{CoreError, CoreResult};
use crate::events::{OpEvent, OrderedEvents};
use crate::keys;
use crate::log::{OpBatch, OpLog};
use crate::op::{merge_ops, Op, OpKind, OpPayload};
use crate::tree::{self, ChildEntry};
use crate::types::{AccessLevel, ClientId, Scope, UserHash};
use replidb_store::{KvStore, ReadTxn, ScanRange, WriteTxn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// All payload kinds, in compaction order.
const ALL_KINDS: [OpKind; 6] = [
    OpKind::CrdtUpdate,
    OpKind::Lww,
    OpKind::ChildOf,
    OpKind::Perm,
    OpKind::DeleteDoc,
    OpKind::NoPermission,
];

fn as_read(txn: &dyn WriteTxn) -> &dyn ReadTxn {
    txn
}

/// A batch of operations received from a peer.
///
/// `start_clock..=end_clock` is the range of the *sender's* local clocks
/// the batch covers; operations the sender suppressed (echoes of our
/// own) consume clocks in the range without appearing in `ops`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBatch {
    /// Operations, in the sender's local-clock order.
    pub ops: Vec<Op>,
    /// First sender clock covered.
    pub start_clock: u64,
    /// Last sender clock covered.
    pub end_clock: u64,
}

/// What happened to a remote batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Operations appended to the log.
    pub applied: u64,
    /// Operations already known (replay or own echo).
    pub deduped: u64,
    /// Operations dropped for missing authorization.
    pub denied: u64,
    /// The sender clock the next batch must start at.
    pub next_expected: u64,
    /// Scopes whose permissions changed; connections re-evaluate their
    /// pending placeholders against these.
    pub perm_changed: Vec<Scope>,
}

/// One replica: a store, a client identity, and the apply rules.
pub struct Replica<S: KvStore> {
    store: S,
    client: ClientId,
    gate: AccessGate,
    crdt: Arc<dyn CrdtMerge>,
    events: OrderedEvents,
}

impl<S: KvStore> Replica<S> {
    /// Opens a replica over `store`.
    pub fn open(
        store: S,
        client: ClientId,
        gate: AccessGate,
        crdt: Arc<dyn CrdtMerge>,
    ) -> CoreResult<Self> {
        let head = {
            let txn = store.read()?;
            OpLog::head(txn.as_ref())?
        };
        Ok(Self {
            store,
            client,
            gate,
            crdt,
            events: OrderedEvents::new(head + 1),
        })
    }

    /// This replica's client id.
    #[must_use]
    pub fn client(&self) -> ClientId {
        self.client
    }

    /// The authorization gate.
    #[must_use]
    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Registers an observer of applied operations.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<OpEvent> {
        self.events.subscribe(capacity)
    }

    /// The highest local clock assigned so far.
    pub fn head(&self) -> CoreResult<u64> {
        let txn = self.store.read()?;
        OpLog::head(txn.as_ref())
    }

    // ------------------------------------------------------------------
    // Local writes
    // ------------------------------------------------------------------

    /// Appends a locally-created operation.
    ///
    /// The origin clock and the local clock coincide for local writes;
    /// both are the next log sequence number.
    pub fn add_op(&self, scope: &Scope, doc: &str, payload: OpPayload) -> CoreResult<Op> {
        if doc.is_empty() {
            return Err(CoreError::invalid_operation("empty doc id"));
        }
        if scope.collection.is_empty() {
            return Err(CoreError::invalid_operation("empty collection"));
        }

        let mut txn = self.store.write()?;
        let clock = OpLog::next_local_clock(as_read(&*txn))?;
        let mut op = Op {
            client: self.client,
            clock,
            local_clock: 0,
            owner: scope.owner,
            collection: scope.collection.clone(),
            doc: doc.to_string(),
            payload,
        };
        OpLog::append(txn.as_mut(), &mut op)?;
        op.integrate(txn.as_mut())?;
        for granularity in ClockScope::covering(scope) {
            ClockTracker::record(txn.as_mut(), self.client, &granularity, op.clock, op.local_clock)?;
        }
        txn.commit()?;

        tracing::debug!(local_clock = op.local_clock, kind = op.kind().name(), doc, "local op");
        self.events.publish(OpEvent {
            op: Arc::new(op.clone()),
            source: None,
        });
        Ok(op)
    }

    /// Writes an opaque rich-content update.
    pub fn write_update(&self, scope: &Scope, doc: &str, update: Vec<u8>) -> CoreResult<Op> {
        self.add_op(scope, doc, OpPayload::CrdtUpdate(update))
    }

    /// Writes a last-writer-wins value, advancing the write counter past
    /// everything seen for the doc.
    pub fn set_lww(&self, scope: &Scope, doc: &str, value: Vec<u8>) -> CoreResult<Op> {
        let counter = self.next_counter(scope, doc, OpKind::Lww)?;
        self.add_op(scope, doc, OpPayload::Lww { counter, value })
    }

    /// Moves the doc under `parent` with the given display name.
    pub fn set_parent(
        &self,
        scope: &Scope,
        doc: &str,
        parent: Option<&str>,
        name: &str,
    ) -> CoreResult<Op> {
        let counter = self.next_counter(scope, doc, OpKind::ChildOf)?;
        self.add_op(
            scope,
            doc,
            OpPayload::ChildOf {
                counter,
                parent: parent.map(Into::into),
                name: name.to_string(),
            },
        )
    }

    /// Grants `user` an access level on the doc (or the wildcard doc).
    /// Grants only ever raise effective access.
    pub fn grant(
        &self,
        scope: &Scope,
        doc: &str,
        user: UserHash,
        level: AccessLevel,
    ) -> CoreResult<Op> {
        self.add_op(
            scope,
            doc,
            OpPayload::Perm {
                access: BTreeMap::from([(user, level.to_wire())]),
            },
        )
    }

    /// Tombstones the doc.
    pub fn delete_doc(&self, scope: &Scope, doc: &str) -> CoreResult<Op> {
        self.add_op(scope, doc, OpPayload::DeleteDoc)
    }

    fn next_counter(&self, scope: &Scope, doc: &str, kind: OpKind) -> CoreResult<u64> {
        let txn = self.store.read()?;
        let records = OpLog::doc_ops(txn.as_ref(), kind, scope, doc)?;
        let highest = records
            .iter()
            .filter_map(|op| match &op.payload {
                OpPayload::Lww { counter, .. } | OpPayload::ChildOf { counter, .. } => {
                    Some(*counter)
                }
                _ => None,
            })
            .max()
            .unwrap_or(0);
        Ok(highest + 1)
    }

    // ------------------------------------------------------------------
    // Remote batches
    // ------------------------------------------------------------------

    /// Applies a batch received from `source` over the given stream
    /// scope.
    ///
    /// The batch must start exactly at the confirmed frontier for that
    /// peer and stream; a gap is a protocol violation and fails the call
    /// (the connection closes rather than patching history silently).
    /// Overlap with already-confirmed clocks is tolerated and
    /// deduplicated.
    ///
    /// Unauthorized operations are dropped individually, logged, and
    /// counted; they never fail the batch.
    pub fn apply_remote_ops(
        &self,
        batch: &RemoteBatch,
        source: ClientId,
        stream: Option<&Scope>,
        source_user: Option<&UserHash>,
    ) -> CoreResult<ApplyOutcome> {
        if batch.end_clock + 1 < batch.start_clock {
            return Err(CoreError::invalid_operation("batch range ends before it starts"));
        }

        let granularity = ClockScope::for_stream(stream);
        let mut txn = self.store.write()?;
        let confirmed = ClockTracker::frontier(as_read(&*txn), source, &granularity)?;
        let expected = confirmed + 1;
        if batch.start_clock > expected {
            return Err(CoreError::CausalityGap {
                expected,
                declared: batch.start_clock,
            });
        }

        let mut outcome = ApplyOutcome::default();
        let mut perm_changed: BTreeSet<Scope> = BTreeSet::new();
        let mut released = Vec::new();

        for incoming in &batch.ops {
            let scope = Scope::new(incoming.owner, incoming.collection.clone());
            if incoming.client == self.client {
                outcome.deduped += 1;
                continue;
            }
            let seen = ClockTracker::confirmed_clock(as_read(&*txn), incoming.client, &scope)?;
            if incoming.clock <= seen && !replaces_placeholder(as_read(&*txn), incoming)? {
                outcome.deduped += 1;
                continue;
            }
            if let Some(user) = source_user {
                if !self.gate.permits(as_read(&*txn), user, incoming)? {
                    tracing::warn!(
                        origin = %incoming.client,
                        doc = %incoming.doc,
                        kind = incoming.kind().name(),
                        "dropping unauthorized operation"
                    );
                    outcome.denied += 1;
                    continue;
                }
            }

            let mut op = incoming.clone();
            OpLog::append(txn.as_mut(), &mut op)?;
            op.integrate(txn.as_mut())?;
            for granularity in ClockScope::covering(&scope) {
                ClockTracker::record(txn.as_mut(), op.client, &granularity, op.clock, op.local_clock)?;
            }
            if op.kind() == OpKind::Perm {
                perm_changed.insert(scope);
            }
            released.push(OpEvent {
                op: Arc::new(op),
                source: Some(source),
            });
            outcome.applied += 1;
        }

        if batch.end_clock >= batch.start_clock {
            ClockTracker::record_frontier(txn.as_mut(), source, &granularity, batch.end_clock)?;
        }
        txn.commit()?;

        self.events.publish_all(released);
        outcome.next_expected = batch.end_clock.max(confirmed) + 1;
        outcome.perm_changed = perm_changed.into_iter().collect();
        tracing::debug!(
            peer = %source,
            applied = outcome.applied,
            deduped = outcome.deduped,
            denied = outcome.denied,
            "applied remote batch"
        );
        Ok(outcome)
    }

    /// Whether `user` may read the doc under current permission records.
    pub fn can_read(&self, user: &UserHash, scope: &Scope, doc: &str) -> CoreResult<bool> {
        let txn = self.store.read()?;
        self.gate.can_read(txn.as_ref(), user, scope, doc)
    }

    /// The confirmed resume point for a peer stream: the highest of the
    /// peer's local clocks this replica has durably applied.
    pub fn frontier(&self, peer: ClientId, stream: Option<&Scope>) -> CoreResult<u64> {
        let txn = self.store.read()?;
        ClockTracker::frontier(txn.as_ref(), peer, &ClockScope::for_stream(stream))
    }

    /// Records a frontier the peer confirmed out of band (a sync
    /// acknowledgement carrying its position).
    pub fn note_peer_frontier(
        &self,
        peer: ClientId,
        stream: Option<&Scope>,
        frontier: u64,
    ) -> CoreResult<()> {
        let mut txn = self.store.write()?;
        ClockTracker::record_frontier(txn.as_mut(), peer, &ClockScope::for_stream(stream), frontier)?;
        txn.commit()
            .map_err(CoreError::from)
    }

    // ------------------------------------------------------------------
    // Outbound streaming
    // ------------------------------------------------------------------

    /// Collects operations for a peer, starting at `from` in this
    /// replica's local clocks.
    ///
    /// The peer's own operations are suppressed but still covered by
    /// the returned range, so the receiver never observes a gap. When a
    /// `reader` is given, content the user may not read is replaced by
    /// a placeholder of the same identity.
    pub fn ops_since(
        &self,
        stream: Option<&Scope>,
        from: u64,
        peer: ClientId,
        reader: Option<&UserHash>,
        max_ops: usize,
        max_bytes: usize,
    ) -> CoreResult<OpBatch> {
        let txn = self.store.read()?;
        let raw = OpLog::scan_after(txn.as_ref(), stream, from, max_ops.saturating_add(1))?;

        let mut batch = OpBatch::empty(from);
        let mut bytes = 0usize;
        for (index, op) in raw.iter().enumerate() {
            if index >= max_ops {
                batch.has_more = true;
                break;
            }
            if op.client == peer {
                // Echoes consume range without being sent.
                batch.end_clock = op.local_clock;
                continue;
            }
            let mut outgoing = op.clone();
            if let Some(user) = reader {
                if hides_content(op.kind()) {
                    let scope = Scope::new(op.owner, op.collection.clone());
                    if !self.gate.can_read(txn.as_ref(), user, &scope, &op.doc)? {
                        outgoing.payload = OpPayload::NoPermission;
                    }
                }
            }
            let size = outgoing.wire_size();
            if !batch.ops.is_empty() && bytes + size > max_bytes {
                batch.has_more = true;
                break;
            }
            bytes += size;
            batch.end_clock = op.local_clock;
            batch.ops.push(outgoing);
        }
        Ok(batch)
    }

    /// Docs in `scope` currently standing in for content this replica
    /// was not authorized to fetch. Re-requested after a permission
    /// change.
    pub fn pending_docs(&self, scope: &Scope) -> CoreResult<Vec<String>> {
        let txn = self.store.read()?;
        let prefix = keys::pending_prefix(&scope.owner, &scope.collection);
        let mut docs = Vec::new();
        for (key, _) in txn.scan(&ScanRange::prefixed(prefix.clone()))? {
            if let Some(doc) = keys::doc_from_pending_key(&key, prefix.len()) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Clears pending markers for docs that received real content since,
    /// returning the docs resolved. Called once a re-requested scope is
    /// fully streamed.
    pub fn resolve_pending(&self, scope: &Scope) -> CoreResult<Vec<String>> {
        let docs = self.pending_docs(scope)?;
        let mut txn = self.store.write()?;
        let mut resolved = Vec::new();
        for doc in docs {
            let mut has_content = false;
            for kind in [OpKind::CrdtUpdate, OpKind::Lww, OpKind::ChildOf] {
                if !OpLog::doc_ops(as_read(&*txn), kind, scope, &doc)?.is_empty() {
                    has_content = true;
                    break;
                }
            }
            if has_content {
                txn.delete(&keys::pending_key(&scope.owner, &scope.collection, &doc))?;
                resolved.push(doc);
            }
        }
        txn.commit()?;
        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // Compaction
    // ------------------------------------------------------------------

    /// Merges all records of one (doc, kind) stream into a single
    /// record, deleting the superseded ones. With `gc` the rich-content
    /// kind collapses history to current state.
    ///
    /// Returns the merged record, or `None` when fewer than two records
    /// exist (nothing to compact).
    pub fn merge_doc_ops(
        &self,
        scope: &Scope,
        doc: &str,
        kind: OpKind,
        gc: bool,
    ) -> CoreResult<Option<Op>> {
        let mut txn = self.store.write()?;
        let records = OpLog::doc_ops(as_read(&*txn), kind, scope, doc)?;
        if records.len() < 2 {
            return Ok(None);
        }
        let merged = merge_ops(&records, gc, &*self.crdt)?;
        for record in &records {
            if record.local_clock == merged.local_clock {
                continue;
            }
            record.unintegrate(txn.as_mut())?;
            OpLog::remove(txn.as_mut(), record)?;
        }
        // The surviving slot takes the merged payload; for synthesized
        // results (perm union, combined updates) this differs from what
        // was originally stored there.
        OpLog::rewrite(txn.as_mut(), &merged)?;
        merged.integrate(txn.as_mut())?;
        txn.commit()?;
        tracing::debug!(doc, kind = kind.name(), compacted = records.len(), "compacted doc stream");
        Ok(Some(merged))
    }

    /// Compacts every kind of one doc.
    pub fn compact_doc(&self, scope: &Scope, doc: &str, gc: bool) -> CoreResult<()> {
        for kind in ALL_KINDS {
            self.merge_doc_ops(scope, doc, kind, gc)?;
        }
        Ok(())
    }

    /// Compacts every doc in a collection.
    pub fn compact_collection(&self, scope: &Scope, gc: bool) -> CoreResult<()> {
        let targets: BTreeSet<(String, OpKind)> = {
            let txn = self.store.read()?;
            OpLog::scan_after(txn.as_ref(), Some(scope), 1, usize::MAX)?
                .into_iter()
                .map(|op| (op.doc.clone(), op.kind()))
                .collect()
        };
        for (doc, kind) in targets {
            self.merge_doc_ops(scope, &doc, kind, gc)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tree queries
    // ------------------------------------------------------------------

    /// The live, verified children of `parent`, sorted by name.
    pub fn children(&self, scope: &Scope, parent: &str) -> CoreResult<Vec<ChildEntry>> {
        let txn = self.store.read()?;
        tree::children(txn.as_ref(), scope, parent, &*self.crdt)
    }

    /// Doc ids from the root down to `doc`, inclusive.
    pub fn doc_path(&self, scope: &Scope, doc: &str) -> CoreResult<Vec<String>> {
        let txn = self.store.read()?;
        tree::path(txn.as_ref(), scope, doc, &*self.crdt)
    }

    /// All docs below `doc`.
    pub fn doc_descendants(&self, scope: &Scope, doc: &str) -> CoreResult<Vec<String>> {
        let txn = self.store.read()?;
        tree::descendants(txn.as_ref(), scope, doc, &*self.crdt)
    }
}

/// Kinds whose payloads reveal content and are substituted for readers
/// without access. Permission records and tombstones always flow.
fn hides_content(kind: OpKind) -> bool {
    matches!(kind, OpKind::CrdtUpdate | OpKind::Lww | OpKind::ChildOf)
}

/// A replayed origin clock may still carry content this replica only
/// ever received as a placeholder. Admit it when the doc is pending and
/// the exact record is absent from the log.
fn replaces_placeholder(txn: &dyn ReadTxn, op: &Op) -> CoreResult<bool> {
    if !hides_content(op.kind()) {
        return Ok(false);
    }
    let key = keys::pending_key(&op.owner, &op.collection, &op.doc);
    if txn.get(&key)?.is_none() {
        return Ok(false);
    }
    let scope = Scope::new(op.owner, op.collection.clone());
    let records = OpLog::doc_ops(txn, op.kind(), &scope, &op.doc)?;
    Ok(!records
        .iter()
        .any(|record| record.client == op.client && record.clock == op.clock))
}

impl<S: KvStore> std::fmt::Debug for Replica<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replica")
            .field("client", &self.client)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::DeltaConcat;
    use crate::types::OwnerId;
    use replidb_store::InMemoryStore;

    fn scope() -> Scope {
        Scope::new(OwnerId::new([8; 32]), "notes")
    }

    fn replica(client: u32) -> Replica<InMemoryStore> {
        Replica::open(
            InMemoryStore::new(),
            ClientId::new(client),
            AccessGate::default(),
            Arc::new(DeltaConcat),
        )
        .unwrap()
    }

    fn trusted_user() -> UserHash {
        UserHash::new([0xaa; 32])
    }

    fn trusting_replica(client: u32) -> Replica<InMemoryStore> {
        Replica::open(
            InMemoryStore::new(),
            ClientId::new(client),
            AccessGate::new([trusted_user()]),
            Arc::new(DeltaConcat),
        )
        .unwrap()
    }

    /// Drains `from` into `to` until `to` holds everything, as the sync
    /// loop would.
    fn pump(from: &Replica<InMemoryStore>, to: &Replica<InMemoryStore>) {
        loop {
            let frontier = to.frontier(from.client(), None).unwrap();
            let batch = from
                .ops_since(None, frontier + 1, to.client(), None, 300, 1 << 20)
                .unwrap();
            if batch.is_empty() {
                break;
            }
            let remote = RemoteBatch {
                ops: batch.ops,
                start_clock: batch.start_clock,
                end_clock: batch.end_clock,
            };
            to.apply_remote_ops(&remote, from.client(), None, None).unwrap();
            if !batch.has_more {
                break;
            }
        }
    }

    #[test]
    fn local_write_assigns_matching_clocks() {
        let replica = replica(1);
        let op = replica.set_lww(&scope(), "doc", b"v1".to_vec()).unwrap();
        assert_eq!(op.local_clock, 1);
        assert_eq!(op.clock, 1);
        assert_eq!(replica.head().unwrap(), 1);
    }

    #[test]
    fn lww_counter_advances_past_history() {
        let replica = replica(1);
        let first = replica.set_lww(&scope(), "doc", b"a".to_vec()).unwrap();
        let second = replica.set_lww(&scope(), "doc", b"b".to_vec()).unwrap();
        let (c1, c2) = match (&first.payload, &second.payload) {
            (OpPayload::Lww { counter: a, .. }, OpPayload::Lww { counter: b, .. }) => (*a, *b),
            other => panic!("unexpected payloads {other:?}"),
        };
        assert!(c2 > c1);
    }

    #[test]
    fn rejects_empty_doc_and_collection() {
        let replica = replica(1);
        assert!(replica.set_lww(&scope(), "", b"v".to_vec()).is_err());
        let bad = Scope::new(scope().owner, "");
        assert!(replica.set_lww(&bad, "doc", b"v".to_vec()).is_err());
    }

    #[test]
    fn remote_batch_applies_and_dedups_replay() {
        let a = replica(1);
        let b = replica(2);
        a.set_lww(&scope(), "doc", b"v1".to_vec()).unwrap();

        let batch = a.ops_since(None, 1, b.client(), None, 300, 1 << 20).unwrap();
        let remote = RemoteBatch {
            ops: batch.ops,
            start_clock: batch.start_clock,
            end_clock: batch.end_clock,
        };

        let outcome = b.apply_remote_ops(&remote, a.client(), None, None).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.next_expected, 2);

        // Replaying the same batch dedups everything. The frontier did
        // not move, so the overlap is legal.
        let replay = b.apply_remote_ops(&remote, a.client(), None, None).unwrap();
        assert_eq!(replay.applied, 0);
        assert_eq!(replay.deduped, 1);
    }

    #[test]
    fn causality_gap_is_fatal() {
        let b = replica(2);
        let remote = RemoteBatch {
            ops: vec![],
            start_clock: 5,
            end_clock: 6,
        };
        let err = b.apply_remote_ops(&remote, ClientId::new(1), None, None);
        assert!(matches!(
            err,
            Err(CoreError::CausalityGap { expected: 1, declared: 5 })
        ));
    }

    #[test]
    fn unauthorized_ops_dropped_individually() {
        let b = replica(2);
        let stranger = UserHash::new([0x55; 32]);
        let op = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: scope().owner,
            collection: "notes".into(),
            doc: "doc".into(),
            payload: OpPayload::Lww {
                counter: 1,
                value: b"v".to_vec(),
            },
        };
        let remote = RemoteBatch {
            ops: vec![op],
            start_clock: 1,
            end_clock: 1,
        };
        let outcome = b
            .apply_remote_ops(&remote, ClientId::new(1), None, Some(&stranger))
            .unwrap();
        assert_eq!(outcome.denied, 1);
        assert_eq!(outcome.applied, 0);
        // The range is still confirmed; the stream moves on.
        assert_eq!(outcome.next_expected, 2);
        assert_eq!(b.head().unwrap(), 0);
    }

    #[test]
    fn trusted_user_ops_apply() {
        let b = trusting_replica(2);
        let op = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: scope().owner,
            collection: "notes".into(),
            doc: "doc".into(),
            payload: OpPayload::DeleteDoc,
        };
        let remote = RemoteBatch {
            ops: vec![op],
            start_clock: 1,
            end_clock: 1,
        };
        let outcome = b
            .apply_remote_ops(&remote, ClientId::new(1), None, Some(&trusted_user()))
            .unwrap();
        assert_eq!(outcome.applied, 1);
    }

    #[test]
    fn two_replicas_converge() {
        let a = replica(1);
        let b = replica(2);
        let s = scope();

        a.set_lww(&s, "doc", b"from-a".to_vec()).unwrap();
        b.set_lww(&s, "doc", b"from-b".to_vec()).unwrap();

        pump(&a, &b);
        pump(&b, &a);
        // A gained b's op; push it back so both hold the full set.
        pump(&a, &b);

        let merged_a = a.merge_doc_ops(&s, "doc", OpKind::Lww, true).unwrap().unwrap();
        let merged_b = b.merge_doc_ops(&s, "doc", OpKind::Lww, true).unwrap().unwrap();
        assert_eq!(merged_a.payload, merged_b.payload);
        // Client 2 wins the counter tie.
        assert_eq!(
            merged_a.payload,
            OpPayload::Lww {
                counter: 1,
                value: b"from-b".to_vec()
            }
        );
    }

    #[test]
    fn echo_suppression_covers_range() {
        let a = replica(1);
        let b = replica(2);
        let s = scope();

        a.set_lww(&s, "doc", b"v".to_vec()).unwrap();
        pump(&a, &b);
        b.set_lww(&s, "doc2", b"w".to_vec()).unwrap();

        // B streams back to A: clock 1 is A's own op, suppressed but
        // covered; clock 2 is B's write.
        let batch = b.ops_since(None, 1, a.client(), None, 300, 1 << 20).unwrap();
        assert_eq!(batch.start_clock, 1);
        assert_eq!(batch.end_clock, 2);
        assert_eq!(batch.ops.len(), 1);
        assert_eq!(batch.ops[0].doc, "doc2");

        let remote = RemoteBatch {
            ops: batch.ops,
            start_clock: batch.start_clock,
            end_clock: batch.end_clock,
        };
        let outcome = a.apply_remote_ops(&remote, b.client(), None, None).unwrap();
        assert_eq!(outcome.applied, 1);
        assert_eq!(outcome.next_expected, 3);
    }

    #[test]
    fn unreadable_content_is_substituted_outbound() {
        let a = replica(1);
        let s = scope();
        let reader = UserHash::new([0x11; 32]);

        a.set_lww(&s, "secret", b"hidden".to_vec()).unwrap();
        a.set_lww(&s, "shared", b"visible".to_vec()).unwrap();
        a.grant(&s, "shared", reader, AccessLevel::Read).unwrap();

        let batch = a
            .ops_since(None, 1, ClientId::new(2), Some(&reader), 300, 1 << 20)
            .unwrap();
        assert_eq!(batch.ops.len(), 3);
        assert_eq!(batch.ops[0].payload, OpPayload::NoPermission);
        assert!(matches!(batch.ops[1].payload, OpPayload::Lww { .. }));
        // Perm records always flow.
        assert!(matches!(batch.ops[2].payload, OpPayload::Perm { .. }));
    }

    #[test]
    fn batch_limits_bound_ops_and_bytes() {
        let a = replica(1);
        let s = scope();
        for i in 0..5 {
            a.set_lww(&s, &format!("doc{i}"), vec![0u8; 100]).unwrap();
        }

        let by_count = a.ops_since(None, 1, ClientId::new(2), None, 2, 1 << 20).unwrap();
        assert_eq!(by_count.ops.len(), 2);
        assert!(by_count.has_more);

        let by_bytes = a.ops_since(None, 1, ClientId::new(2), None, 300, 150).unwrap();
        // The first op always fits; the second blows the budget.
        assert_eq!(by_bytes.ops.len(), 1);
        assert!(by_bytes.has_more);
    }

    #[test]
    fn compaction_keeps_winner_and_shrinks_log() {
        let a = replica(1);
        let s = scope();
        a.set_lww(&s, "doc", b"v1".to_vec()).unwrap();
        a.set_lww(&s, "doc", b"v2".to_vec()).unwrap();
        a.set_lww(&s, "doc", b"v3".to_vec()).unwrap();

        let merged = a.merge_doc_ops(&s, "doc", OpKind::Lww, true).unwrap().unwrap();
        assert_eq!(
            merged.payload,
            OpPayload::Lww {
                counter: 3,
                value: b"v3".to_vec()
            }
        );

        let txn = a.store().read().unwrap();
        let remaining = OpLog::doc_ops(txn.as_ref(), OpKind::Lww, &s, "doc").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].payload, merged.payload);
        // Compacting again is a no-op.
        drop(txn);
        assert!(a.merge_doc_ops(&s, "doc", OpKind::Lww, true).unwrap().is_none());
    }

    #[test]
    fn compact_collection_covers_all_docs() {
        let a = replica(1);
        let s = scope();
        for doc in ["x", "y"] {
            a.set_lww(&s, doc, b"1".to_vec()).unwrap();
            a.set_lww(&s, doc, b"2".to_vec()).unwrap();
        }
        a.compact_collection(&s, true).unwrap();

        let txn = a.store().read().unwrap();
        for doc in ["x", "y"] {
            let remaining = OpLog::doc_ops(txn.as_ref(), OpKind::Lww, &s, doc).unwrap();
            assert_eq!(remaining.len(), 1);
        }
    }

    #[test]
    fn perm_changes_surface_in_outcome() {
        let b = trusting_replica(2);
        let s = scope();
        let op = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: s.owner,
            collection: s.collection.clone(),
            doc: "doc".into(),
            payload: OpPayload::Perm {
                access: BTreeMap::from([(UserHash::new([1; 32]), 2)]),
            },
        };
        let remote = RemoteBatch {
            ops: vec![op],
            start_clock: 1,
            end_clock: 1,
        };
        let outcome = b
            .apply_remote_ops(&remote, ClientId::new(1), None, Some(&trusted_user()))
            .unwrap();
        assert_eq!(outcome.perm_changed, vec![s]);
    }

    #[test]
    fn redelivered_content_replaces_placeholder() {
        let b = trusting_replica(2);
        let s = scope();
        let placeholder = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: s.owner,
            collection: s.collection.clone(),
            doc: "doc".into(),
            payload: OpPayload::NoPermission,
        };
        b.apply_remote_ops(
            &RemoteBatch {
                ops: vec![placeholder],
                start_clock: 1,
                end_clock: 1,
            },
            ClientId::new(1),
            None,
            Some(&trusted_user()),
        )
        .unwrap();
        assert_eq!(b.pending_docs(&s).unwrap(), vec!["doc".to_string()]);
        // Nothing to resolve yet; the real content never arrived.
        assert!(b.resolve_pending(&s).unwrap().is_empty());

        // After a grant upstream, the same origin clock comes back with
        // the real payload. It must not be deduplicated away.
        let content = Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: s.owner,
            collection: s.collection.clone(),
            doc: "doc".into(),
            payload: OpPayload::Lww {
                counter: 1,
                value: b"now visible".to_vec(),
            },
        };
        let outcome = b
            .apply_remote_ops(
                &RemoteBatch {
                    ops: vec![content.clone()],
                    start_clock: 1,
                    end_clock: 1,
                },
                ClientId::new(1),
                None,
                Some(&trusted_user()),
            )
            .unwrap();
        assert_eq!(outcome.applied, 1);

        // Replaying it once more is a plain dedup now that the record
        // exists.
        let replay = b
            .apply_remote_ops(
                &RemoteBatch {
                    ops: vec![content],
                    start_clock: 1,
                    end_clock: 1,
                },
                ClientId::new(1),
                None,
                Some(&trusted_user()),
            )
            .unwrap();
        assert_eq!(replay.deduped, 1);

        assert_eq!(b.resolve_pending(&s).unwrap(), vec!["doc".to_string()]);
        assert!(b.pending_docs(&s).unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_released_in_local_clock_order() {
        let a = replica(1);
        let s = scope();
        let mut rx = a.subscribe(16);

        a.set_lww(&s, "one", b"1".to_vec()).unwrap();
        a.set_lww(&s, "two", b"2".to_vec()).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.op.local_clock, 1);
        assert!(first.source.is_none());
        assert_eq!(second.op.local_clock, 2);
    }

    #[tokio::test]
    async fn remote_events_carry_their_source() {
        let a = replica(1);
        let b = replica(2);
        let s = scope();
        a.set_lww(&s, "doc", b"v".to_vec()).unwrap();

        let mut rx = b.subscribe(16);
        pump(&a, &b);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, Some(a.client()));
        assert_eq!(event.op.client, a.client());
    }
}

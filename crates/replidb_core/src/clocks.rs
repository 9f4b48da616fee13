//! Causal clock tracking for dedup and resumable streaming.

use crate::error::CoreResult;
use crate::keys;
use crate::types::{ClientId, OwnerId, Scope};
use replidb_codec::{WireReader, WireWriter};
use replidb_store::{ReadTxn, WriteTxn};

/// Granularity of a clock entry.
///
/// Three granularities exist so a reader can resume a narrow stream
/// without scanning unrelated operations. The effective confirmed clock
/// for a scope is the maximum across all matching entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockScope {
    /// All operations from the client.
    Global,
    /// Operations under one owner.
    Owner(OwnerId),
    /// Operations under one (owner, collection).
    Collection(OwnerId, String),
}

impl ClockScope {
    /// The granularities whose entries cover an operation in `scope`.
    #[must_use]
    pub fn covering(scope: &Scope) -> [ClockScope; 3] {
        [
            ClockScope::Global,
            ClockScope::Owner(scope.owner),
            ClockScope::Collection(scope.owner, scope.collection.clone()),
        ]
    }

    /// The granularity matching an optional stream scope.
    #[must_use]
    pub fn for_stream(scope: Option<&Scope>) -> ClockScope {
        match scope {
            Some(scope) => ClockScope::Collection(scope.owner, scope.collection.clone()),
            None => ClockScope::Global,
        }
    }
}

/// A confirmed receive point for one origin client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockEntry {
    /// Highest origin-assigned clock confirmed durable.
    pub clock: u64,
    /// Local clock at which that operation was stored here.
    pub local_clock: u64,
}

impl ClockEntry {
    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.put_varint(self.clock);
        w.put_varint(self.local_clock);
        w.into_bytes()
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let mut r = WireReader::new(bytes);
        let clock = r.take_varint().ok()?;
        let local_clock = r.take_varint().ok()?;
        Some(Self { clock, local_clock })
    }
}

/// Reads and writes clock entries within a transaction.
///
/// Stateless; all state lives in the store so that clock updates commit
/// atomically with the log appends they confirm.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockTracker;

impl ClockTracker {
    /// Returns the entry for (client, scope), if any.
    pub fn entry(
        txn: &dyn ReadTxn,
        client: ClientId,
        scope: &ClockScope,
    ) -> CoreResult<Option<ClockEntry>> {
        let key = keys::clock_key(client, scope);
        Ok(txn.get(&key)?.and_then(|bytes| ClockEntry::decode(&bytes)))
    }

    /// Effective confirmed origin clock for an operation in `scope`:
    /// the maximum across the global, per-owner, and per-collection
    /// entries for that client.
    pub fn confirmed_clock(
        txn: &dyn ReadTxn,
        client: ClientId,
        scope: &Scope,
    ) -> CoreResult<u64> {
        let mut confirmed = 0;
        for granularity in ClockScope::covering(scope) {
            if let Some(entry) = Self::entry(txn, client, &granularity)? {
                confirmed = confirmed.max(entry.clock);
            }
        }
        Ok(confirmed)
    }

    /// Records that `clock` from `client` was durably stored at
    /// `local_clock`, at the given granularity. Only advances; a lower
    /// clock than the stored entry is ignored.
    pub fn record(
        txn: &mut dyn WriteTxn,
        client: ClientId,
        granularity: &ClockScope,
        clock: u64,
        local_clock: u64,
    ) -> CoreResult<()> {
        let key = keys::clock_key(client, granularity);
        let current = txn.get(&key)?.and_then(|bytes| ClockEntry::decode(&bytes));
        if let Some(current) = current {
            if current.clock >= clock {
                return Ok(());
            }
        }
        let entry = ClockEntry { clock, local_clock };
        txn.put(&key, &entry.encode())?;
        Ok(())
    }

    /// Returns the resume frontier for a peer stream: the highest of
    /// the peer's local clocks this replica has confirmed for the given
    /// stream scope.
    pub fn frontier(
        txn: &dyn ReadTxn,
        peer: ClientId,
        granularity: &ClockScope,
    ) -> CoreResult<u64> {
        let key = keys::frontier_key(peer, granularity);
        Ok(txn
            .get(&key)?
            .and_then(|bytes| {
                let mut r = WireReader::new(&bytes);
                r.take_varint().ok()
            })
            .unwrap_or(0))
    }

    /// Advances the resume frontier for a peer stream.
    pub fn record_frontier(
        txn: &mut dyn WriteTxn,
        peer: ClientId,
        granularity: &ClockScope,
        frontier: u64,
    ) -> CoreResult<()> {
        let key = keys::frontier_key(peer, granularity);
        let current = txn.get(&key)?.and_then(|bytes| {
            let mut r = WireReader::new(&bytes);
            r.take_varint().ok()
        });
        if current.unwrap_or(0) >= frontier {
            return Ok(());
        }
        let mut w = WireWriter::new();
        w.put_varint(frontier);
        txn.put(&key, &w.into_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replidb_store::{InMemoryStore, KvStore};

    fn scope() -> Scope {
        Scope::new(OwnerId::new([3; 32]), "notes")
    }

    #[test]
    fn record_and_lookup() {
        let store = InMemoryStore::new();
        let client = ClientId::new(7);

        let mut txn = store.write().unwrap();
        ClockTracker::record(txn.as_mut(), client, &ClockScope::Global, 10, 100).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        let entry = ClockTracker::entry(txn.as_ref(), client, &ClockScope::Global)
            .unwrap()
            .unwrap();
        assert_eq!(entry.clock, 10);
        assert_eq!(entry.local_clock, 100);
    }

    #[test]
    fn record_never_regresses() {
        let store = InMemoryStore::new();
        let client = ClientId::new(7);

        let mut txn = store.write().unwrap();
        ClockTracker::record(txn.as_mut(), client, &ClockScope::Global, 10, 100).unwrap();
        ClockTracker::record(txn.as_mut(), client, &ClockScope::Global, 5, 200).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        let entry = ClockTracker::entry(txn.as_ref(), client, &ClockScope::Global)
            .unwrap()
            .unwrap();
        assert_eq!(entry.clock, 10);
    }

    #[test]
    fn confirmed_clock_is_max_across_granularities() {
        let store = InMemoryStore::new();
        let client = ClientId::new(7);
        let scope = scope();

        let mut txn = store.write().unwrap();
        ClockTracker::record(txn.as_mut(), client, &ClockScope::Global, 3, 1).unwrap();
        ClockTracker::record(txn.as_mut(), client, &ClockScope::Owner(scope.owner), 8, 2).unwrap();
        ClockTracker::record(
            txn.as_mut(),
            client,
            &ClockScope::Collection(scope.owner, scope.collection.clone()),
            5,
            3,
        )
        .unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        assert_eq!(
            ClockTracker::confirmed_clock(txn.as_ref(), client, &scope).unwrap(),
            8
        );
    }

    #[test]
    fn missing_entries_confirm_zero() {
        let store = InMemoryStore::new();
        let txn = store.read().unwrap();
        assert_eq!(
            ClockTracker::confirmed_clock(txn.as_ref(), ClientId::new(1), &scope()).unwrap(),
            0
        );
    }

    #[test]
    fn frontier_advances_monotonically() {
        let store = InMemoryStore::new();
        let peer = ClientId::new(9);

        let mut txn = store.write().unwrap();
        ClockTracker::record_frontier(txn.as_mut(), peer, &ClockScope::Global, 40).unwrap();
        ClockTracker::record_frontier(txn.as_mut(), peer, &ClockScope::Global, 30).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        assert_eq!(
            ClockTracker::frontier(txn.as_ref(), peer, &ClockScope::Global).unwrap(),
            40
        );
    }
}

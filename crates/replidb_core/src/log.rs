//! The append-only operation log and its secondary indexes.
//!
//! The log is the single source of truth; every index here is derived
//! from it and rebuilt through `integrate`/`unintegrate`, never written
//! directly by callers.

use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::op::{Op, OpKind};
use crate::types::Scope;
use replidb_store::{ReadTxn, ScanRange, WriteTxn};

/// A contiguous slice of the log, framed for transmission.
///
/// `start_clock..=end_clock` is the range of local clocks the batch
/// *covers*; `ops` may be a subset of the records in that range (echo
/// suppression and permission substitution remove entries without
/// shrinking the range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpBatch {
    /// Operations included, in increasing local-clock order.
    pub ops: Vec<Op>,
    /// First local clock covered.
    pub start_clock: u64,
    /// Last local clock covered.
    pub end_clock: u64,
    /// True if more operations exist past `end_clock`.
    pub has_more: bool,
}

impl OpBatch {
    /// An empty batch covering nothing at `frontier`.
    #[must_use]
    pub fn empty(frontier: u64) -> Self {
        Self {
            ops: Vec::new(),
            start_clock: frontier,
            end_clock: frontier.saturating_sub(1),
            has_more: false,
        }
    }

    /// True if the batch carries no operations and covers no range.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && self.end_clock < self.start_clock
    }
}

/// Log access within a transaction. Stateless, like [`crate::ClockTracker`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OpLog;

impl OpLog {
    /// The local clock the next append will be assigned.
    pub fn next_local_clock(txn: &dyn ReadTxn) -> CoreResult<u64> {
        Ok(txn
            .get(keys::META_NEXT_CLOCK)?
            .and_then(|bytes| Some(u64::from_be_bytes(bytes.try_into().ok()?)))
            .unwrap_or(1))
    }

    /// The highest local clock assigned so far (0 if the log is empty).
    pub fn head(txn: &dyn ReadTxn) -> CoreResult<u64> {
        Ok(Self::next_local_clock(txn)? - 1)
    }

    /// Appends `op`, assigning its `local_clock`.
    ///
    /// The local clock is assigned exactly once, at this durable append,
    /// and never reused even after the record is later compacted away.
    pub fn append(txn: &mut dyn WriteTxn, op: &mut Op) -> CoreResult<()> {
        let local_clock = Self::next_local_clock(txn)?;
        op.local_clock = local_clock;

        txn.put(&keys::log_key(local_clock), &op.encode())?;
        txn.put(
            &keys::scope_key(&op.owner, &op.collection, local_clock),
            &[],
        )?;
        txn.put(
            &keys::doc_kind_key(
                op.kind().to_code(),
                &op.owner,
                &op.collection,
                &op.doc,
                local_clock,
            ),
            &[],
        )?;
        txn.put(keys::META_NEXT_CLOCK, &(local_clock + 1).to_be_bytes())?;
        Ok(())
    }

    /// Removes a record and its index entries. The local clock is not
    /// reissued; the meta counter never moves backwards.
    pub fn remove(txn: &mut dyn WriteTxn, op: &Op) -> CoreResult<()> {
        txn.delete(&keys::log_key(op.local_clock))?;
        txn.delete(&keys::scope_key(&op.owner, &op.collection, op.local_clock))?;
        txn.delete(&keys::doc_kind_key(
            op.kind().to_code(),
            &op.owner,
            &op.collection,
            &op.doc,
            op.local_clock,
        ))?;
        Ok(())
    }

    /// Rewrites the stored payload of a record in place (compaction
    /// writes the merge result back to the surviving local clock).
    pub fn rewrite(txn: &mut dyn WriteTxn, op: &Op) -> CoreResult<()> {
        txn.put(&keys::log_key(op.local_clock), &op.encode())?;
        Ok(())
    }

    /// Reads the record at `local_clock`, if still present.
    pub fn get(txn: &dyn ReadTxn, local_clock: u64) -> CoreResult<Option<Op>> {
        let Some(bytes) = txn.get(&keys::log_key(local_clock))? else {
            return Ok(None);
        };
        let mut op = Op::decode(&bytes)
            .map_err(|e| CoreError::corrupt_record(local_clock, e.to_string()))?;
        op.local_clock = local_clock;
        Ok(Some(op))
    }

    /// All records for one (kind, owner, collection, doc), in
    /// local-clock order. This is the input to [`crate::op::merge_ops`].
    pub fn doc_ops(
        txn: &dyn ReadTxn,
        kind: OpKind,
        scope: &Scope,
        doc: &str,
    ) -> CoreResult<Vec<Op>> {
        let prefix = keys::doc_kind_prefix(kind.to_code(), &scope.owner, &scope.collection, doc);
        let entries = txn.scan(&ScanRange::prefixed(prefix))?;
        let mut ops = Vec::with_capacity(entries.len());
        for (key, _) in entries {
            let local_clock = keys::local_clock_from_index_key(&key)
                .ok_or_else(|| CoreError::corrupt_record(0, "bad doc index key"))?;
            if let Some(op) = Self::get(txn, local_clock)? {
                ops.push(op);
            }
        }
        Ok(ops)
    }

    /// Records with `local_clock >= from`, optionally restricted to a
    /// scope, up to `limit`. Returns at most `limit` records; callers
    /// detect continuation by asking again from the last clock + 1.
    pub fn scan_after(
        txn: &dyn ReadTxn,
        scope: Option<&Scope>,
        from: u64,
        limit: usize,
    ) -> CoreResult<Vec<Op>> {
        let mut ops = Vec::new();
        match scope {
            None => {
                let range = ScanRange::prefixed(keys::log_prefix())
                    .from(keys::log_key(from))
                    .take(limit);
                for (key, bytes) in txn.scan(&range)? {
                    let local_clock = keys::local_clock_from_log_key(&key)
                        .ok_or_else(|| CoreError::corrupt_record(0, "bad log key"))?;
                    let mut op = Op::decode(&bytes)
                        .map_err(|e| CoreError::corrupt_record(local_clock, e.to_string()))?;
                    op.local_clock = local_clock;
                    ops.push(op);
                }
            }
            Some(scope) => {
                let range = ScanRange::prefixed(keys::scope_prefix(&scope.owner, &scope.collection))
                    .from(keys::scope_key(&scope.owner, &scope.collection, from))
                    .take(limit);
                for (key, _) in txn.scan(&range)? {
                    let local_clock = keys::local_clock_from_index_key(&key)
                        .ok_or_else(|| CoreError::corrupt_record(0, "bad scope index key"))?;
                    if let Some(op) = Self::get(txn, local_clock)? {
                        ops.push(op);
                    }
                }
            }
        }
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpPayload;
    use crate::types::{ClientId, OwnerId};
    use replidb_store::{InMemoryStore, KvStore};

    fn scope() -> Scope {
        Scope::new(OwnerId::new([5; 32]), "notes")
    }

    fn make_op(doc: &str, payload: OpPayload) -> Op {
        let scope = scope();
        Op {
            client: ClientId::new(1),
            clock: 1,
            local_clock: 0,
            owner: scope.owner,
            collection: scope.collection,
            doc: doc.into(),
            payload,
        }
    }

    fn lww(doc: &str, counter: u64) -> Op {
        make_op(
            doc,
            OpPayload::Lww {
                counter,
                value: b"v".to_vec(),
            },
        )
    }

    #[test]
    fn append_assigns_sequential_local_clocks() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();

        let mut a = lww("a", 1);
        let mut b = lww("b", 1);
        OpLog::append(txn.as_mut(), &mut a).unwrap();
        OpLog::append(txn.as_mut(), &mut b).unwrap();
        assert_eq!(a.local_clock, 1);
        assert_eq!(b.local_clock, 2);
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        assert_eq!(OpLog::head(txn.as_ref()).unwrap(), 2);
        assert_eq!(OpLog::next_local_clock(txn.as_ref()).unwrap(), 3);
    }

    #[test]
    fn get_restores_local_clock() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        let mut op = lww("a", 1);
        OpLog::append(txn.as_mut(), &mut op).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        let loaded = OpLog::get(txn.as_ref(), 1).unwrap().unwrap();
        assert_eq!(loaded.local_clock, 1);
        assert_eq!(loaded.doc, "a");
    }

    #[test]
    fn remove_does_not_reissue_clocks() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        let mut op = lww("a", 1);
        OpLog::append(txn.as_mut(), &mut op).unwrap();
        OpLog::remove(txn.as_mut(), &op).unwrap();

        let mut next = lww("b", 1);
        OpLog::append(txn.as_mut(), &mut next).unwrap();
        assert_eq!(next.local_clock, 2);
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        assert!(OpLog::get(txn.as_ref(), 1).unwrap().is_none());
    }

    #[test]
    fn doc_ops_filters_by_kind_and_doc() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        for (doc, counter) in [("a", 1), ("a", 2), ("b", 1)] {
            let mut op = lww(doc, counter);
            OpLog::append(txn.as_mut(), &mut op).unwrap();
        }
        let mut delete = make_op("a", OpPayload::DeleteDoc);
        OpLog::append(txn.as_mut(), &mut delete).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        let ops = OpLog::doc_ops(txn.as_ref(), OpKind::Lww, &scope(), "a").unwrap();
        assert_eq!(ops.len(), 2);
        assert!(ops.iter().all(|op| op.doc == "a"));

        let deletes = OpLog::doc_ops(txn.as_ref(), OpKind::DeleteDoc, &scope(), "a").unwrap();
        assert_eq!(deletes.len(), 1);
    }

    #[test]
    fn scan_after_respects_scope_and_start() {
        let store = InMemoryStore::new();
        let other = Scope::new(OwnerId::new([6; 32]), "other");

        let mut txn = store.write().unwrap();
        for i in 0..4 {
            let mut op = lww(&format!("d{i}"), 1);
            OpLog::append(txn.as_mut(), &mut op).unwrap();
        }
        let mut foreign = Op {
            owner: other.owner,
            collection: other.collection.clone(),
            ..lww("x", 1)
        };
        OpLog::append(txn.as_mut(), &mut foreign).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        let all = OpLog::scan_after(txn.as_ref(), None, 1, 100).unwrap();
        assert_eq!(all.len(), 5);

        let scoped = OpLog::scan_after(txn.as_ref(), Some(&scope()), 3, 100).unwrap();
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[0].local_clock, 3);

        let limited = OpLog::scan_after(txn.as_ref(), None, 1, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn empty_batch_covers_nothing() {
        let batch = OpBatch::empty(5);
        assert!(batch.is_empty());
        assert_eq!(batch.start_clock, 5);
        assert_eq!(batch.end_clock, 4);
    }
}

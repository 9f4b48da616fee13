//! Operation records and per-kind merge semantics.
//!
//! Every replicated change is an [`Op`]: origin identity, clocks, scope
//! path, and one [`OpPayload`] variant. The payload kinds form a closed
//! enum; each carries its own encoding and merge rule, matched
//! exhaustively rather than dispatched through a registration table.

use crate::crdt::CrdtMerge;
use crate::error::{CoreError, CoreResult};
use crate::keys;
use crate::types::{ClientId, OwnerId, UserHash};
use replidb_codec::{CodecError, CodecResult, WireReader, WireWriter};
use replidb_store::WriteTxn;
use std::collections::BTreeMap;

/// Kind code of an operation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OpKind {
    /// Opaque commutative rich-content update.
    CrdtUpdate,
    /// Last-writer-wins register.
    Lww,
    /// Parent/name assignment in the doc tree.
    ChildOf,
    /// Access-control entries.
    Perm,
    /// Doc tombstone.
    DeleteDoc,
    /// Placeholder for content this replica may not fetch.
    NoPermission,
}

impl OpKind {
    /// Converts to the wire code.
    #[must_use]
    pub fn to_code(self) -> u8 {
        match self {
            OpKind::CrdtUpdate => 0,
            OpKind::Lww => 1,
            OpKind::ChildOf => 2,
            OpKind::Perm => 3,
            OpKind::DeleteDoc => 4,
            OpKind::NoPermission => 5,
        }
    }

    /// Converts from the wire code.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(OpKind::CrdtUpdate),
            1 => Some(OpKind::Lww),
            2 => Some(OpKind::ChildOf),
            3 => Some(OpKind::Perm),
            4 => Some(OpKind::DeleteDoc),
            5 => Some(OpKind::NoPermission),
            _ => None,
        }
    }

    /// Stable name for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            OpKind::CrdtUpdate => "crdt-update",
            OpKind::Lww => "lww",
            OpKind::ChildOf => "child-of",
            OpKind::Perm => "perm",
            OpKind::DeleteDoc => "delete-doc",
            OpKind::NoPermission => "no-permission",
        }
    }
}

/// An operation payload, independently mergeable per kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpPayload {
    /// Opaque commutative update for a doc's rich content.
    CrdtUpdate(Vec<u8>),
    /// Last-writer-wins register: highest counter wins, ties broken by
    /// highest client id.
    Lww {
        /// Write counter; strictly increases on every local write.
        counter: u64,
        /// Register value.
        value: Vec<u8>,
    },
    /// Assigns the doc's parent and display name. Same LWW-by-counter
    /// rule as [`OpPayload::Lww`].
    ChildOf {
        /// Write counter.
        counter: u64,
        /// Parent doc id; `None` for tree roots.
        parent: Option<String>,
        /// Display name under the parent.
        name: String,
    },
    /// Access-control entries: per-user access level.
    Perm {
        /// User hash → wire level (`mod 4`).
        access: BTreeMap<UserHash, u8>,
    },
    /// Tombstone; first deletion wins.
    DeleteDoc,
    /// Content exists upstream but this replica has not been authorized
    /// to fetch it yet.
    NoPermission,
}

impl OpPayload {
    /// Returns the kind of this payload.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        match self {
            OpPayload::CrdtUpdate(_) => OpKind::CrdtUpdate,
            OpPayload::Lww { .. } => OpKind::Lww,
            OpPayload::ChildOf { .. } => OpKind::ChildOf,
            OpPayload::Perm { .. } => OpKind::Perm,
            OpPayload::DeleteDoc => OpKind::DeleteDoc,
            OpPayload::NoPermission => OpKind::NoPermission,
        }
    }

    fn encode_into(&self, w: &mut WireWriter) {
        match self {
            OpPayload::CrdtUpdate(update) => w.put_bytes(update),
            OpPayload::Lww { counter, value } => {
                w.put_varint(*counter);
                w.put_bytes(value);
            }
            OpPayload::ChildOf {
                counter,
                parent,
                name,
            } => {
                w.put_varint(*counter);
                match parent {
                    Some(parent) => {
                        w.put_u8(1);
                        w.put_str(parent);
                    }
                    None => w.put_u8(0),
                }
                w.put_str(name);
            }
            OpPayload::Perm { access } => {
                w.put_varint(access.len() as u64);
                for (user, level) in access {
                    w.put_bytes(user.as_bytes());
                    w.put_varint(u64::from(*level));
                }
            }
            OpPayload::DeleteDoc | OpPayload::NoPermission => {}
        }
    }

    fn decode_from(kind: OpKind, r: &mut WireReader<'_>) -> CodecResult<Self> {
        Ok(match kind {
            OpKind::CrdtUpdate => OpPayload::CrdtUpdate(r.take_bytes()?.to_vec()),
            OpKind::Lww => OpPayload::Lww {
                counter: r.take_varint()?,
                value: r.take_bytes()?.to_vec(),
            },
            OpKind::ChildOf => {
                let counter = r.take_varint()?;
                let parent = match r.take_u8()? {
                    0 => None,
                    1 => Some(r.take_str()?.to_string()),
                    other => {
                        return Err(CodecError::invalid_structure(format!(
                            "invalid parent marker {other}"
                        )))
                    }
                };
                let name = r.take_str()?.to_string();
                OpPayload::ChildOf {
                    counter,
                    parent,
                    name,
                }
            }
            OpKind::Perm => {
                let count = r.take_varint()?;
                let mut access = BTreeMap::new();
                for _ in 0..count {
                    let hash: [u8; 32] = r.take_bytes()?.try_into().map_err(|_| {
                        CodecError::invalid_structure("user hash must be 32 bytes")
                    })?;
                    let level = r.take_varint()? as u8;
                    access.insert(UserHash::new(hash), level);
                }
                OpPayload::Perm { access }
            }
            OpKind::DeleteDoc => OpPayload::DeleteDoc,
            OpKind::NoPermission => OpPayload::NoPermission,
        })
    }
}

/// The unit of replication.
///
/// `client` and `clock` identify the operation at its origin replica and
/// never change. `local_clock` is assigned by *this* replica's log at
/// durable append and defines this replica's total order over all
/// operations; it is not transmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    /// Origin replica.
    pub client: ClientId,
    /// Sequence number assigned by the origin replica.
    pub clock: u64,
    /// Sequence number assigned by this replica's log. Zero until
    /// appended.
    pub local_clock: u64,
    /// Owning identity of the data.
    pub owner: OwnerId,
    /// Collection namespace under the owner.
    pub collection: String,
    /// Document id, unique within owner + collection.
    pub doc: String,
    /// The payload.
    pub payload: OpPayload,
}

impl Op {
    /// Returns the payload kind.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        self.payload.kind()
    }

    /// Encodes the record for the wire (without `local_clock`).
    pub fn encode_wire(&self, w: &mut WireWriter) {
        w.put_u8(self.kind().to_code());
        w.put_varint(u64::from(self.client.as_u32()));
        w.put_varint(self.clock);
        w.put_bytes(self.owner.as_bytes());
        w.put_str(&self.collection);
        w.put_str(&self.doc);
        self.payload.encode_into(w);
    }

    /// Decodes a wire record. `local_clock` is zero; the receiving log
    /// assigns it at append.
    pub fn decode_wire(r: &mut WireReader<'_>) -> CodecResult<Self> {
        let code = r.take_u8()?;
        let kind = OpKind::from_code(code)
            .ok_or_else(|| CodecError::invalid_structure(format!("unknown op kind {code}")))?;
        let client = ClientId::new(r.take_varint()? as u32);
        let clock = r.take_varint()?;
        let owner: [u8; 32] = r
            .take_bytes()?
            .try_into()
            .map_err(|_| CodecError::invalid_structure("owner hash must be 32 bytes"))?;
        let collection = r.take_str()?.to_string();
        let doc = r.take_str()?.to_string();
        let payload = OpPayload::decode_from(kind, r)?;
        Ok(Self {
            client,
            clock,
            local_clock: 0,
            owner: OwnerId::new(owner),
            collection,
            doc,
            payload,
        })
    }

    /// Encodes to a standalone byte string.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        self.encode_wire(&mut w);
        w.into_bytes()
    }

    /// Decodes a standalone byte string, consuming all input.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let mut r = WireReader::new(bytes);
        let op = Self::decode_wire(&mut r)?;
        r.expect_end()?;
        Ok(op)
    }

    /// Approximate wire size, used by the flow-control byte budget.
    #[must_use]
    pub fn wire_size(&self) -> usize {
        self.encode().len()
    }

    /// Applies this record's side effects to derived indexes.
    ///
    /// Safe to replay: integrating the same record twice leaves the
    /// indexes unchanged.
    pub fn integrate(&self, txn: &mut dyn WriteTxn) -> CoreResult<()> {
        match &self.payload {
            OpPayload::ChildOf {
                parent: Some(parent),
                name,
                ..
            } => {
                let key = keys::parent_key(&self.owner, &self.collection, parent, name);
                txn.put(&key, self.doc.as_bytes())?;
            }
            OpPayload::NoPermission => {
                let key = keys::pending_key(&self.owner, &self.collection, &self.doc);
                txn.put(&key, &[])?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Retracts exactly the index effects [`Op::integrate`] installed.
    pub fn unintegrate(&self, txn: &mut dyn WriteTxn) -> CoreResult<()> {
        match &self.payload {
            OpPayload::ChildOf {
                parent: Some(parent),
                name,
                ..
            } => {
                let key = keys::parent_key(&self.owner, &self.collection, parent, name);
                // Another record may have since claimed the slot for a
                // different doc; only remove our own entry.
                if txn.get(&key)?.as_deref() == Some(self.doc.as_bytes()) {
                    txn.delete(&key)?;
                }
            }
            OpPayload::NoPermission => {
                let key = keys::pending_key(&self.owner, &self.collection, &self.doc);
                txn.delete(&key)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// LWW ordering key: counter first, origin client id as tie-break.
fn lww_rank(op: &Op) -> Option<(u64, u32)> {
    match &op.payload {
        OpPayload::Lww { counter, .. } | OpPayload::ChildOf { counter, .. } => {
            Some((*counter, op.client.as_u32()))
        }
        _ => None,
    }
}

/// Deterministic carrier identity for synthesized merge results.
fn carrier_rank(op: &Op) -> (u64, u32) {
    (op.clock, op.client.as_u32())
}

/// Merges all records of one (owner, collection, doc, kind) stream into
/// a single equivalent record.
///
/// Total, commutative, and associative over any causally-closed subset:
/// the result is independent of arrival order, and merging the result
/// alone reproduces the result (compaction is idempotent).
///
/// With `gc = true` the `CrdtUpdate` kind collapses history to current
/// state via the engine's snapshot; otherwise deltas are combined
/// losslessly. `Perm` takes the per-user maximum level ever granted;
/// the lattice cannot express revocation, so layering a higher-counter
/// re-grant is the only way to lower effective access.
pub fn merge_ops(records: &[Op], gc: bool, crdt: &dyn CrdtMerge) -> CoreResult<Op> {
    let first = records.first().ok_or(CoreError::EmptyMerge)?;
    let kind = first.kind();
    if let Some(other) = records.iter().find(|op| op.kind() != kind) {
        return Err(CoreError::MixedKindMerge {
            left: kind.name(),
            right: other.kind().name(),
        });
    }

    match kind {
        OpKind::Lww | OpKind::ChildOf => {
            let winner = records
                .iter()
                .max_by_key(|op| lww_rank(op))
                .ok_or(CoreError::EmptyMerge)?;
            Ok(winner.clone())
        }
        OpKind::DeleteDoc => {
            // First deletion wins.
            let winner = records
                .iter()
                .min_by_key(|op| op.local_clock)
                .ok_or(CoreError::EmptyMerge)?;
            Ok(winner.clone())
        }
        OpKind::NoPermission => {
            let winner = records
                .iter()
                .max_by_key(|op| op.local_clock)
                .ok_or(CoreError::EmptyMerge)?;
            Ok(winner.clone())
        }
        OpKind::Perm => {
            let mut access: BTreeMap<UserHash, u8> = BTreeMap::new();
            for op in records {
                if let OpPayload::Perm { access: entries } = &op.payload {
                    for (user, level) in entries {
                        let slot = access.entry(*user).or_insert(0);
                        *slot = (*slot).max(level % 4);
                    }
                }
            }
            let carrier = records
                .iter()
                .max_by_key(|op| carrier_rank(op))
                .ok_or(CoreError::EmptyMerge)?;
            let mut merged = carrier.clone();
            merged.payload = OpPayload::Perm { access };
            Ok(merged)
        }
        OpKind::CrdtUpdate => {
            // Sort by origin identity so every replica combines the
            // updates in the same order.
            let mut sorted: Vec<&Op> = records.iter().collect();
            sorted.sort_by_key(|op| (op.client.as_u32(), op.clock));
            let updates: Vec<&[u8]> = sorted
                .iter()
                .filter_map(|op| match &op.payload {
                    OpPayload::CrdtUpdate(update) => Some(update.as_slice()),
                    _ => None,
                })
                .collect();
            let combined = if gc {
                crdt.snapshot(&updates)
            } else {
                crdt.merge(&updates)
            };
            let carrier = records
                .iter()
                .max_by_key(|op| carrier_rank(op))
                .ok_or(CoreError::EmptyMerge)?;
            let mut merged = carrier.clone();
            merged.payload = OpPayload::CrdtUpdate(combined);
            Ok(merged)
        }
    }
}

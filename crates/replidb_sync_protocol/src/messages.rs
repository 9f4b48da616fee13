//! Protocol message types and their wire encoding.
//!
//! Every message is a tag byte followed by its fields. The tag space is
//! closed; an unknown tag is a protocol violation, never skipped.

use crate::error::{ProtocolError, ProtocolResult};
use replidb_codec::{WireReader, WireWriter};
use replidb_core::{ClientId, Op, OwnerId, Scope};
use replidb_identity::{Challenge, CHALLENGE_LENGTH};

const TAG_OPS: u8 = 0;
const TAG_REQUEST_OPS: u8 = 1;
const TAG_SYNCED: u8 = 2;
const TAG_SYNCED_ALL: u8 = 3;
const TAG_INFO: u8 = 4;
const TAG_CHALLENGE_ANSWER: u8 = 5;

/// A batch of operations in flight.
///
/// `start_clock..=end_clock` covers the sender's local clocks; the op
/// count on the wire may be smaller when the sender suppressed echoes
/// of the receiver's own operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpsFrame {
    /// The stream scope, `None` for the global stream.
    pub scope: Option<Scope>,
    /// First sender clock covered.
    pub start_clock: u64,
    /// Last sender clock covered.
    pub end_clock: u64,
    /// The operations.
    pub ops: Vec<Op>,
}

/// Handshake introduction, the first message on every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The sender's replica id.
    pub client: ClientId,
    /// The sender's user public key.
    pub user_key: [u8; 32],
    /// Token binding the sender's device key to the user key, in
    /// compact form.
    pub device_claim: String,
    /// Random challenge the receiver must answer.
    pub challenge: Challenge,
}

/// A sync protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Operations from the sender's log.
    Ops(OpsFrame),
    /// Asks the peer to stream operations starting at `from`.
    RequestOps {
        /// The stream scope, `None` for everything.
        scope: Option<Scope>,
        /// First local clock of the peer's log wanted.
        from: u64,
    },
    /// The sender reached its log head for one scope's stream.
    Synced {
        /// The scope that is now caught up.
        scope: Scope,
        /// The sender's confirmed clock for the stream: every local
        /// clock up to and including it has been covered.
        clock: u64,
    },
    /// The sender reached its log head for the global stream.
    SyncedAll {
        /// The sender's confirmed clock for the global stream.
        clock: u64,
    },
    /// Handshake introduction.
    Info(PeerInfo),
    /// Answer to the peer's challenge: a device-signed token.
    ChallengeAnswer {
        /// The signed token, compact form.
        token: String,
    },
}

fn put_scope(w: &mut WireWriter, scope: &Scope) {
    w.put_fixed(scope.owner.as_bytes());
    w.put_str(&scope.collection);
}

fn take_scope(r: &mut WireReader<'_>) -> ProtocolResult<Scope> {
    let owner: [u8; 32] = r
        .take_fixed(32)?
        .try_into()
        .map_err(|_| ProtocolError::malformed("owner hash truncated"))?;
    let collection = r.take_str()?.to_string();
    Ok(Scope::new(OwnerId::new(owner), collection))
}

fn put_opt_scope(w: &mut WireWriter, scope: Option<&Scope>) {
    match scope {
        Some(scope) => {
            w.put_u8(1);
            put_scope(w, scope);
        }
        None => w.put_u8(0),
    }
}

fn take_opt_scope(r: &mut WireReader<'_>) -> ProtocolResult<Option<Scope>> {
    match r.take_u8()? {
        0 => Ok(None),
        1 => Ok(Some(take_scope(r)?)),
        other => Err(ProtocolError::malformed(format!(
            "invalid scope marker {other}"
        ))),
    }
}

impl Message {
    /// Encodes the message body (tag plus fields, unframed).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        match self {
            Message::Ops(frame) => {
                w.put_u8(TAG_OPS);
                put_opt_scope(&mut w, frame.scope.as_ref());
                w.put_varint(frame.start_clock);
                w.put_varint(frame.end_clock);
                w.put_varint(frame.ops.len() as u64);
                for op in &frame.ops {
                    op.encode_wire(&mut w);
                }
            }
            Message::RequestOps { scope, from } => {
                w.put_u8(TAG_REQUEST_OPS);
                put_opt_scope(&mut w, scope.as_ref());
                w.put_varint(*from);
            }
            Message::Synced { scope, clock } => {
                w.put_u8(TAG_SYNCED);
                put_scope(&mut w, scope);
                w.put_varint(*clock);
            }
            Message::SyncedAll { clock } => {
                w.put_u8(TAG_SYNCED_ALL);
                w.put_varint(*clock);
            }
            Message::Info(info) => {
                w.put_u8(TAG_INFO);
                w.put_varint(u64::from(info.client.as_u32()));
                w.put_fixed(&info.user_key);
                w.put_str(&info.device_claim);
                w.put_fixed(&info.challenge);
            }
            Message::ChallengeAnswer { token } => {
                w.put_u8(TAG_CHALLENGE_ANSWER);
                w.put_str(token);
            }
        }
        w.into_bytes()
    }

    /// Decodes one message, consuming the whole input.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut r = WireReader::new(bytes);
        let message = Self::decode_from(&mut r)?;
        r.expect_end()?;
        Ok(message)
    }

    fn decode_from(r: &mut WireReader<'_>) -> ProtocolResult<Self> {
        let tag = r.take_u8()?;
        Ok(match tag {
            TAG_OPS => {
                let scope = take_opt_scope(r)?;
                let start_clock = r.take_varint()?;
                let end_clock = r.take_varint()?;
                if end_clock.wrapping_add(1) < start_clock {
                    return Err(ProtocolError::malformed("batch range ends before it starts"));
                }
                let count = r.take_varint()?;
                if count > r.remaining() as u64 {
                    // Every op costs at least one byte; a count beyond
                    // the remaining input is unsatisfiable.
                    return Err(ProtocolError::malformed("op count exceeds frame size"));
                }
                let mut ops = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    ops.push(Op::decode_wire(r)?);
                }
                Message::Ops(OpsFrame {
                    scope,
                    start_clock,
                    end_clock,
                    ops,
                })
            }
            TAG_REQUEST_OPS => Message::RequestOps {
                scope: take_opt_scope(r)?,
                from: r.take_varint()?,
            },
            TAG_SYNCED => Message::Synced {
                scope: take_scope(r)?,
                clock: r.take_varint()?,
            },
            TAG_SYNCED_ALL => Message::SyncedAll {
                clock: r.take_varint()?,
            },
            TAG_INFO => {
                let client = ClientId::new(r.take_varint()? as u32);
                let user_key: [u8; 32] = r
                    .take_fixed(32)?
                    .try_into()
                    .map_err(|_| ProtocolError::malformed("user key truncated"))?;
                let device_claim = r.take_str()?.to_string();
                let challenge: Challenge = r
                    .take_fixed(CHALLENGE_LENGTH)?
                    .try_into()
                    .map_err(|_| ProtocolError::malformed("challenge truncated"))?;
                Message::Info(PeerInfo {
                    client,
                    user_key,
                    device_claim,
                    challenge,
                })
            }
            TAG_CHALLENGE_ANSWER => Message::ChallengeAnswer {
                token: r.take_str()?.to_string(),
            },
            tag => return Err(ProtocolError::UnknownTag { tag }),
        })
    }

    /// Stable name for diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Message::Ops(_) => "ops",
            Message::RequestOps { .. } => "request-ops",
            Message::Synced { .. } => "synced",
            Message::SyncedAll { .. } => "synced-all",
            Message::Info(_) => "info",
            Message::ChallengeAnswer { .. } => "challenge-answer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replidb_core::OpPayload;

    fn scope() -> Scope {
        Scope::new(OwnerId::new([1; 32]), "notes")
    }

    fn sample_op(clock: u64) -> Op {
        Op {
            client: ClientId::new(7),
            clock,
            local_clock: 0,
            owner: scope().owner,
            collection: "notes".into(),
            doc: "doc".into(),
            payload: OpPayload::Lww {
                counter: clock,
                value: b"v".to_vec(),
            },
        }
    }

    fn roundtrip(message: Message) {
        let decoded = Message::decode(&message.encode()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn all_variants_roundtrip() {
        roundtrip(Message::Ops(OpsFrame {
            scope: Some(scope()),
            start_clock: 10,
            end_clock: 12,
            ops: vec![sample_op(1), sample_op(2)],
        }));
        roundtrip(Message::Ops(OpsFrame {
            scope: None,
            start_clock: 1,
            end_clock: 0,
            ops: vec![],
        }));
        roundtrip(Message::RequestOps {
            scope: Some(scope()),
            from: 42,
        });
        roundtrip(Message::RequestOps { scope: None, from: 1 });
        roundtrip(Message::Synced {
            scope: scope(),
            clock: 42,
        });
        roundtrip(Message::SyncedAll { clock: 7 });
        roundtrip(Message::Info(PeerInfo {
            client: ClientId::new(9),
            user_key: [3; 32],
            device_claim: "claims.sig".into(),
            challenge: [5; 32],
        }));
        roundtrip(Message::ChallengeAnswer {
            token: "claims.sig".into(),
        });
    }

    #[test]
    fn unknown_tag_rejected() {
        assert_eq!(
            Message::decode(&[99]),
            Err(ProtocolError::UnknownTag { tag: 99 })
        );
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = Message::SyncedAll { clock: 3 }.encode();
        bytes.push(0);
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn sync_markers_carry_confirmed_clock() {
        let mut w = WireWriter::new();
        w.put_u8(TAG_SYNCED);
        w.put_fixed(&[1; 32]);
        w.put_str("notes");
        w.put_varint(42);
        assert_eq!(
            Message::decode(&w.into_bytes()).unwrap(),
            Message::Synced {
                scope: scope(),
                clock: 42,
            }
        );
        assert_eq!(
            Message::decode(&[TAG_SYNCED_ALL, 42]).unwrap(),
            Message::SyncedAll { clock: 42 }
        );
    }

    #[test]
    fn inverted_batch_range_rejected() {
        let mut w = WireWriter::new();
        w.put_u8(TAG_OPS);
        w.put_u8(0); // no scope
        w.put_varint(10); // start
        w.put_varint(3); // end, before start - 1
        w.put_varint(0);
        assert!(matches!(
            Message::decode(&w.into_bytes()),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn absurd_op_count_rejected() {
        let mut w = WireWriter::new();
        w.put_u8(TAG_OPS);
        w.put_u8(0);
        w.put_varint(1);
        w.put_varint(1);
        w.put_varint(1_000_000); // declared count, no op bytes follow
        assert!(matches!(
            Message::decode(&w.into_bytes()),
            Err(ProtocolError::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_info_rejected() {
        let full = Message::Info(PeerInfo {
            client: ClientId::new(1),
            user_key: [0; 32],
            device_claim: "c.s".into(),
            challenge: [0; 32],
        })
        .encode();
        assert!(Message::decode(&full[..full.len() - 4]).is_err());
    }
}

//! # RepliDB Sync Protocol
//!
//! Wire message types for peer synchronization and the length-prefixed
//! framing that carries them over any ordered reliable byte stream.
//!
//! Six messages make up the protocol: the handshake pair ([`Message::Info`],
//! [`Message::ChallengeAnswer`]), the streaming pair ([`Message::RequestOps`],
//! [`Message::Ops`]), and the catch-up markers ([`Message::Synced`],
//! [`Message::SyncedAll`]). Encoding is bit-exact over [`replidb_codec`]
//! primitives; anything structurally off, an unknown tag, trailing bytes,
//! an inverted batch range, is an error the connection treats as fatal.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod frame;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{encode_frame, FrameDecoder, MAX_FRAME_BYTES};
pub use messages::{Message, OpsFrame, PeerInfo};

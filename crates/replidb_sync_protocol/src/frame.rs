//! Length-prefixed framing over a byte stream.
//!
//! Each frame is a 4-byte big-endian payload length followed by one
//! encoded [`Message`]. The length is validated before any allocation,
//! so a corrupt or hostile header cannot request an absurd buffer.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::Message;

/// Maximum payload length of a single frame.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Encodes a message with its frame header.
pub fn encode_frame(message: &Message) -> ProtocolResult<Vec<u8>> {
    let body = message.encode();
    if body.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge {
            declared: body.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Incremental frame parser for stream transports.
///
/// Feed arbitrary chunks with [`FrameDecoder::push`]; [`FrameDecoder::next`]
/// yields complete messages as they become available.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Creates an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends received bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, `None` if more bytes are
    /// needed. A decode failure poisons the stream; callers close the
    /// connection rather than resynchronize.
    pub fn next(&mut self) -> ProtocolResult<Option<Message>> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let declared = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]])
            as usize;
        if declared > MAX_FRAME_BYTES {
            return Err(ProtocolError::FrameTooLarge {
                declared,
                max: MAX_FRAME_BYTES,
            });
        }
        if self.buf.len() < 4 + declared {
            return Ok(None);
        }
        let body: Vec<u8> = self.buf.drain(..4 + declared).skip(4).collect();
        Message::decode(&body).map(Some)
    }

    /// Number of buffered, unparsed bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

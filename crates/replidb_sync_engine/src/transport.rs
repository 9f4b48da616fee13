//! Transport abstraction for sync connections.
//!
//! The engine runs over any ordered, reliable, framed duplex channel.
//! [`ChannelTransport`] carries framed messages over in-process
//! channels and backs the loopback pair used by tests and embedded
//! deployments; network deployments implement [`Duplex`] over their
//! own socket type.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use replidb_sync_protocol::{encode_frame, FrameDecoder, Message};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An ordered reliable message channel to one peer.
pub trait Duplex: Send + 'static {
    /// Sends one message.
    fn send(&mut self, message: Message) -> impl Future<Output = SyncResult<()>> + Send;

    /// Receives the next message. `Ok(None)` means the peer closed
    /// cleanly.
    fn recv(&mut self) -> impl Future<Output = SyncResult<Option<Message>>> + Send;
}

/// A [`Duplex`] over in-process byte channels, including the wire
/// framing so tests exercise the same encode/decode path a socket
/// transport would.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    decoder: FrameDecoder,
}

/// Creates two connected loopback transports.
#[must_use]
pub fn duplex_pair(capacity: usize) -> (ChannelTransport, ChannelTransport) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (
        ChannelTransport {
            tx: a_tx,
            rx: a_rx,
            decoder: FrameDecoder::new(),
        },
        ChannelTransport {
            tx: b_tx,
            rx: b_rx,
            decoder: FrameDecoder::new(),
        },
    )
}

impl Duplex for ChannelTransport {
    async fn send(&mut self, message: Message) -> SyncResult<()> {
        let frame = encode_frame(&message)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| SyncError::ConnectionClosed)
    }

    async fn recv(&mut self) -> SyncResult<Option<Message>> {
        loop {
            if let Some(message) = self.decoder.next()? {
                return Ok(Some(message));
            }
            match self.rx.recv().await {
                Some(bytes) => self.decoder.push(&bytes),
                None if self.decoder.buffered() > 0 => {
                    return Err(SyncError::transport_fatal("stream closed mid-frame"))
                }
                None => return Ok(None),
            }
        }
    }
}

/// A scripted transport for unit tests: delivers queued messages, then
/// reports a clean close; records everything sent.
#[derive(Debug, Default)]
pub struct MockTransport {
    inbound: VecDeque<Message>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl MockTransport {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a message for the connection to receive.
    pub fn queue(&mut self, message: Message) {
        self.inbound.push_back(message);
    }

    /// Handle to the messages the connection sent, usable after the
    /// connection consumed the transport.
    #[must_use]
    pub fn sent(&self) -> Arc<Mutex<Vec<Message>>> {
        Arc::clone(&self.sent)
    }
}

impl Duplex for MockTransport {
    async fn send(&mut self, message: Message) -> SyncResult<()> {
        self.sent.lock().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> SyncResult<Option<Message>> {
        Ok(self.inbound.pop_front())
    }
}

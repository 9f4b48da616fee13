//! Ordered delivery of applied operations to observers.
//!
//! Apply paths commit a batch and then publish its operations here.
//! Publications may arrive out of local-clock order (separate tasks race
//! between commit and publish); the buffer stages them and releases only
//! contiguous runs, so every subscriber sees each operation exactly
//! once, strictly increasing by `local_clock`, with no gaps.

use crate::op::Op;
use crate::types::ClientId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An applied operation, as seen by observers.
#[derive(Debug, Clone)]
pub struct OpEvent {
    /// The operation, with its assigned `local_clock`.
    pub op: Arc<Op>,
    /// The peer the operation was received from; `None` for operations
    /// created locally. Outbound streams use this to avoid echoing a
    /// peer's own operations back to it.
    pub source: Option<ClientId>,
}

struct Inner {
    /// Staged events not yet releasable, keyed by `local_clock`.
    staged: BTreeMap<u64, OpEvent>,
    /// The next `local_clock` to release.
    next: u64,
    subscribers: Vec<mpsc::Sender<OpEvent>>,
}

/// The buffer releasing applied operations in strict local-clock order.
///
/// Cheap to clone; clones share the same buffer.
#[derive(Clone)]
pub struct OrderedEvents {
    inner: Arc<Mutex<Inner>>,
}

impl OrderedEvents {
    /// Creates a buffer expecting `next` as the first local clock to
    /// release (typically the log head + 1 at startup).
    #[must_use]
    pub fn new(next: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                staged: BTreeMap::new(),
                next,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers an observer. Events released after this call are
    /// delivered to the returned receiver; a subscriber whose channel
    /// stays full is dropped rather than allowed to stall the others.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<OpEvent> {
        let (tx, rx) = mpsc::channel(capacity);
        self.inner.lock().subscribers.push(tx);
        rx
    }

    /// The next local clock the buffer will release.
    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.inner.lock().next
    }

    /// Stages an applied operation and releases any contiguous run it
    /// completes. An event at or below an already-released clock is
    /// ignored (duplicate publish after a retried commit).
    pub fn publish(&self, event: OpEvent) {
        let mut inner = self.inner.lock();
        let clock = event.op.local_clock;
        if clock < inner.next {
            tracing::debug!(local_clock = clock, "dropping already-released event");
            return;
        }
        inner.staged.insert(clock, event);
        Self::flush(&mut inner);
    }

    /// Stages a whole batch, then releases once.
    pub fn publish_all(&self, events: impl IntoIterator<Item = OpEvent>) {
        let mut inner = self.inner.lock();
        for event in events {
            let clock = event.op.local_clock;
            if clock >= inner.next {
                inner.staged.insert(clock, event);
            }
        }
        Self::flush(&mut inner);
    }

    /// Advances past clocks that will never be published (a batch range
    /// whose operations were all suppressed still consumes clocks).
    pub fn skip_to(&self, next: u64) {
        let mut inner = self.inner.lock();
        if next > inner.next {
            inner.next = next;
            Self::flush(&mut inner);
        }
    }

    fn flush(inner: &mut Inner) {
        while let Some(event) = inner.staged.remove(&inner.next) {
            inner.next += 1;
            inner.subscribers.retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("dropping lagging event subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
    }
}

impl std::fmt::Debug for OrderedEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("OrderedEvents")
            .field("next", &inner.next)
            .field("staged", &inner.staged.len())
            .field("subscribers", &inner.subscribers.len())
            .finish()
    }
}

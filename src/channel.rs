//! Multi-producer, single-consumer event channel
//!
//! Workers push through cloned [`EventSender`] handles; the orchestrator drains
//! the paired [`EventStream`]. Closing is explicit and shared by every sender
//! clone, so the consumer terminates even while worker tasks still hold
//! handles. Closing never discards events that were already buffered.
//!
//! Pushing after close is rejected with [`Error::ChannelClosed`] and the event
//! is dropped. The same happens once the consuming stream has been dropped.

use crate::error::{Error, Result};
use crate::events::Event;
use futures::stream::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Create a new unbounded event channel
pub fn event_channel() -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = EventSender {
        inner: Arc::new(Mutex::new(Some(tx))),
    };
    (sender, EventStream { rx })
}

/// Producer handle; cheap to clone, one per worker
#[derive(Clone)]
pub struct EventSender {
    inner: Arc<Mutex<Option<mpsc::UnboundedSender<Event>>>>,
}

impl EventSender {
    /// Append an event to the buffer and wake the consumer. Never blocks.
    pub fn push(&self, event: Event) -> Result<()> {
        let guard = self.inner.lock();
        match guard.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| Error::ChannelClosed),
            None => Err(Error::ChannelClosed),
        }
    }

    /// Mark the channel closed. Idempotent; buffered events stay readable.
    pub fn close(&self) {
        self.inner.lock().take();
    }

    /// Whether `close` has been called on any clone of this sender
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Closes the channel when dropped, including during a panic unwind
pub(crate) struct CloseOnDrop(pub(crate) EventSender);

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Consumer side; yields events in FIFO order until closed and drained
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Receive the next event, suspending while the buffer is empty
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

//! Ingestion queue: bounded MPSC channel from sources to the processor.
//!
//! A full queue blocks the submitting source (backpressure, never drop).
//! The queue closes once every `EventSender` clone is gone, so the owner
//! keeps one clone until all sources have returned and then drops it.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::pipeline::types::Event;

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Create a bounded ingestion queue. A zero capacity is raised to one.
pub fn ingest_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer handle. Cheap to clone; one per source.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Submit an event, waiting for space if the queue is full.
    ///
    /// Returns `Cancelled` if shutdown fires first; an event given up this
    /// way was never buffered.
    pub async fn submit(&self, event: Event, cancel: &CancellationToken) -> Result<(), QueueError> {
        if cancel.is_cancelled() {
            return Err(QueueError::Cancelled);
        }
        tokio::select! {
            biased;
            sent = self.tx.send(event) => sent.map_err(|_| QueueError::Closed),
            _ = cancel.cancelled() => Err(QueueError::Cancelled),
        }
    }
}

/// Single consumer handle, owned by the processor.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

impl EventReceiver {
    /// Next event in arrival order; `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

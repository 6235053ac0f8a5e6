//! Live-update fan-out to dashboard subscribers.
//!
//! Each subscriber owns a small bounded mailbox. Delivery uses `try_send`,
//! so a full mailbox loses that update instead of stalling the writer.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Default mailbox depth per subscriber.
pub const DEFAULT_MAILBOX_DEPTH: usize = 16;

/// Opaque "something changed" token. Subscribers re-pull from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveUpdate {
    Refresh,
}

impl LiveUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refresh => "refresh",
        }
    }
}

/// Mailbox handle returned by `Store::subscribe`.
///
/// Hand it back to `Store::unsubscribe` when done; that consumes it, so a
/// subscription cannot be released twice.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<LiveUpdate>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next update. `None` once closed.
    pub async fn recv(&mut self) -> Option<LiveUpdate> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LiveUpdate> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<LiveUpdate>> {
        self.rx.poll_recv(cx)
    }
}

/// Subscriber registry, guarded separately from the store's primary state.
#[derive(Debug)]
pub(crate) struct LiveHub {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<LiveUpdate>>>,
    mailbox_depth: usize,
}

impl LiveHub {
    pub(crate) fn new(mailbox_depth: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            mailbox_depth: mailbox_depth.max(1),
        }
    }

    // Critical sections never panic, so a poisoned lock still holds a
    // consistent map.
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<LiveUpdate>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.mailbox_depth);
        let id = Uuid::new_v4();
        let count = {
            let mut subs = self.lock();
            subs.insert(id, tx);
            subs.len()
        };
        debug!(subscriber = %id, subscribers = count, "Live subscriber added");
        Subscription { id, rx }
    }

    pub(crate) fn unsubscribe(&self, mut subscription: Subscription) {
        let removed = self.lock().remove(&subscription.id).is_some();
        subscription.rx.close();
        debug!(subscriber = %subscription.id, removed, "Live subscriber removed");
    }

    /// Offer `update` to every subscriber. Returns how many accepted it.
    pub(crate) fn broadcast(&self, update: LiveUpdate) -> usize {
        let subs = self.lock();
        let mut delivered = 0;
        for (id, tx) in subs.iter() {
            match tx.try_send(update) {
                Ok(()) => delivered += 1,
                Err(_) => trace!(subscriber = %id, "Skipping slow live subscriber"),
            }
        }
        delivered
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

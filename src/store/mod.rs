//! Observability store: bounded in-memory history of processed events.
//!
//! Holds the ring buffer of processed records, per-source listener status,
//! the capped notification log and running stats behind one read/write
//! lock. Live-update subscribers sit behind a separate mutex so dashboard
//! fan-out never contends with history reads.
//!
//! Nothing awaits external I/O while a lock is held.

pub mod live;
pub mod model;
mod ring;

pub use live::{LiveUpdate, Subscription};
pub use model::{
    ActionItemView, ListenerStatus, NotificationLogEntry, NotificationReason, ProcessedRecord,
    Stats,
};

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::pipeline::types::Origin;
use live::{DEFAULT_MAILBOX_DEPTH, LiveHub};
use ring::RingBuffer;

/// Default ring buffer capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Maximum notification log entries kept.
pub const MAX_NOTIFICATIONS: usize = 100;

/// Everything guarded by the primary lock.
#[derive(Debug)]
struct StoreState {
    records: RingBuffer<ProcessedRecord>,
    /// Keyed by listener name; ordered so origin lookups are deterministic.
    listeners: BTreeMap<String, ListenerStatus>,
    notifications: VecDeque<NotificationLogEntry>,
    stats: Stats,
}

/// Thread-safe observability store shared by the processor and readers.
#[derive(Debug)]
pub struct Store {
    state: RwLock<StoreState>,
    live: LiveHub,
}

impl Store {
    /// Create a store with the given history capacity (0 means default).
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = if capacity == 0 {
            DEFAULT_HISTORY_CAPACITY
        } else {
            capacity
        };
        Arc::new(Self {
            state: RwLock::new(StoreState {
                records: RingBuffer::new(capacity),
                listeners: BTreeMap::new(),
                notifications: VecDeque::with_capacity(MAX_NOTIFICATIONS),
                stats: Stats::default(),
            }),
            live: LiveHub::new(DEFAULT_MAILBOX_DEPTH),
        })
    }

    pub async fn capacity(&self) -> usize {
        self.state.read().await.records.capacity()
    }

    // ── Processed records ───────────────────────────────────────────

    /// Insert a record, update stats in the same critical section, then
    /// poke live subscribers.
    pub async fn add_processed(&self, record: ProcessedRecord) {
        {
            let mut state = self.state.write().await;
            state.stats.record(&record);
            state.records.push(record);
        }

        let delivered = self.live.broadcast(LiveUpdate::Refresh);
        trace!(delivered, "Live refresh broadcast");
    }

    /// Most recent records, newest first. `limit == 0` returns everything.
    pub async fn recent(&self, limit: usize) -> Vec<ProcessedRecord> {
        let state = self.state.read().await;
        let limit = effective_limit(limit, state.records.len());
        state.records.iter_recent().take(limit).cloned().collect()
    }

    /// Most recent records from one origin, newest first.
    pub async fn recent_by_origin(&self, origin: Origin, limit: usize) -> Vec<ProcessedRecord> {
        let state = self.state.read().await;
        let limit = effective_limit(limit, state.records.len());
        state
            .records
            .iter_recent()
            .filter(|r| r.event.origin == origin)
            .take(limit)
            .cloned()
            .collect()
    }

    // ── Listener status ─────────────────────────────────────────────

    /// Set a listener's connection flag, creating its entry on first sight.
    pub async fn update_listener_status(&self, name: &str, origin: Origin, connected: bool) {
        let mut state = self.state.write().await;
        let status = state
            .listeners
            .entry(name.to_string())
            .or_insert_with(|| ListenerStatus {
                name: name.to_string(),
                origin,
                connected: false,
                message_count: 0,
                last_message: None,
            });
        status.connected = connected;
        debug!(listener = %name, origin = %origin, connected, "Listener status updated");
    }

    /// Count one message against the first listener with a matching origin.
    ///
    /// When several listeners share an origin, the first by name wins.
    /// Returns the name that was credited, if any.
    pub async fn record_listener_activity(&self, origin: Origin) -> Option<String> {
        let mut state = self.state.write().await;
        let status = state.listeners.values_mut().find(|s| s.origin == origin)?;
        status.message_count += 1;
        status.last_message = Some(Utc::now());
        Some(status.name.clone())
    }

    /// Snapshot copy of every listener status, ordered by name.
    pub async fn listener_statuses(&self) -> Vec<ListenerStatus> {
        self.state.read().await.listeners.values().cloned().collect()
    }

    // ── Notification log ────────────────────────────────────────────

    /// Append to the notification log, evicting the oldest entry at capacity.
    pub async fn add_notification(&self, entry: NotificationLogEntry) {
        let mut state = self.state.write().await;
        if state.notifications.len() >= MAX_NOTIFICATIONS {
            state.notifications.pop_front();
        }
        state.notifications.push_back(entry);
    }

    /// Most recent notifications, newest first. `limit == 0` returns all.
    pub async fn recent_notifications(&self, limit: usize) -> Vec<NotificationLogEntry> {
        let state = self.state.read().await;
        let limit = effective_limit(limit, state.notifications.len());
        state.notifications.iter().rev().take(limit).cloned().collect()
    }

    // ── Aggregates ──────────────────────────────────────────────────

    pub async fn stats(&self) -> Stats {
        self.state.read().await.stats.clone()
    }

    /// Action items from the newest records first, up to `limit`
    /// (`0` means no limit).
    pub async fn action_items(&self, limit: usize) -> Vec<ActionItemView> {
        let state = self.state.read().await;
        let limit = if limit == 0 { usize::MAX } else { limit };

        let mut result = Vec::new();
        for record in state.records.iter_recent() {
            let Some(classification) = &record.classification else {
                continue;
            };
            for (idx, item) in classification.action_items.iter().enumerate() {
                if result.len() >= limit {
                    return result;
                }
                result.push(ActionItemView {
                    item: item.clone(),
                    event: record.event.clone(),
                    event_created: idx < record.events_created,
                    processed_at: record.processed_at,
                });
            }
        }
        result
    }

    // ── Live updates ────────────────────────────────────────────────

    /// Register a live subscriber. Pair with exactly one `unsubscribe`.
    pub fn subscribe(&self) -> Subscription {
        self.live.subscribe()
    }

    /// Remove a subscriber from the broadcast set and close its mailbox.
    pub fn unsubscribe(&self, subscription: Subscription) {
        self.live.unsubscribe(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        self.live.len()
    }
}

fn effective_limit(limit: usize, available: usize) -> usize {
    if limit == 0 || limit > available {
        available
    } else {
        limit
    }
}

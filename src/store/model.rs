//! Records held by the observability store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::types::{ActionItem, ClassificationResult, Event, Origin};

/// The stored outcome of processing one event.
///
/// Created exactly once per event, including when classification failed
/// (`classification` is `None` then). Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub event: Event,
    pub classification: Option<ClassificationResult>,
    /// First successful notification, if any was sent.
    pub notified_at: Option<DateTime<Utc>>,
    /// Number of calendar events successfully created.
    pub events_created: usize,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedRecord {
    /// Record for an event whose classification failed.
    pub fn unclassified(event: Event) -> Self {
        Self {
            event,
            classification: None,
            notified_at: None,
            events_created: 0,
            processed_at: Utc::now(),
        }
    }

    pub fn is_urgent(&self) -> bool {
        self.classification.as_ref().is_some_and(|c| c.is_urgent)
    }

    pub fn action_item_count(&self) -> usize {
        self.classification
            .as_ref()
            .map_or(0, |c| c.action_items.len())
    }
}

/// Liveness and activity snapshot for one registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListenerStatus {
    pub name: String,
    pub origin: Origin,
    pub connected: bool,
    pub message_count: u64,
    pub last_message: Option<DateTime<Utc>>,
}

/// Why a notification was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationReason {
    Urgent,
    ActionItem,
}

impl NotificationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::ActionItem => "action_item",
        }
    }
}

/// One successfully sent notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    /// The triggering (original) event.
    pub event: Event,
    pub reason: NotificationReason,
    pub sent_at: DateTime<Utc>,
}

impl NotificationLogEntry {
    pub fn new(event: Event, reason: NotificationReason) -> Self {
        Self {
            event,
            reason,
            sent_at: Utc::now(),
        }
    }
}

/// An action item paired with the event it was extracted from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionItemView {
    pub item: ActionItem,
    pub event: Event,
    /// Positional guess: the Nth item of a record counts as created iff
    /// N < that record's `events_created`. Misattributes partial failures.
    pub event_created: bool,
    pub processed_at: DateTime<Utc>,
}

/// Running aggregate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_events: u64,
    pub urgent_events: u64,
    pub total_action_items: u64,
    /// Records that had at least one notification sent.
    pub notifications_sent: u64,
    pub events_created: u64,
    pub by_origin: BTreeMap<Origin, u64>,
}

impl Stats {
    /// Apply the delta contributed by one inserted record.
    pub fn record(&mut self, record: &ProcessedRecord) {
        self.total_events += 1;
        *self.by_origin.entry(record.event.origin).or_default() += 1;
        if record.is_urgent() {
            self.urgent_events += 1;
        }
        self.total_action_items += record.action_item_count() as u64;
        if record.notified_at.is_some() {
            self.notifications_sent += 1;
        }
        self.events_created += record.events_created as u64;
    }
}

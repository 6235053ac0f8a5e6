//! Shared types for the event pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default estimated duration for an action item, in minutes.
pub const DEFAULT_DURATION_MINUTES: u32 = 30;

// ── Origin ──────────────────────────────────────────────────────────

/// The external platform an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    WhatsApp,
    Telegram,
    Slack,
    Gmail,
}

impl Origin {
    /// Every supported origin.
    pub const ALL: [Origin; 4] = [Self::WhatsApp, Self::Telegram, Self::Slack, Self::Gmail];

    /// Lowercase tag used in logs, query strings and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WhatsApp => "whatsapp",
            Self::Telegram => "telegram",
            Self::Slack => "slack",
            Self::Gmail => "gmail",
        }
    }

    /// Icon prefixed to push notification titles.
    pub fn icon(&self) -> &'static str {
        match self {
            Self::WhatsApp => "💬",
            Self::Telegram => "✈️",
            Self::Slack => "🔔",
            Self::Gmail => "📧",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Origin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown origin: '{s}'"))
    }
}

// ── Event ───────────────────────────────────────────────────────────

/// One inbound unit of communication from any source.
///
/// Sources build these at the moment a native update is observed. The
/// pipeline never mutates an event; derived notifications are new values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source-scoped identifier (not globally unique).
    pub id: String,
    /// Which platform the event came from.
    pub origin: Origin,
    /// Free-text sender label.
    pub sender: String,
    /// Body text, untruncated.
    pub text: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Open key/value metadata. No keys are required.
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Create an event stamped with the current time and a generated id.
    pub fn new(origin: Origin, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Replace the generated id with the platform's native id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Derive the notification event for an action item.
    ///
    /// Identity, origin, sender, timestamp and metadata are carried over;
    /// only the body is replaced with the action item summary.
    pub fn derive_action_notice(&self, item: &ActionItem) -> Event {
        Event {
            id: self.id.clone(),
            origin: self.origin,
            sender: self.sender.clone(),
            text: item.summary(),
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }

    /// Body text cut to `max_chars` characters for display.
    pub fn preview(&self, max_chars: usize) -> String {
        truncate_chars(&self.text, max_chars)
    }
}

/// Truncate on a char boundary, appending "..." when anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ── Classification ──────────────────────────────────────────────────

/// A detected follow-up with a concrete deadline.
///
/// Items without a resolvable deadline are never constructed; classifiers
/// drop them before they reach the processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub title: String,
    pub description: String,
    pub deadline: DateTime<Utc>,
    pub duration_minutes: u32,
}

impl ActionItem {
    /// Build an item, defaulting the duration when the raw value is missing
    /// or not positive.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        deadline: DateTime<Utc>,
        duration_minutes: Option<i64>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            deadline,
            duration_minutes: normalize_duration(duration_minutes),
        }
    }

    /// Notification body for this item.
    pub fn summary(&self) -> String {
        format!(
            "Action: {}\nDue: {}\n\n{}",
            self.title,
            self.deadline.format("%b %-d, %Y %-I:%M %p"),
            self.description
        )
    }
}

/// Map a raw duration onto a positive minute count.
pub fn normalize_duration(raw: Option<i64>) -> u32 {
    match raw {
        Some(minutes) if minutes > 0 => u32::try_from(minutes).unwrap_or(u32::MAX),
        _ => DEFAULT_DURATION_MINUTES,
    }
}

/// Outcome of classifying one event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub is_urgent: bool,
    /// In classifier order; never re-sorted downstream.
    pub action_items: Vec<ActionItem>,
}

impl ClassificationResult {
    pub fn urgent() -> Self {
        Self {
            is_urgent: true,
            action_items: Vec::new(),
        }
    }

    pub fn not_urgent() -> Self {
        Self::default()
    }

    pub fn with_action_items(mut self, items: Vec<ActionItem>) -> Self {
        self.action_items = items;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn origin_round_trips_through_str() {
        for origin in Origin::ALL {
            assert_eq!(origin.as_str().parse::<Origin>().unwrap(), origin);
        }
        assert_eq!("Gmail".parse::<Origin>().unwrap(), Origin::Gmail);
        assert!("sms".parse::<Origin>().is_err());
    }

    #[test]
    fn origin_serializes_lowercase() {
        let json = serde_json::to_value(Origin::WhatsApp).unwrap();
        assert_eq!(json, "whatsapp");
    }

    #[test]
    fn duration_defaults_when_not_positive() {
        assert_eq!(normalize_duration(None), 30);
        assert_eq!(normalize_duration(Some(0)), 30);
        assert_eq!(normalize_duration(Some(-15)), 30);
        assert_eq!(normalize_duration(Some(90)), 90);
    }

    #[test]
    fn derived_notice_keeps_identity() {
        let event = Event::new(Origin::Slack, "alice", "standup moved")
            .with_id("C123-456")
            .with_metadata("channel", "general");
        let deadline = Utc.with_ymd_and_hms(2030, 3, 15, 14, 0, 0).unwrap();
        let item = ActionItem::new("Standup", "Moved to the big room", deadline, None);

        let notice = event.derive_action_notice(&item);
        assert_eq!(notice.id, "C123-456");
        assert_eq!(notice.origin, Origin::Slack);
        assert_eq!(notice.sender, "alice");
        assert_eq!(notice.timestamp, event.timestamp);
        assert_eq!(notice.metadata.get("channel").map(String::as_str), Some("general"));
        assert_eq!(
            notice.text,
            "Action: Standup\nDue: Mar 15, 2030 2:00 PM\n\nMoved to the big room"
        );
        // Original is untouched
        assert_eq!(event.text, "standup moved");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let event = Event::new(Origin::Telegram, "bob", "héllo wörld");
        assert_eq!(event.preview(5), "héllo...");
        assert_eq!(event.preview(50), "héllo wörld");
    }
}

//! Offline keyword classifier.
//!
//! Flags urgency on a fixed keyword list over text and sender, and turns
//! explicit timestamps in the text (RFC 3339 or `YYYY-MM-DD HH:MM`, read as
//! UTC) into action items.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Classifier;
use crate::error::ClassifyError;
use crate::pipeline::types::{ActionItem, ClassificationResult, Event, truncate_chars};

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "emergency",
    "critical",
    "help",
    "immediately",
    "deadline",
    "security",
    "breach",
    "down",
    "broken",
    "failed",
    "payment due",
    "transfer",
    "call me",
    "call asap",
];

const TITLE_MAX_CHARS: usize = 60;
const DESCRIPTION_MAX_CHARS: usize = 200;

/// `2030-01-02T03:04`, `2030-01-02 03:04:05`, optional `Z` or `+hh:mm` offset.
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}(?::\d{2})?)(Z|[+-]\d{2}:\d{2})?")
        .expect("timestamp pattern compiles")
});

/// Keyword-based classifier used when no LLM is configured.
#[derive(Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// First urgency keyword found in the event, if any.
    pub fn matched_keyword(&self, event: &Event) -> Option<&'static str> {
        let haystack = format!("{} {}", event.text, event.sender).to_lowercase();
        URGENT_KEYWORDS
            .iter()
            .copied()
            .find(|keyword| haystack.contains(keyword))
    }

    /// Action items for every parseable timestamp in the text.
    pub fn extract_action_items(&self, event: &Event) -> Vec<ActionItem> {
        let title = event
            .text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(|line| truncate_chars(line, TITLE_MAX_CHARS))
            .unwrap_or_else(|| format!("Follow up with {}", event.sender));
        let description = truncate_chars(&event.text, DESCRIPTION_MAX_CHARS);

        TIMESTAMP
            .captures_iter(&event.text)
            .filter_map(|caps| {
                let date = caps.get(1)?.as_str();
                let time = caps.get(2)?.as_str();
                let offset = caps.get(3).map(|m| m.as_str());
                match parse_deadline(date, time, offset) {
                    Some(deadline) => Some(deadline),
                    None => {
                        debug!(date, time, "Skipping unparseable timestamp");
                        None
                    }
                }
            })
            .map(|deadline| ActionItem::new(title.clone(), description.clone(), deadline, None))
            .collect()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn classify(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifyError> {
        if cancel.is_cancelled() {
            return Err(ClassifyError::Cancelled);
        }

        let matched = self.matched_keyword(event);
        if let Some(keyword) = matched {
            info!(keyword_matched = keyword, "Event classified as URGENT (keyword)");
        }

        Ok(ClassificationResult {
            is_urgent: matched.is_some(),
            action_items: self.extract_action_items(event),
        })
    }
}

fn parse_deadline(date: &str, time: &str, offset: Option<&str>) -> Option<DateTime<Utc>> {
    let time = if time.len() == 5 {
        format!("{time}:00")
    } else {
        time.to_string()
    };
    match offset {
        Some(offset) => DateTime::parse_from_rfc3339(&format!("{date}T{time}{offset}"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        None => NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Origin;
    use chrono::TimeZone;

    fn event(text: &str) -> Event {
        Event::new(Origin::WhatsApp, "mom", text)
    }

    #[tokio::test]
    async fn urgent_keyword_detected() {
        let classifier = KeywordClassifier::new();
        let result = classifier
            .classify(&event("Server is DOWN, need help asap"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_urgent);
        assert!(result.action_items.is_empty());
    }

    #[tokio::test]
    async fn keyword_in_sender_counts() {
        let classifier = KeywordClassifier::new();
        let ev = Event::new(Origin::Gmail, "security@bank.example", "Monthly statement");
        let result = classifier.classify(&ev, &CancellationToken::new()).await.unwrap();
        assert!(result.is_urgent);
    }

    #[tokio::test]
    async fn plain_chat_not_urgent() {
        let classifier = KeywordClassifier::new();
        let result = classifier
            .classify(&event("Lovely weather today"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, ClassificationResult::not_urgent());
    }

    #[test]
    fn extracts_naive_timestamp_as_utc() {
        let classifier = KeywordClassifier::new();
        let items =
            classifier.extract_action_items(&event("Dentist appointment\non 2099-03-15 14:00"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Dentist appointment");
        assert_eq!(
            items[0].deadline,
            Utc.with_ymd_and_hms(2099, 3, 15, 14, 0, 0).unwrap()
        );
        assert_eq!(items[0].duration_minutes, 30);
    }

    #[test]
    fn extracts_rfc3339_with_offset() {
        let classifier = KeywordClassifier::new();
        let items = classifier.extract_action_items(&event("Call at 2099-01-02T09:30:00+02:00 ok"));
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].deadline,
            Utc.with_ymd_and_hms(2099, 1, 2, 7, 30, 0).unwrap()
        );
    }

    #[test]
    fn invalid_dates_are_dropped() {
        let classifier = KeywordClassifier::new();
        let items = classifier.extract_action_items(&event("Party on 2099-13-45 25:00 maybe"));
        assert!(items.is_empty());
        let items = classifier.extract_action_items(&event("sometime next week"));
        assert!(items.is_empty());
    }

    #[test]
    fn timestamp_pattern_captures_date_time_and_offset() {
        let caps = TIMESTAMP.captures("at 2099-01-02 09:30:15Z sharp").unwrap();
        assert_eq!(&caps[1], "2099-01-02");
        assert_eq!(&caps[2], "09:30:15");
        assert_eq!(&caps[3], "Z");
        assert!(TIMESTAMP.captures("12099-01-02").is_none());
    }

    #[tokio::test]
    async fn cancelled_before_start_fails_fast() {
        let classifier = KeywordClassifier::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = classifier.classify(&event("hello"), &cancel).await;
        assert!(matches!(result, Err(ClassifyError::Cancelled)));
    }
}

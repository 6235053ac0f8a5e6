//! LLM classifier: OpenAI chat completions with a JSON-object response.
//!
//! The model returns `{"urgent": bool, "action_items": [...]}`. Items need an
//! RFC 3339 `datetime`; undated or unparseable ones are dropped here so they
//! never reach the processor. Replies that are not JSON fall back to a
//! plain `URGENT` string match.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Classifier;
use crate::error::ClassifyError;
use crate::pipeline::types::{ActionItem, ClassificationResult, Event};

/// Default OpenAI-compatible API base.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model when `NOTIFY_LLM_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "gpt-5-nano";

/// Per-request timeout; cancellation may cut it shorter.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Completion budget for one classification.
const MAX_COMPLETION_TOKENS: u32 = 4096;

const PROVIDER: &str = "openai";

/// Configuration for the LLM classifier.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
}

impl LlmConfig {
    /// Build from environment. Returns `None` when `OPENAI_API_KEY` is unset.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())?;
        let model = std::env::var("NOTIFY_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Some(Self {
            api_key: SecretString::from(api_key),
            model,
            base_url,
        })
    }
}

/// Classifier backed by an OpenAI-compatible chat completions API.
pub struct LlmClassifier {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmClassifier {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    async fn complete(&self, event: &Event) -> Result<String, ClassifyError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": build_system_prompt() },
                { "role": "user", "content": build_user_prompt(event) },
            ],
            "max_completion_tokens": MAX_COMPLETION_TOKENS,
            "response_format": { "type": "json_object" },
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed(format!("request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(request_failed(format!("HTTP {status}: {text}")));
        }

        let data: ChatCompletion = resp
            .json()
            .await
            .map_err(|e| invalid_response(format!("malformed completion: {e}")))?;

        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| invalid_response("no choices returned".into()))?;

        let content = choice.message.content.unwrap_or_default().trim().to_string();
        if content.is_empty() {
            return Err(invalid_response(format!(
                "empty response (finish_reason={})",
                choice.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }

        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("unknown"),
            content = %content,
            "LLM raw response"
        );
        Ok(content)
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn classify(
        &self,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<ClassificationResult, ClassifyError> {
        debug!(
            origin = %event.origin,
            sender = %event.sender,
            text_preview = %event.preview(50),
            "Classifying event"
        );

        let content = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifyError::Cancelled),
            content = self.complete(event) => content?,
        };

        match parse_classification(&content) {
            Ok(result) => {
                info!(
                    is_urgent = result.is_urgent,
                    action_items = result.action_items.len(),
                    model = %self.config.model,
                    "LLM classification result"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    content = %content,
                    "Failed to parse LLM JSON, falling back to string match"
                );
                Ok(fallback_string_match(&content))
            }
        }
    }
}

fn request_failed(reason: String) -> ClassifyError {
    ClassifyError::RequestFailed {
        provider: PROVIDER.into(),
        reason,
    }
}

fn invalid_response(reason: String) -> ClassifyError {
    ClassifyError::InvalidResponse {
        provider: PROVIDER.into(),
        reason,
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Classification payload the model is asked to produce.
#[derive(Debug, Deserialize)]
struct LlmResponse {
    #[serde(default)]
    urgent: bool,
    #[serde(default)]
    action_items: Vec<LlmActionItem>,
}

#[derive(Debug, Deserialize)]
struct LlmActionItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    datetime: String,
    #[serde(default)]
    duration_minutes: Option<i64>,
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_system_prompt() -> &'static str {
    "You are a message analysis assistant. Analyze the message and return a JSON object \
     with two fields:\n\n\
     1. \"urgent\" (boolean): true if the message requires immediate attention.\n\
        Urgent: emergencies, safety concerns, immediate deadlines, financial/security alerts, \
        health concerns, explicit urgency (ASAP, urgent, critical).\n\
        Not urgent: general conversation, marketing, newsletters, routine updates.\n\n\
     2. \"action_items\" (array): action items that have a specific date or deadline. \
        Each item has:\n\
        - \"title\": short summary of the action\n\
        - \"description\": fuller context\n\
        - \"datetime\": RFC 3339 datetime (e.g. \"2025-03-15T14:00:00Z\"). Only include if \
        a specific date/time is mentioned or can be inferred.\n\
        - \"duration_minutes\": estimated duration in minutes (30 if unclear)\n\
        Return an empty array when there are no dated action items.\n\n\
     Respond with ONLY valid JSON, no markdown fences. Example:\n\
     {\"urgent\": false, \"action_items\": [{\"title\": \"Team meeting\", \
     \"description\": \"Weekly sync\", \"datetime\": \"2025-03-15T14:00:00Z\", \
     \"duration_minutes\": 60}]}"
}

fn build_user_prompt(event: &Event) -> String {
    format!(
        "Source: {}\nFrom: {}\nTime: {}\n\nMessage:\n{}",
        event.origin,
        event.sender,
        event.timestamp.to_rfc3339(),
        event.text
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model's JSON into a classification, dropping undated items.
fn parse_classification(raw: &str) -> Result<ClassificationResult, String> {
    let json = extract_json_object(raw);
    let response: LlmResponse =
        serde_json::from_str(&json).map_err(|e| format!("JSON parse error: {e}"))?;

    let action_items = response
        .action_items
        .into_iter()
        .filter_map(|item| {
            if item.datetime.trim().is_empty() {
                debug!(title = %item.title, "Dropping action item without datetime");
                return None;
            }
            match DateTime::parse_from_rfc3339(item.datetime.trim()) {
                Ok(deadline) => Some(ActionItem::new(
                    item.title,
                    item.description,
                    deadline.with_timezone(&Utc),
                    item.duration_minutes,
                )),
                Err(e) => {
                    warn!(
                        datetime = %item.datetime,
                        error = %e,
                        "Failed to parse action item datetime"
                    );
                    None
                }
            }
        })
        .collect();

    Ok(ClassificationResult {
        is_urgent: response.urgent,
        action_items,
    })
}

/// Plain-text fallback: urgent iff `URGENT` appears without `NOT_URGENT`.
fn fallback_string_match(content: &str) -> ClassificationResult {
    let upper = content.to_uppercase();
    let is_urgent = upper.contains("URGENT") && !upper.contains("NOT_URGENT");
    info!(is_urgent, "Fallback string classification");
    ClassificationResult {
        is_urgent,
        action_items: Vec::new(),
    }
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Origin;
    use chrono::TimeZone;

    #[test]
    fn parse_urgent_without_items() {
        let result = parse_classification(r#"{"urgent": true, "action_items": []}"#).unwrap();
        assert!(result.is_urgent);
        assert!(result.action_items.is_empty());
    }

    #[test]
    fn parse_action_item_with_deadline() {
        let raw = r#"{"urgent": false, "action_items": [
            {"title": "Team meeting", "description": "Weekly sync",
             "datetime": "2030-03-15T14:00:00Z", "duration_minutes": 60}
        ]}"#;
        let result = parse_classification(raw).unwrap();
        assert!(!result.is_urgent);
        assert_eq!(result.action_items.len(), 1);
        let item = &result.action_items[0];
        assert_eq!(item.title, "Team meeting");
        assert_eq!(item.deadline, Utc.with_ymd_and_hms(2030, 3, 15, 14, 0, 0).unwrap());
        assert_eq!(item.duration_minutes, 60);
    }

    #[test]
    fn parse_drops_missing_and_bad_datetimes() {
        let raw = r#"{"urgent": false, "action_items": [
            {"title": "No date", "description": ""},
            {"title": "Empty date", "datetime": ""},
            {"title": "Garbage", "datetime": "next tuesday"},
            {"title": "Naive", "datetime": "2030-03-15 14:00"},
            {"title": "Keep", "datetime": "2030-03-15T14:00:00+01:00"}
        ]}"#;
        let result = parse_classification(raw).unwrap();
        let titles: Vec<&str> = result.action_items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Keep"]);
        assert_eq!(
            result.action_items[0].deadline,
            Utc.with_ymd_and_hms(2030, 3, 15, 13, 0, 0).unwrap()
        );
    }

    #[test]
    fn parse_defaults_non_positive_duration() {
        let raw = r#"{"urgent": false, "action_items": [
            {"title": "a", "datetime": "2030-01-01T00:00:00Z", "duration_minutes": 0},
            {"title": "b", "datetime": "2030-01-01T00:00:00Z", "duration_minutes": -5},
            {"title": "c", "datetime": "2030-01-01T00:00:00Z"}
        ]}"#;
        let result = parse_classification(raw).unwrap();
        assert!(result.action_items.iter().all(|i| i.duration_minutes == 30));
    }

    #[test]
    fn parse_preserves_classifier_order() {
        let raw = r#"{"urgent": false, "action_items": [
            {"title": "later", "datetime": "2031-01-01T00:00:00Z"},
            {"title": "sooner", "datetime": "2030-01-01T00:00:00Z"}
        ]}"#;
        let result = parse_classification(raw).unwrap();
        assert_eq!(result.action_items[0].title, "later");
        assert_eq!(result.action_items[1].title, "sooner");
    }

    #[test]
    fn parse_markdown_wrapped_json() {
        let raw = "```json\n{\"urgent\": true, \"action_items\": []}\n```";
        assert!(parse_classification(raw).unwrap().is_urgent);
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(parse_classification("URGENT").is_err());
    }

    #[test]
    fn fallback_matches_urgent_keyword() {
        assert!(fallback_string_match("This is urgent").is_urgent);
        assert!(!fallback_string_match("NOT_URGENT").is_urgent);
        assert!(!fallback_string_match("all calm").is_urgent);
    }

    #[test]
    fn extract_json_embedded_in_text() {
        let input = "Result: {\"urgent\": false} done.";
        assert_eq!(extract_json_object(input), "{\"urgent\": false}");
    }

    #[test]
    fn user_prompt_includes_event_fields() {
        let event = Event::new(Origin::Gmail, "boss@corp.example", "Report due Friday");
        let prompt = build_user_prompt(&event);
        assert!(prompt.contains("Source: gmail"));
        assert!(prompt.contains("From: boss@corp.example"));
        assert!(prompt.contains("Report due Friday"));
    }

    #[tokio::test]
    async fn cancellation_wins_over_request() {
        // Unroutable base URL: the request would hang or fail, cancellation
        // must short-circuit first.
        let classifier = LlmClassifier::new(LlmConfig {
            api_key: SecretString::from("sk-test"),
            model: DEFAULT_MODEL.into(),
            base_url: "http://10.255.255.1:9".into(),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let event = Event::new(Origin::Slack, "a", "b");
        let result = classifier.classify(&event, &cancel).await;
        assert!(matches!(result, Err(ClassifyError::Cancelled)));
    }
}

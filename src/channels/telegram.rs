//! Telegram source: long-polls the Bot API for updates.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Source;
use crate::error::{QueueError, SourceError};
use crate::pipeline::queue::EventSender;
use crate::pipeline::types::{Event, Origin};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Server-side long-poll timeout in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram bot settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric user ids; `*` admits everyone.
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    /// Build from environment. `None` when `TELEGRAM_BOT_TOKEN` is unset.
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())?;
        let allowed_users = std::env::var("TELEGRAM_ALLOWED_USERS")
            .map(|raw| parse_allowed_users(&raw))
            .unwrap_or_default();

        Some(Self {
            bot_token: SecretString::from(bot_token),
            allowed_users,
        })
    }
}

fn parse_allowed_users(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|u| u.trim().trim_start_matches('@'))
        .filter(|u| !u.is_empty())
        .map(String::from)
        .collect()
}

/// Telegram listener: connects to the Bot API via long polling.
pub struct TelegramSource {
    config: TelegramConfig,
    client: reqwest::Client,
    api_base: String,
}

impl TelegramSource {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            api_base: TELEGRAM_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base.trim_end_matches('/'),
            self.config.bot_token.expose_secret()
        )
    }

    /// Check if any of the provided identities is allowed.
    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        check_user_allowed(&self.config.allowed_users, identities)
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Value>, PollError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .json(&body)
            .send()
            .await
            .map_err(|e| PollError::Transient(format!("poll error: {e}")))?;

        let status = resp.status().as_u16();
        let data: Value = match resp.json().await {
            Ok(data) => data,
            Err(e) => return Err(PollError::classify(status, format!("parse error: {e}"))),
        };

        if data.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = data
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            let code = data
                .get("error_code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .unwrap_or(status);
            return Err(PollError::classify(code, format!("API error {code}: {description}")));
        }

        Ok(data
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Convert one update into an event, applying the allowlist.
    fn event_from_update(&self, update: &Value) -> Option<Event> {
        let message = update.get("message")?;
        let text = message.get("text").and_then(Value::as_str)?;

        let from = message.get("from");
        let username = from
            .and_then(|f| f.get("username"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let user_id = from
            .and_then(|f| f.get("id"))
            .and_then(Value::as_i64)
            .map(|id| id.to_string());

        let mut identities = vec![username];
        if let Some(id) = user_id.as_deref() {
            identities.push(id);
        }
        if !self.is_any_user_allowed(identities) {
            warn!(
                username,
                user_id = user_id.as_deref().unwrap_or("unknown"),
                "Telegram: ignoring message from unauthorized user"
            );
            return None;
        }

        let chat_id = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .unwrap_or_default();
        let sender = from
            .and_then(|f| f.get("first_name"))
            .and_then(Value::as_str)
            .unwrap_or(username);

        let mut event = Event::new(Origin::Telegram, sender, text)
            .with_metadata("chat_id", chat_id)
            .with_metadata("username", username);

        if let Some(message_id) = message.get("message_id").and_then(Value::as_i64) {
            event = event.with_id(format!("tg-{message_id}"));
        }
        if let Some(ts) = message
            .get("date")
            .and_then(Value::as_i64)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        {
            event = event.with_timestamp(ts);
        }

        Some(event)
    }
}

#[async_trait]
impl Source for TelegramSource {
    fn name(&self) -> &str {
        "Telegram"
    }

    fn origin(&self) -> Origin {
        Origin::Telegram
    }

    async fn run(&self, queue: EventSender, cancel: CancellationToken) -> Result<(), SourceError> {
        let mut offset: i64 = 0;
        let mut connected = false;
        info!("Telegram listener polling for messages");

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.get_updates(offset) => polled,
            };

            let updates = match polled {
                Ok(updates) => {
                    connected = true;
                    updates
                }
                Err(PollError::Fatal(reason)) => {
                    error!(error = %reason, "Telegram poll rejected, listener terminating");
                    let name = self.name().to_string();
                    return Err(if connected {
                        SourceError::Disconnected { name, reason }
                    } else {
                        SourceError::StartupFailed { name, reason }
                    });
                }
                Err(PollError::Transient(reason)) => {
                    warn!(error = %reason, "Telegram poll failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(ERROR_BACKOFF) => continue,
                    }
                }
            };

            for update in &updates {
                // Advance offset past this update
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;
                }

                let Some(event) = self.event_from_update(update) else {
                    continue;
                };
                debug!(sender = %event.sender, id = %event.id, "Telegram message received");

                match queue.submit(event, &cancel).await {
                    Ok(()) => {}
                    Err(QueueError::Cancelled) => {
                        info!("Telegram listener stopping");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!("Telegram listener stopping");
        Ok(())
    }
}

/// Why a poll failed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PollError {
    /// Transport failures, rate limits and server errors; retried after a pause.
    Transient(String),
    /// Rejected token or unknown bot; retrying cannot succeed.
    Fatal(String),
}

impl PollError {
    fn classify(status: u16, reason: String) -> Self {
        match status {
            401 | 403 | 404 => Self::Fatal(reason),
            _ => Self::Transient(reason),
        }
    }
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

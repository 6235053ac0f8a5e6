//! Pushover notifier: high-priority push via the Pushover messages API.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Notifier;
use crate::error::{ConfigError, NotifyError};
use crate::pipeline::types::{Event, Origin};

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

/// Pushover's hard limit is 1024; keep bodies short on the lock screen.
const MAX_BODY_CHARS: usize = 500;

/// High priority: bypasses quiet hours.
const PRIORITY_HIGH: &str = "1";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const TRANSPORT: &str = "pushover";

/// Pushover credentials.
#[derive(Debug, Clone)]
pub struct PushoverConfig {
    pub app_token: SecretString,
    pub user_token: SecretString,
}

impl PushoverConfig {
    /// Build from environment. `Ok(None)` when `PUSHOVER_APP_TOKEN` is unset.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(app_token) = std::env::var("PUSHOVER_APP_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
        else {
            return Ok(None);
        };
        let user_token = std::env::var("PUSHOVER_USER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "PUSHOVER_USER_TOKEN".into(),
                hint: "Set it alongside PUSHOVER_APP_TOKEN.".into(),
            })?;

        Ok(Some(Self {
            app_token: SecretString::from(app_token),
            user_token: SecretString::from(user_token),
        }))
    }
}

/// Sends notifications through Pushover.
pub struct PushoverNotifier {
    config: PushoverConfig,
    client: reqwest::Client,
    api_url: String,
}

impl PushoverNotifier {
    pub fn new(config: PushoverConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            api_url: PUSHOVER_API_URL.to_string(),
        }
    }

    /// Point at a different endpoint (used by tests).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    async fn send(&self, event: &Event) -> Result<(), NotifyError> {
        let title = format_title(event);
        let body = format_body(event);
        let mut form: Vec<(&str, String)> = vec![
            ("token", self.config.app_token.expose_secret().to_string()),
            ("user", self.config.user_token.expose_secret().to_string()),
            ("title", title),
            ("message", body),
            ("priority", PRIORITY_HIGH.to_string()),
            ("sound", "persistent".to_string()),
        ];
        if let Some(url) = event_url(event) {
            form.push(("url", url));
            form.push(("url_title", "Open in app".to_string()));
        }

        let resp = self
            .client
            .post(&self.api_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| NotifyError::SendFailed {
                transport: TRANSPORT.into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let reply: PushoverReply = resp.json().await.unwrap_or_default();
        if !status.is_success() || reply.status != 1 {
            return Err(NotifyError::Rejected {
                transport: TRANSPORT.into(),
                reason: format!("HTTP {status}: {}", reply.errors.join("; ")),
            });
        }

        info!(
            origin = %event.origin,
            sender = %event.sender,
            request = %reply.request,
            "Pushover notification sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    fn name(&self) -> &str {
        TRANSPORT
    }

    async fn notify(&self, event: &Event, cancel: &CancellationToken) -> Result<(), NotifyError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(NotifyError::Cancelled),
            sent = self.send(event) => sent,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct PushoverReply {
    #[serde(default)]
    status: i64,
    #[serde(default)]
    request: String,
    #[serde(default)]
    errors: Vec<String>,
}

fn format_title(event: &Event) -> String {
    format!("{} {}: {}", event.origin.icon(), event.origin, event.sender)
}

fn format_body(event: &Event) -> String {
    if event.text.chars().count() > MAX_BODY_CHARS {
        let cut: String = event.text.chars().take(MAX_BODY_CHARS - 3).collect();
        format!("{cut}...")
    } else {
        event.text.clone()
    }
}

/// Deep link back to the message, where the platform has one.
fn event_url(event: &Event) -> Option<String> {
    match event.origin {
        Origin::Gmail if !event.id.is_empty() => Some(format!(
            "https://mail.google.com/mail/u/0/#inbox/{}",
            event.id
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PushoverConfig {
        PushoverConfig {
            app_token: SecretString::from("app"),
            user_token: SecretString::from("user"),
        }
    }

    #[test]
    fn title_includes_icon_origin_and_sender() {
        let event = Event::new(Origin::Telegram, "Bob", "hi");
        assert_eq!(format_title(&event), "✈️ telegram: Bob");
    }

    #[test]
    fn body_truncated_to_limit() {
        let event = Event::new(Origin::Slack, "a", "y".repeat(800));
        let body = format_body(&event);
        assert_eq!(body.chars().count(), MAX_BODY_CHARS);
        assert!(body.ends_with("..."));

        let short = Event::new(Origin::Slack, "a", "short");
        assert_eq!(format_body(&short), "short");
    }

    #[test]
    fn gmail_events_get_deep_link() {
        let event = Event::new(Origin::Gmail, "a", "b").with_id("18c2f");
        assert_eq!(
            event_url(&event).as_deref(),
            Some("https://mail.google.com/mail/u/0/#inbox/18c2f")
        );
        let slack = Event::new(Origin::Slack, "a", "b");
        assert!(event_url(&slack).is_none());
    }

    #[tokio::test]
    async fn cancelled_notify_fails_fast() {
        let notifier = PushoverNotifier::new(config()).with_api_url("http://10.255.255.1:9");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let event = Event::new(Origin::Slack, "a", "b");
        let result = notifier.notify(&event, &cancel).await;
        assert!(matches!(result, Err(NotifyError::Cancelled)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_send_failure() {
        let notifier =
            PushoverNotifier::new(config()).with_api_url("http://127.0.0.1:1/messages.json");
        let event = Event::new(Origin::Slack, "a", "b");
        let result = notifier.notify(&event, &CancellationToken::new()).await;
        assert!(matches!(result, Err(NotifyError::SendFailed { .. })));
    }
}

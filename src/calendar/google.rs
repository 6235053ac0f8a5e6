//! Google Calendar event creator (Calendar v3 REST API).
//!
//! Authenticates with a bearer token from [`TokenSource`]: either a fixed
//! access token or one minted from an OAuth2 refresh token.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::CalendarCreator;
use super::oauth::{OAuthCredentials, TokenSource};
use crate::error::{CalendarError, ConfigError};
use crate::pipeline::types::{ActionItem, Event};

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const REFRESH_KEYS: [&str; 3] = [
    "GOOGLE_CLIENT_ID",
    "GOOGLE_CLIENT_SECRET",
    "GOOGLE_REFRESH_TOKEN",
];

/// How the creator obtains access tokens.
#[derive(Debug, Clone)]
pub enum CalendarAuth {
    /// Token obtained out of band; expires on Google's schedule.
    AccessToken(SecretString),
    /// Refresh-token flow; access tokens are renewed as needed.
    Refresh(OAuthCredentials),
}

/// Google Calendar settings.
#[derive(Debug, Clone)]
pub struct GoogleCalendarConfig {
    pub auth: CalendarAuth,
    pub calendar_id: String,
}

impl GoogleCalendarConfig {
    /// Build from environment.
    ///
    /// `Ok(None)` unless `GOOGLE_CALENDAR_ENABLED` is truthy. When enabled,
    /// `GOOGLE_CLIENT_ID`, `GOOGLE_CLIENT_SECRET` and `GOOGLE_REFRESH_TOKEN`
    /// are used if all are set; otherwise `GOOGLE_CALENDAR_ACCESS_TOKEN` is
    /// required unless `dry_run` is set.
    pub fn from_env(dry_run: bool) -> Result<Option<Self>, ConfigError> {
        let enabled = std::env::var("GOOGLE_CALENDAR_ENABLED")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        if !enabled {
            return Ok(None);
        }

        let calendar_id = std::env::var("GOOGLE_CALENDAR_ID")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| "primary".to_string());
        let auth = auth_from_lookup(dry_run, |key| std::env::var(key).ok())?;

        Ok(Some(Self { auth, calendar_id }))
    }
}

/// Resolve credentials through `lookup`; blank values count as unset.
fn auth_from_lookup(
    dry_run: bool,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<CalendarAuth, ConfigError> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let [client_id, client_secret, refresh_token] = REFRESH_KEYS.map(get);
    match (client_id, client_secret, refresh_token) {
        (Some(client_id), Some(client_secret), Some(refresh_token)) => {
            return Ok(CalendarAuth::Refresh(OAuthCredentials {
                client_id,
                client_secret: SecretString::from(client_secret),
                refresh_token: SecretString::from(refresh_token),
            }));
        }
        (None, None, None) => {}
        (client_id, client_secret, _) => {
            let missing = if client_id.is_none() {
                REFRESH_KEYS[0]
            } else if client_secret.is_none() {
                REFRESH_KEYS[1]
            } else {
                REFRESH_KEYS[2]
            };
            return Err(ConfigError::MissingRequired {
                key: missing.into(),
                hint: "Set all of GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and \
                       GOOGLE_REFRESH_TOKEN, or none of them."
                    .into(),
            });
        }
    }

    match get("GOOGLE_CALENDAR_ACCESS_TOKEN") {
        Some(token) => Ok(CalendarAuth::AccessToken(SecretString::from(token))),
        None if dry_run => Ok(CalendarAuth::AccessToken(SecretString::from(""))),
        None => Err(ConfigError::MissingRequired {
            key: "GOOGLE_REFRESH_TOKEN".into(),
            hint: "Provide GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REFRESH_TOKEN, \
                   or an access token in GOOGLE_CALENDAR_ACCESS_TOKEN."
                .into(),
        }),
    }
}

/// Creates events in a Google Calendar.
pub struct GoogleCalendarCreator {
    calendar_id: String,
    tokens: TokenSource,
    client: reqwest::Client,
    api_base: String,
}

impl GoogleCalendarCreator {
    pub fn new(config: GoogleCalendarConfig) -> Self {
        let tokens = match config.auth {
            CalendarAuth::AccessToken(token) => TokenSource::fixed(token),
            CalendarAuth::Refresh(credentials) => TokenSource::refreshing(credentials),
        };
        Self {
            calendar_id: config.calendar_id,
            tokens,
            client: reqwest::Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.tokens = self.tokens.with_token_url(url);
        self
    }

    /// `{base}/calendars/{id}/events`, with the id percent-encoded as one
    /// path segment.
    fn events_url(&self) -> Result<reqwest::Url, CalendarError> {
        let mut url = reqwest::Url::parse(&self.api_base)
            .map_err(|e| CalendarError::RequestFailed(format!("invalid API base: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| CalendarError::RequestFailed("API base cannot hold a path".into()))?
            .pop_if_empty()
            .extend(["calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }

    /// Request body for one action item.
    fn event_body(&self, item: &ActionItem, event: &Event) -> serde_json::Value {
        let start = item.deadline;
        let end = start + chrono::Duration::minutes(i64::from(item.duration_minutes));

        serde_json::json!({
            "summary": item.title,
            "description": format!(
                "Source: {}\nFrom: {}\n\n{}",
                event.origin, event.sender, item.description
            ),
            "start": { "dateTime": start.to_rfc3339() },
            "end": { "dateTime": end.to_rfc3339() },
        })
    }

    async fn insert(&self, item: &ActionItem, event: &Event) -> Result<(), CalendarError> {
        let url = self.events_url()?;
        let body = self.event_body(item, event);

        let token = self.tokens.access_token().await?;
        let created = match self.post_event(&url, &token, &body).await {
            Err(CalendarError::Rejected { status: 401, .. }) if self.tokens.can_refresh() => {
                warn!(title = %item.title, "Calendar rejected access token, refreshing");
                self.tokens.invalidate(&token).await;
                let token = self.tokens.access_token().await?;
                self.post_event(&url, &token, &body).await?
            }
            other => other?,
        };

        info!(
            title = %item.title,
            start = %item.deadline.to_rfc3339(),
            link = created.get("htmlLink").and_then(|v| v.as_str()).unwrap_or(""),
            "Calendar event created"
        );
        Ok(())
    }

    async fn post_event(
        &self,
        url: &reqwest::Url,
        token: &SecretString,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, CalendarError> {
        let resp = self
            .client
            .post(url.clone())
            .bearer_auth(token.expose_secret())
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| CalendarError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await.unwrap_or_default())
    }
}

#[async_trait]
impl CalendarCreator for GoogleCalendarCreator {
    fn name(&self) -> &str {
        "google-calendar"
    }

    async fn create_event(
        &self,
        item: &ActionItem,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), CalendarError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CalendarError::Cancelled),
            created = self.insert(item, event) => created,
        }
    }
}

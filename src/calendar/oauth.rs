//! Access tokens for the Calendar API.
//!
//! Either a fixed bearer token, or an OAuth2 refresh token exchanged at the
//! Google token endpoint. Refreshed tokens are cached until shortly before
//! they expire; concurrent callers share one refresh.

use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::CalendarError;

pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the reported expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Upper bound on a reported token lifetime.
const MAX_LIFETIME_SECS: i64 = 24 * 60 * 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// OAuth2 client credentials plus a long-lived refresh token.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug)]
struct CachedToken {
    value: SecretString,
    /// `None` for tokens with no known lifetime.
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_none_or(|at| now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < at)
    }
}

/// Hands out a usable access token.
pub struct TokenSource {
    credentials: Option<OAuthCredentials>,
    token_url: String,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// A token obtained out of band. Never refreshed.
    pub fn fixed(token: SecretString) -> Self {
        Self {
            credentials: None,
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client: reqwest::Client::new(),
            cached: Mutex::new(Some(CachedToken {
                value: token,
                expires_at: None,
            })),
        }
    }

    /// Tokens minted from a refresh token on first use and before expiry.
    pub fn refreshing(credentials: OAuthCredentials) -> Self {
        Self {
            credentials: Some(credentials),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client: reqwest::Client::new(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn can_refresh(&self) -> bool {
        self.credentials.is_some()
    }

    /// Current token, refreshing first if it is missing or about to expire.
    pub async fn access_token(&self) -> Result<SecretString, CalendarError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let Some(credentials) = &self.credentials else {
            // Fixed tokens are handed out even past expiry; the API decides.
            return cached
                .as_ref()
                .map(|t| t.value.clone())
                .ok_or_else(|| CalendarError::Auth("no access token configured".into()));
        };

        let fresh = self.refresh(credentials).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Forget `rejected` so the next call refreshes. A token some other
    /// caller has already replaced is left alone.
    pub async fn invalidate(&self, rejected: &SecretString) {
        if !self.can_refresh() {
            return;
        }
        let mut cached = self.cached.lock().await;
        if cached
            .as_ref()
            .is_some_and(|t| t.value.expose_secret() == rejected.expose_secret())
        {
            debug!("Dropping rejected calendar access token");
            *cached = None;
        }
    }

    async fn refresh(&self, credentials: &OAuthCredentials) -> Result<CachedToken, CalendarError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose_secret()),
            ("refresh_token", credentials.refresh_token.expose_secret()),
        ];
        let resp = self
            .client
            .post(&self.token_url)
            .timeout(REQUEST_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| CalendarError::Auth(format!("token request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalendarError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| CalendarError::Auth(format!("invalid token response: {e}")))?;
        let expires_at = token.expires_in.map(|secs| {
            Utc::now() + chrono::Duration::seconds(secs.clamp(0, MAX_LIFETIME_SECS))
        });

        info!(expires_in = ?token.expires_in, "Calendar access token refreshed");
        Ok(CachedToken {
            value: SecretString::from(token.access_token),
            expires_at,
        })
    }
}

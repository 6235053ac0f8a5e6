//! Calendar event creation for detected action items.

pub mod google;
pub mod oauth;

pub use google::{CalendarAuth, GoogleCalendarConfig, GoogleCalendarCreator};
pub use oauth::{OAuthCredentials, TokenSource};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CalendarError;
use crate::pipeline::types::{ActionItem, Event};

/// Creates one calendar event per action item. Failures are not retried by
/// the pipeline.
#[async_trait]
pub trait CalendarCreator: Send + Sync {
    fn name(&self) -> &str;

    async fn create_event(
        &self,
        item: &ActionItem,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<(), CalendarError>;
}

/// Dry-run creator: logs the event it would have created.
#[derive(Debug, Default)]
pub struct DryRunCalendar;

impl DryRunCalendar {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CalendarCreator for DryRunCalendar {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn create_event(
        &self,
        item: &ActionItem,
        event: &Event,
        _cancel: &CancellationToken,
    ) -> Result<(), CalendarError> {
        info!(
            title = %item.title,
            start = %item.deadline.to_rfc3339(),
            duration_minutes = item.duration_minutes,
            origin = %event.origin,
            sender = %event.sender,
            "DRY RUN calendar event"
        );
        Ok(())
    }
}

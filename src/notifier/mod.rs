//! Outbound push notifications.

pub mod pushover;

pub use pushover::{PushoverConfig, PushoverNotifier};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::NotifyError;
use crate::pipeline::types::Event;

/// Sends one push notification per call. Failures are never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    async fn notify(&self, event: &Event, cancel: &CancellationToken) -> Result<(), NotifyError>;
}

/// Dry-run notifier: logs what would have been sent.
#[derive(Debug, Default)]
pub struct DryRunNotifier;

impl DryRunNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for DryRunNotifier {
    fn name(&self) -> &str {
        "dry-run"
    }

    async fn notify(&self, event: &Event, _cancel: &CancellationToken) -> Result<(), NotifyError> {
        info!(
            origin = %event.origin,
            sender = %event.sender,
            text = %event.preview(100),
            "DRY RUN notification"
        );
        Ok(())
    }
}

//! Event sources: listeners that push normalized events into the pipeline.

pub mod telegram;

pub use telegram::{TelegramConfig, TelegramSource};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::pipeline::queue::EventSender;
use crate::pipeline::types::Origin;

/// A listener producing events from one upstream platform.
///
/// `run` pushes events until the token is cancelled, then performs its own
/// cleanup and returns. Submission blocks while the queue is full.
#[async_trait]
pub trait Source: Send + Sync {
    /// Listener name, used as the key for its status entry.
    fn name(&self) -> &str;

    /// Platform the events are tagged with.
    fn origin(&self) -> Origin;

    async fn run(&self, queue: EventSender, cancel: CancellationToken) -> Result<(), SourceError>;
}

//! Event aggregation pipeline.
//!
//! Every source pushes normalized events into one bounded queue:
//! 1. `Source::run()`: platform-specific listener, many in parallel
//! 2. `EventSender::submit()`: blocks when full, never drops
//! 3. `Processor::handle()`: classify, notify, create calendar events
//! 4. `Store`: bounded history that the dashboard reads
//!
//! Shutdown order: cancel → sources return → queue closes → processor drains.

pub mod processor;
pub mod queue;
pub mod types;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::channels::Source;
use crate::error::Result;
use crate::store::Store;
use processor::Processor;
use queue::ingest_queue;

/// Summary of a completed pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events the processor handled, including those drained after cancel.
    pub processed: usize,
    /// Sources that returned an error instead of stopping cleanly.
    pub failed_sources: usize,
}

/// Run sources and the processor until `cancel` fires and the queue drains.
///
/// Each source is registered as a connected listener before it starts and
/// marked disconnected once it returns. The queue is closed only after every
/// source has returned. With no sources the pipeline idles until cancelled.
pub async fn run(
    sources: Vec<Arc<dyn Source>>,
    processor: Processor,
    store: Arc<Store>,
    queue_capacity: usize,
    cancel: CancellationToken,
) -> Result<RunSummary> {
    let (tx, rx) = ingest_queue(queue_capacity);

    let processor_cancel = cancel.clone();
    let processor_task = tokio::spawn(async move { processor.run(rx, processor_cancel).await });

    for source in &sources {
        store
            .update_listener_status(source.name(), source.origin(), true)
            .await;
    }

    let mut listeners = JoinSet::new();
    for source in sources {
        let tx = tx.clone();
        let cancel = cancel.clone();
        info!(source = source.name(), origin = %source.origin(), "Starting listener");
        listeners.spawn(async move {
            let result = source.run(tx, cancel).await;
            (source, result)
        });
    }

    // Owner handle: only listener clones keep the queue open from here on.
    drop(tx);

    if listeners.is_empty() {
        info!("No listeners configured, waiting for shutdown");
        cancel.cancelled().await;
    }

    let mut failed_sources = 0;
    while let Some(joined) = listeners.join_next().await {
        match joined {
            Ok((source, result)) => {
                if let Err(e) = result {
                    error!(source = source.name(), error = %e, "Listener terminated");
                    failed_sources += 1;
                } else {
                    info!(source = source.name(), "Listener stopped");
                }
                store
                    .update_listener_status(source.name(), source.origin(), false)
                    .await;
            }
            Err(e) => {
                error!(error = %e, "Listener task panicked");
                failed_sources += 1;
            }
        }
    }

    let processed = processor_task.await?;
    info!(processed, failed_sources, "Pipeline stopped");

    Ok(RunSummary {
        processed,
        failed_sources,
    })
}

//! Event processor: the single consumer of the ingestion queue.
//!
//! For each event, in arrival order:
//! 1. Credit the matching listener's activity counters
//! 2. Classify (failure stores a partial record and moves on)
//! 3. Urgent → notify with the original event
//! 4. Each action item → notify with a derived event, then create a
//!    calendar event if a creator is configured
//! 5. Store the processed record
//!
//! Every side effect is independently fallible and non-fatal. The processor
//! only returns once the queue is closed and drained.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::calendar::CalendarCreator;
use crate::classifier::Classifier;
use crate::notifier::Notifier;
use crate::pipeline::queue::EventReceiver;
use crate::pipeline::types::Event;
use crate::store::{NotificationLogEntry, NotificationReason, ProcessedRecord, Store};

/// Drives classification and dispatch for every ingested event.
pub struct Processor {
    classifier: Arc<dyn Classifier>,
    notifier: Arc<dyn Notifier>,
    calendar: Option<Arc<dyn CalendarCreator>>,
    store: Arc<Store>,
}

impl Processor {
    /// Create a processor without calendar integration.
    pub fn new(
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn Notifier>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            classifier,
            notifier,
            calendar: None,
            store,
        }
    }

    /// Enable calendar event creation for action items.
    pub fn with_calendar(mut self, calendar: Arc<dyn CalendarCreator>) -> Self {
        self.calendar = Some(calendar);
        self
    }

    /// Consume the queue until it is closed and drained.
    ///
    /// Cancellation does not stop the loop; buffered events are still
    /// processed, with external calls failing fast. Returns the number of
    /// events handled.
    pub async fn run(&self, mut queue: EventReceiver, cancel: CancellationToken) -> usize {
        info!(
            classifier = self.classifier.name(),
            notifier = self.notifier.name(),
            calendar = self.calendar.as_ref().map_or("disabled", |c| c.name()),
            "Processor started"
        );

        let mut handled = 0;
        while let Some(event) = queue.recv().await {
            if cancel.is_cancelled() {
                debug!(id = %event.id, origin = %event.origin, "Draining buffered event");
            }
            self.handle(event, &cancel).await;
            handled += 1;
        }

        info!(handled, "Processor stopped (queue closed and drained)");
        handled
    }

    /// Process one event and return the record stored for it.
    pub async fn handle(&self, event: Event, cancel: &CancellationToken) -> ProcessedRecord {
        debug!(
            origin = %event.origin,
            sender = %event.sender,
            text_length = event.text.len(),
            "Received event"
        );

        self.store.record_listener_activity(event.origin).await;

        let classification = match self.classifier.classify(&event, cancel).await {
            Ok(result) => result,
            Err(e) => {
                error!(origin = %event.origin, id = %event.id, error = %e, "Classification failed");
                let record = ProcessedRecord::unclassified(event);
                self.store.add_processed(record.clone()).await;
                return record;
            }
        };

        let mut notified_at: Option<DateTime<Utc>> = None;
        let mut events_created = 0;

        if classification.is_urgent {
            info!(origin = %event.origin, sender = %event.sender, "Urgent event detected");
            match self.notifier.notify(&event, cancel).await {
                Ok(()) => {
                    let entry =
                        NotificationLogEntry::new(event.clone(), NotificationReason::Urgent);
                    notified_at.get_or_insert(entry.sent_at);
                    self.store.add_notification(entry).await;
                }
                Err(e) => {
                    error!(
                        origin = %event.origin,
                        error = %e,
                        "Failed to send urgency notification"
                    );
                }
            }
        }

        for item in &classification.action_items {
            info!(
                title = %item.title,
                deadline = %item.deadline.to_rfc3339(),
                origin = %event.origin,
                sender = %event.sender,
                "Action item detected"
            );

            let notice = event.derive_action_notice(item);
            match self.notifier.notify(&notice, cancel).await {
                Ok(()) => {
                    let entry =
                        NotificationLogEntry::new(event.clone(), NotificationReason::ActionItem);
                    notified_at.get_or_insert(entry.sent_at);
                    self.store.add_notification(entry).await;
                }
                Err(e) => {
                    error!(
                        title = %item.title,
                        error = %e,
                        "Failed to send action item notification"
                    );
                }
            }

            if let Some(calendar) = &self.calendar {
                match calendar.create_event(item, &event, cancel).await {
                    Ok(()) => events_created += 1,
                    Err(e) => {
                        error!(title = %item.title, error = %e, "Failed to create calendar event");
                    }
                }
            }
        }

        if !classification.is_urgent && classification.action_items.is_empty() {
            debug!(
                origin = %event.origin,
                sender = %event.sender,
                "Event not urgent, no action items"
            );
        }

        let record = ProcessedRecord {
            event,
            classification: Some(classification),
            notified_at,
            events_created,
            processed_at: Utc::now(),
        };
        self.store.add_processed(record.clone()).await;
        record
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::error::{CalendarError, ClassifyError, NotifyError};
    use crate::pipeline::queue::ingest_queue;
    use crate::pipeline::types::{ActionItem, ClassificationResult, Origin};

    /// Classifier returning a fixed result (or failure).
    struct FixedClassifier {
        result: Option<ClassificationResult>,
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn classify(
            &self,
            _event: &Event,
            _cancel: &CancellationToken,
        ) -> Result<ClassificationResult, ClassifyError> {
            self.result.clone().ok_or(ClassifyError::InvalidResponse {
                provider: "fixed".into(),
                reason: "scripted failure".into(),
            })
        }
    }

    /// Notifier that records bodies and fails on scripted call indexes.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        fn name(&self) -> &str {
            "recording"
        }

        async fn notify(
            &self,
            event: &Event,
            _cancel: &CancellationToken,
        ) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                return Err(NotifyError::SendFailed {
                    transport: "recording".into(),
                    reason: "scripted failure".into(),
                });
            }
            self.sent.lock().unwrap().push(event.text.clone());
            Ok(())
        }
    }

    /// Calendar that fails on scripted call indexes.
    #[derive(Default)]
    struct ScriptedCalendar {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    #[async_trait]
    impl CalendarCreator for ScriptedCalendar {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn create_event(
            &self,
            _item: &ActionItem,
            _event: &Event,
            _cancel: &CancellationToken,
        ) -> Result<(), CalendarError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_on.contains(&call) {
                Err(CalendarError::Rejected {
                    status: 500,
                    body: "scripted".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn item(title: &str) -> ActionItem {
        let deadline = Utc.with_ymd_and_hms(2030, 6, 1, 10, 0, 0).unwrap();
        ActionItem::new(title, format!("{title} details"), deadline, None)
    }

    fn processor(
        result: Option<ClassificationResult>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<Store>,
    ) -> Processor {
        Processor::new(Arc::new(FixedClassifier { result }), notifier, store)
    }

    #[tokio::test]
    async fn classification_failure_stores_partial_record() {
        let store = Store::new(10);
        let notifier = Arc::new(RecordingNotifier::default());
        let p = processor(None, notifier.clone(), store.clone());

        let record = p
            .handle(Event::new(Origin::Slack, "a", "hello"), &CancellationToken::new())
            .await;
        assert!(record.classification.is_none());
        assert!(record.notified_at.is_none());

        let stored = store.recent(0).await;
        assert_eq!(stored.len(), 1);
        assert!(stored[0].classification.is_none());
        assert!(notifier.sent.lock().unwrap().is_empty());
        assert_eq!(store.stats().await.total_events, 1);
    }

    #[tokio::test]
    async fn urgent_event_notifies_with_original() {
        let store = Store::new(10);
        let notifier = Arc::new(RecordingNotifier::default());
        let p = processor(Some(ClassificationResult::urgent()), notifier.clone(), store.clone());

        let record = p
            .handle(Event::new(Origin::Telegram, "bob", "fire!"), &CancellationToken::new())
            .await;
        assert!(record.notified_at.is_some());
        assert_eq!(*notifier.sent.lock().unwrap(), vec!["fire!".to_string()]);

        let log = store.recent_notifications(0).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, NotificationReason::Urgent);
        assert_eq!(log[0].event.text, "fire!");
    }

    #[tokio::test]
    async fn urgent_notify_failure_is_non_fatal() {
        let store = Store::new(10);
        let notifier = Arc::new(RecordingNotifier {
            fail_on: vec![0],
            ..Default::default()
        });
        let result = ClassificationResult::urgent().with_action_items(vec![item("Pay rent")]);
        let p = processor(Some(result), notifier.clone(), store.clone());

        let record = p
            .handle(Event::new(Origin::Gmail, "landlord", "rent"), &CancellationToken::new())
            .await;
        // Action item notice still went out and set notified_at
        assert!(record.notified_at.is_some());
        let log = store.recent_notifications(0).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].reason, NotificationReason::ActionItem);
        // Log entry references the original event, not the derived notice
        assert_eq!(log[0].event.text, "rent");
    }

    #[tokio::test]
    async fn action_items_notify_and_create_in_order() {
        let store = Store::new(10);
        let notifier = Arc::new(RecordingNotifier::default());
        let calendar = Arc::new(ScriptedCalendar::default());
        let result = ClassificationResult::not_urgent()
            .with_action_items(vec![item("First"), item("Second")]);
        let p = processor(Some(result), notifier.clone(), store.clone())
            .with_calendar(calendar.clone());

        let record = p
            .handle(Event::new(Origin::Slack, "carol", "two things"), &CancellationToken::new())
            .await;
        assert_eq!(record.events_created, 2);
        assert_eq!(calendar.calls.load(Ordering::SeqCst), 2);

        let sent = notifier.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("Action: First\nDue: Jun 1, 2030 10:00 AM"));
        assert!(sent[1].starts_with("Action: Second"));

        let stats = store.stats().await;
        assert_eq!(stats.total_action_items, 2);
        assert_eq!(stats.events_created, 2);
        assert_eq!(stats.notifications_sent, 1);
    }

    #[tokio::test]
    async fn partial_calendar_failure_counts_successes() {
        let store = Store::new(10);
        let notifier = Arc::new(RecordingNotifier {
            fail_on: vec![0, 1, 2],
            ..Default::default()
        });
        let calendar = Arc::new(ScriptedCalendar {
            fail_on: vec![0],
            ..Default::default()
        });
        let result =
            ClassificationResult::not_urgent().with_action_items(vec![
                item("a"),
                item("b"),
                item("c"),
            ]);
        let p = processor(Some(result), notifier, store.clone()).with_calendar(calendar);

        let record = p
            .handle(Event::new(Origin::Slack, "d", "e"), &CancellationToken::new())
            .await;
        assert_eq!(record.events_created, 2);
        // Every notification failed: nothing logged, no notified_at
        assert!(record.notified_at.is_none());
        assert!(store.recent_notifications(0).await.is_empty());

        // Positional attribution marks the first two as created even though
        // the first creation was the one that failed.
        let views = store.action_items(0).await;
        let flags: Vec<bool> = views.iter().map(|v| v.event_created).collect();
        assert_eq!(flags, vec![true, true, false]);
    }

    #[tokio::test]
    async fn listener_activity_credited() {
        let store = Store::new(10);
        store.update_listener_status("Slack", Origin::Slack, true).await;
        let p = processor(Some(ClassificationResult::not_urgent()), Arc::default(), store.clone());

        p.handle(Event::new(Origin::Slack, "a", "b"), &CancellationToken::new()).await;
        p.handle(Event::new(Origin::Gmail, "a", "b"), &CancellationToken::new()).await;

        let statuses = store.listener_statuses().await;
        assert_eq!(statuses[0].message_count, 1);
    }

    #[tokio::test]
    async fn run_drains_queue_after_cancellation() {
        let store = Store::new(50);
        let p = processor(Some(ClassificationResult::not_urgent()), Arc::default(), store.clone());
        let (tx, rx) = ingest_queue(10);
        let cancel = CancellationToken::new();

        for n in 0..7 {
            tx.submit(Event::new(Origin::Slack, "a", "b").with_id(n.to_string()), &cancel)
                .await
                .unwrap();
        }
        cancel.cancel();
        drop(tx);

        let handled = p.run(rx, cancel).await;
        assert_eq!(handled, 7);
        assert_eq!(store.recent(0).await.len(), 7);
        assert_eq!(store.recent(1).await[0].event.id, "6");
    }
}

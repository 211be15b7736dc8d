//! Dispatcher use case - filters, extracts, dedups and publishes each inbound event

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    model::{ChannelFilter, DispatchOutcome, InboundMessage},
    ports::{DedupStore, MessageHandler, Publisher},
    usecases::{
        ledger::DedupLedger,
        render::{NoticeRenderer, RenderConfig},
        retry::PublishRetrier,
        strategies::{Extraction, Extractor},
    },
};

/// Configuration for the dispatcher
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Log notices instead of publishing them
    pub dry_run: bool,
    pub render: RenderConfig,
}

/// Handles one inbound event at a time; share it behind an `Arc` to run events concurrently
pub struct Dispatcher<P, St>
where
    P: Publisher + ?Sized,
    St: DedupStore + ?Sized,
{
    filter: ChannelFilter,
    extractor: Extractor,
    ledger: DedupLedger<St>,
    publisher: Arc<P>,
    retrier: PublishRetrier,
    renderer: NoticeRenderer,
    dry_run: bool,
}

impl<P, St> Dispatcher<P, St>
where
    P: Publisher + ?Sized,
    St: DedupStore + ?Sized,
{
    pub fn new(
        filter: ChannelFilter,
        extractor: Extractor,
        ledger: DedupLedger<St>,
        publisher: Arc<P>,
        retrier: PublishRetrier,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            filter,
            extractor,
            ledger,
            publisher,
            retrier,
            renderer: NoticeRenderer::new(config.render),
            dry_run: config.dry_run,
        }
    }

    /// Run one message through the pipeline
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        if !self.filter.allows(&message.channel) {
            tracing::trace!(channel = %message.channel, "Channel not in allow-list");
            return DispatchOutcome::Filtered;
        }

        let candidate = match self.extractor.extract(message).await {
            Extraction::Ignored => return DispatchOutcome::Ignored,
            Extraction::Handled(strategy) => return DispatchOutcome::Handled { strategy },
            Extraction::Candidate(candidate) => candidate,
        };
        let strategy = candidate.strategy;

        let key = message.seen_key();
        if self.ledger.already_seen(&key).await {
            tracing::info!(key = %key, strategy = %strategy, "Skipping already published message");
            return DispatchOutcome::Duplicate {
                strategy,
                key: key.to_string(),
            };
        }

        let notice = self.renderer.render(&candidate, message);

        if self.dry_run {
            tracing::info!(
                key = %key,
                code = %notice.code,
                title = %notice.title,
                "[DRY RUN] Would publish"
            );
            return DispatchOutcome::Published {
                strategy,
                code: candidate.code,
            };
        }

        let label = format!("{} {}", self.publisher.platform(), key);
        let delivered = self
            .retrier
            .run(&label, || self.publisher.publish(&notice))
            .await;

        if delivered {
            tracing::info!(
                key = %key,
                strategy = %strategy,
                code = %candidate.code,
                platform = self.publisher.platform(),
                "Published notice"
            );
            DispatchOutcome::Published {
                strategy,
                code: candidate.code,
            }
        } else {
            tracing::error!(key = %key, code = %candidate.code, "Dropped notice after retries");
            DispatchOutcome::Dropped {
                strategy,
                code: candidate.code,
            }
        }
    }
}

#[async_trait]
impl<P, St> MessageHandler for Dispatcher<P, St>
where
    P: Publisher + ?Sized,
    St: DedupStore + ?Sized,
{
    async fn handle(&self, message: InboundMessage) {
        let outcome = self.dispatch(&message).await;
        tracing::debug!(
            channel = %message.channel,
            message_id = %message.message_id,
            event = message.event.as_str(),
            outcome = ?outcome,
            "Handled inbound event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        AnnotationKind, ChannelIdentity, Condition, EventKind, Notice, StrategyKind,
        TextAnnotation,
    };
    use crate::ports::{InsertOutcome, PublishError, StateError, SystemClock};
    use crate::usecases::retry::RetryPolicy;
    use crate::usecases::strategies::ExtractorConfig;
    use crate::usecases::test_support::RecordingSleeper;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<String, i64>>,
    }

    #[async_trait]
    impl DedupStore for FakeStore {
        async fn contains(&self, key: &str) -> Result<bool, StateError> {
            tokio::task::yield_now().await;
            Ok(self.rows.lock().unwrap().contains_key(key))
        }

        async fn insert(&self, key: &str, ts_millis: i64) -> Result<InsertOutcome, StateError> {
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(key) {
                return Ok(InsertOutcome::AlreadyPresent);
            }
            rows.insert(key.to_string(), ts_millis);
            Ok(InsertOutcome::Inserted)
        }

        async fn purge_older_than(&self, _cutoff_millis: i64) -> Result<u64, StateError> {
            Ok(0)
        }
    }

    /// Publisher failing the first `failures` calls
    #[derive(Default)]
    struct FakePublisher {
        failures: AtomicU32,
        sent: Mutex<Vec<Notice>>,
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(&self, notice: &Notice) -> Result<(), PublishError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(PublishError::Network("connection reset".to_string()));
            }
            self.sent.lock().unwrap().push(notice.clone());
            Ok(())
        }

        fn platform(&self) -> &'static str {
            "fake"
        }
    }

    fn dispatcher(
        channels: &[&str],
        publisher: Arc<FakePublisher>,
        dry_run: bool,
    ) -> Dispatcher<FakePublisher, FakeStore> {
        let clock = Arc::new(SystemClock);
        Dispatcher::new(
            ChannelFilter::from_entries(channels),
            Extractor::new(ExtractorConfig::default(), clock.clone()),
            DedupLedger::new(Arc::new(FakeStore::default()), clock),
            publisher,
            PublishRetrier::with_sleeper(
                RetryPolicy::default(),
                Arc::new(RecordingSleeper::default()),
            ),
            DispatcherConfig {
                dry_run,
                ..Default::default()
            },
        )
    }

    fn spoiler_message(channel: ChannelIdentity, id: &str) -> InboundMessage {
        InboundMessage::from_text(channel, id, "Code: SPOILERCODE1\nValue: $2")
            .with_annotations(vec![TextAnnotation::new(AnnotationKind::Spoiler, 6, 12)])
    }

    fn drops_channel() -> ChannelIdentity {
        ChannelIdentity::new(Some("-1001234"), Some("drops"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_publishes_spoiler_code() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(&[], publisher.clone(), false);

        let outcome = dispatcher.dispatch(&spoiler_message(drops_channel(), "1")).await;

        assert_eq!(
            outcome,
            DispatchOutcome::Published {
                strategy: StrategyKind::Spoiler,
                code: "SPOILERCODE1".to_string()
            }
        );
        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].source_key, "tg:1234:1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_and_edit_publish_once() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(&[], publisher.clone(), false);

        let new = spoiler_message(drops_channel(), "1");
        let edit = spoiler_message(drops_channel(), "1").with_event(EventKind::Edit);
        let (a, b) = tokio::join!(dispatcher.dispatch(&new), dispatcher.dispatch(&edit));

        let published = [&a, &b]
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Published { .. }))
            .count();
        let duplicates = [&a, &b]
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Duplicate { .. }))
            .count();
        assert_eq!((published, duplicates), (1, 1));
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_list_filters_unlisted_channels() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(&["@drops"], publisher.clone(), false);

        let other = ChannelIdentity::new(Some("-1009999"), Some("elsewhere"));
        assert_eq!(
            dispatcher.dispatch(&spoiler_message(other, "1")).await,
            DispatchOutcome::Filtered
        );
        assert!(matches!(
            dispatcher.dispatch(&spoiler_message(drops_channel(), "2")).await,
            DispatchOutcome::Published { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_publish() {
        let publisher = Arc::new(FakePublisher {
            failures: AtomicU32::new(2),
            ..Default::default()
        });
        let dispatcher = dispatcher(&[], publisher.clone(), false);

        let outcome = dispatcher.dispatch(&spoiler_message(drops_channel(), "1")).await;

        assert!(matches!(outcome, DispatchOutcome::Published { .. }));
        assert_eq!(publisher.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_drop_the_notice() {
        let publisher = Arc::new(FakePublisher {
            failures: AtomicU32::new(10),
            ..Default::default()
        });
        let dispatcher = dispatcher(&[], publisher.clone(), false);

        let outcome = dispatcher.dispatch(&spoiler_message(drops_channel(), "1")).await;

        assert!(matches!(outcome, DispatchOutcome::Dropped { .. }));
        assert_eq!(publisher.failures.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_does_not_publish() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(&[], publisher.clone(), true);

        let outcome = dispatcher.dispatch(&spoiler_message(drops_channel(), "1")).await;

        assert!(matches!(outcome, DispatchOutcome::Published { .. }));
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_announcement_is_handled_without_dedup_entry() {
        let publisher = Arc::new(FakePublisher::default());
        let dispatcher = dispatcher(&[], publisher.clone(), false);
        let msg = InboundMessage::from_text(drops_channel(), "1", "DROP INCOMING\nValue: $5");

        assert_eq!(
            dispatcher.dispatch(&msg).await,
            DispatchOutcome::Handled {
                strategy: StrategyKind::Announcement
            }
        );

        let code = InboundMessage::from_text(drops_channel(), "2", "CODE2026");
        let outcome = dispatcher.dispatch(&code).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Published {
                strategy: StrategyKind::StandaloneCode,
                code: "CODE2026".to_string()
            }
        );
        assert_eq!(
            publisher.sent.lock().unwrap()[0].fields[0],
            Condition::new("Value", "$5")
        );
    }
}

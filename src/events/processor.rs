//! Buffering, gating, and periodic delivery of analytics events.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use rand::{thread_rng, Rng};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};

use crate::{events::EventRecord, transport::Transport, Error};

/// Callback receiving delivery failures.
pub(crate) type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// Configuration for [`EventProcessor`].
#[derive(Debug, Clone)]
pub struct EventProcessorConfig {
    /// When `false`, all events are discarded.
    pub enabled: bool,
    /// When `false`, an evaluation event is dropped if an event for the same flag and value was
    /// buffered within [`EventProcessorConfig::DEDUP_WINDOW`].
    pub allow_frequent_duplicate_events: bool,
    /// When `N > 0`, each evaluation event is kept with probability `1/N`.
    pub sampling_interval: u32,
    /// Interval between automatic flushes.
    pub flush_interval: Duration,
    /// Maximum number of buffered events. Events arriving when the buffer is full are dropped.
    pub capacity: usize,
}

impl EventProcessorConfig {
    /// How long an evaluation of the same flag and value is considered a duplicate.
    pub const DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);
    /// Default [`EventProcessorConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
    /// Default [`EventProcessorConfig::capacity`].
    pub const DEFAULT_CAPACITY: usize = 100;
}

impl Default for EventProcessorConfig {
    fn default() -> EventProcessorConfig {
        EventProcessorConfig {
            enabled: true,
            allow_frequent_duplicate_events: false,
            sampling_interval: 0,
            flush_interval: EventProcessorConfig::DEFAULT_FLUSH_INTERVAL,
            capacity: EventProcessorConfig::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Default)]
struct Buffer {
    events: Vec<EventRecord>,
    /// `(flag key, value)` of evaluation events to the instant they were last let through.
    recent: HashMap<(String, String), Instant>,
    /// Set when an event was dropped because the buffer was full, so we warn once per episode.
    overflowed: bool,
    closed: bool,
}

struct Shared {
    config: EventProcessorConfig,
    transport: Arc<dyn Transport>,
    on_error: ErrorSink,
    buffer: Mutex<Buffer>,
}

/// Buffers [`EventRecord`]s and hands them to the [`Transport`] in batches.
///
/// Evaluation events go through two gates before they are buffered: duplicate suppression and
/// sampling. Custom and identify events are never gated. The buffer is flushed every
/// `flush_interval`, on [`EventProcessor::flush`], and on [`EventProcessor::close`].
pub struct EventProcessor {
    shared: Arc<Shared>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl EventProcessor {
    /// Create a new event processor and start its flush timer.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn start(
        config: EventProcessorConfig,
        transport: Arc<dyn Transport>,
        on_error: ErrorSink,
    ) -> EventProcessor {
        let enabled = config.enabled;
        let flush_interval = config.flush_interval;
        let shared = Arc::new(Shared {
            config,
            transport,
            on_error,
            buffer: Mutex::new(Buffer::default()),
        });

        let timer = if enabled && !flush_interval.is_zero() {
            Some(tokio::spawn(run_flush_timer(
                Arc::downgrade(&shared),
                flush_interval,
            )))
        } else {
            None
        };

        EventProcessor {
            shared,
            timer: Mutex::new(timer),
        }
    }

    /// Buffer an event, subject to gating and capacity. Returns `true` if the event was buffered.
    pub fn enqueue(&self, event: EventRecord) -> bool {
        self.shared.enqueue(event, Instant::now())
    }

    /// Hand all buffered events to the transport.
    ///
    /// Returns once the batch has been handed off; delivery happens in the background and
    /// failures are reported to the error sink.
    pub fn flush(&self) {
        if let Some(events) = self.shared.take_batch() {
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.deliver(events).await });
        }
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.shared.lock().events.len()
    }

    /// Whether no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the flush timer and deliver remaining events. Events enqueued afterwards are
    /// discarded.
    pub async fn close(&self) {
        self.stop_timer();
        let events = {
            let mut buffer = self.shared.lock();
            buffer.closed = true;
            std::mem::take(&mut buffer.events)
        };
        if !events.is_empty() {
            self.shared.deliver(events).await;
        }
    }

    fn stop_timer(&self) {
        let timer = self
            .timer
            .lock()
            .expect("thread holding timer lock should not panic")
            .take();
        if let Some(timer) = timer {
            timer.abort();
        }
    }
}

impl Drop for EventProcessor {
    fn drop(&mut self) {
        self.stop_timer();
        // Best-effort delivery of whatever is left. Without a runtime there is nothing to run the
        // request on.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            if let Some(events) = self.shared.take_batch() {
                let shared = self.shared.clone();
                runtime.spawn(async move { shared.deliver(events).await });
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer> {
        self.buffer
            .lock()
            .expect("thread holding event buffer lock should not panic")
    }

    fn enqueue(&self, event: EventRecord, now: Instant) -> bool {
        if !self.config.enabled {
            return false;
        }

        let mut buffer = self.lock();
        if buffer.closed {
            return false;
        }

        let mut dedup_key = None;
        if let EventRecord::Feature(feature) = &event {
            if !self.config.allow_frequent_duplicate_events {
                let key = (feature.key.clone(), feature.value.fingerprint());
                let is_duplicate = buffer
                    .recent
                    .get(&key)
                    .is_some_and(|last| now.duration_since(*last) < EventProcessorConfig::DEDUP_WINDOW);
                if is_duplicate {
                    log::trace!(target: "flagwire", flag_key = feature.key.as_str(); "dropping duplicate evaluation event");
                    return false;
                }
                dedup_key = Some(key);
            }
        }

        // Events dropped for capacity are not recorded as seen.
        if buffer.events.len() >= self.config.capacity {
            if !buffer.overflowed {
                log::warn!(target: "flagwire", capacity = self.config.capacity; "exceeded event queue capacity, increase capacity to avoid dropping events");
                buffer.overflowed = true;
            }
            return false;
        }

        if let Some(key) = dedup_key {
            buffer.recent.insert(key, now);
        }

        let sampling_interval = self.config.sampling_interval;
        if matches!(event, EventRecord::Feature(_))
            && sampling_interval > 0
            && !thread_rng().gen_ratio(1, sampling_interval)
        {
            return false;
        }

        buffer.overflowed = false;
        buffer.events.push(event);
        true
    }

    /// Swap out the buffered events. Returns `None` if there is nothing to send.
    fn take_batch(&self) -> Option<Vec<EventRecord>> {
        let mut buffer = self.lock();

        let now = Instant::now();
        buffer
            .recent
            .retain(|_, last| now.duration_since(*last) < EventProcessorConfig::DEDUP_WINDOW);

        if buffer.events.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut buffer.events))
        }
    }

    async fn deliver(&self, events: Vec<EventRecord>) {
        let count = events.len();
        log::debug!(target: "flagwire", count; "delivering analytics events");
        if let Err(err) = self.transport.post_events(events).await {
            log::warn!(target: "flagwire", count; "failed to deliver analytics events: {err:?}");
            (self.on_error)(err);
        }
    }
}

async fn run_flush_timer(shared: Weak<Shared>, flush_interval: Duration) {
    let mut ticker = interval_at(Instant::now() + flush_interval, flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            // The processor is gone.
            return;
        };
        if let Some(events) = shared.take_batch() {
            shared.deliver(events).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        events::{CustomEvent, FeatureEvent},
        test_support::{init_logging, settle, MockTransport},
        FlagValue, Identity, PrivacyPolicy,
    };

    fn feature(key: &str, value: impl Into<FlagValue>) -> EventRecord {
        let value = value.into();
        EventRecord::Feature(FeatureEvent {
            creation_date: chrono::Utc::now(),
            key: key.to_owned(),
            user: Arc::new(Identity::new("u").redact(&PrivacyPolicy::default())),
            value: value.clone(),
            variation_index: None,
            version: None,
            default: Some(value),
            reason: None,
            default_used: false,
        })
    }

    fn custom(key: &str) -> EventRecord {
        EventRecord::Custom(CustomEvent {
            creation_date: chrono::Utc::now(),
            key: key.to_owned(),
            user: Arc::new(Identity::new("u").redact(&PrivacyPolicy::default())),
            data: None,
        })
    }

    fn processor(config: EventProcessorConfig, transport: &Arc<MockTransport>) -> EventProcessor {
        init_logging();
        EventProcessor::start(config, transport.clone(), Arc::new(|_: Error| {}))
    }

    #[tokio::test(start_paused = true)]
    async fn suppresses_duplicates_within_window() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                flush_interval: Duration::from_secs(3600),
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        assert!(processor.enqueue(feature("f", "v")));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!processor.enqueue(feature("f", "v")));
        assert_eq!(processor.len(), 1);

        // Different value of the same flag is not a duplicate.
        assert!(processor.enqueue(feature("f", "w")));

        tokio::time::advance(Duration::from_secs(6 * 60)).await;
        assert!(processor.enqueue(feature("f", "v")));
        assert_eq!(processor.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicates_allowed_when_configured() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                allow_frequent_duplicate_events: true,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        assert!(processor.enqueue(feature("f", true)));
        assert!(processor.enqueue(feature("f", true)));
        assert_eq!(processor.len(), 2);
    }

    #[tokio::test]
    async fn custom_events_bypass_gates() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                sampling_interval: 1_000_000,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        for _ in 0..5 {
            assert!(processor.enqueue(custom("clicked")));
        }
        assert_eq!(processor.len(), 5);
    }

    #[tokio::test]
    async fn sampling_keeps_about_one_in_n() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                allow_frequent_duplicate_events: true,
                sampling_interval: 10,
                capacity: usize::MAX,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        let kept = (0..10_000)
            .filter(|i| processor.enqueue(feature("f", *i)))
            .count();

        // Expected 1000, standard deviation is 30.
        assert!((850..=1150).contains(&kept), "kept {kept} of 10000");
    }

    #[tokio::test]
    async fn drops_events_over_capacity() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                capacity: 2,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        assert!(processor.enqueue(custom("a")));
        assert!(processor.enqueue(custom("b")));
        assert!(!processor.enqueue(custom("c")));
        assert_eq!(processor.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn evaluation_dropped_for_capacity_is_not_deduplicated() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                capacity: 1,
                flush_interval: Duration::ZERO,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        assert!(processor.enqueue(custom("a")));
        assert!(!processor.enqueue(feature("f", "v")));

        processor.flush();
        settle().await;

        assert!(processor.enqueue(feature("f", "v")));
        assert_eq!(processor.len(), 1);
    }

    #[tokio::test]
    async fn disabled_processor_discards_everything() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                enabled: false,
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        assert!(!processor.enqueue(custom("a")));
        processor.flush();
        settle().await;
        assert!(transport.posted_batches().is_empty());
    }

    #[tokio::test]
    async fn flush_hands_whole_buffer_to_transport() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(EventProcessorConfig::default(), &transport);

        processor.enqueue(custom("a"));
        processor.enqueue(custom("b"));
        processor.flush();
        // Arrives after the batch was taken: goes to the next batch.
        processor.enqueue(custom("c"));
        settle().await;

        let batches = transport.posted_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(processor.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn flushes_on_interval() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(
            EventProcessorConfig {
                flush_interval: Duration::from_secs(2),
                ..EventProcessorConfig::default()
            },
            &transport,
        );

        processor.enqueue(custom("a"));
        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(transport.posted_batches().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(transport.posted_batches().len(), 1);
        assert!(processor.is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_is_reported() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_posts(true);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let processor = {
            let errors = errors.clone();
            EventProcessor::start(
                EventProcessorConfig::default(),
                transport.clone(),
                Arc::new(move |err: Error| errors.lock().unwrap().push(err)),
            )
        };

        processor.enqueue(custom("a"));
        processor.flush();
        settle().await;

        assert_eq!(errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_delivers_remaining_events_and_rejects_new_ones() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(EventProcessorConfig::default(), &transport);

        processor.enqueue(custom("a"));
        processor.close().await;

        assert_eq!(transport.posted_batches().len(), 1);
        assert!(!processor.enqueue(custom("b")));
    }

    #[tokio::test]
    async fn drop_delivers_remaining_events() {
        let transport = Arc::new(MockTransport::new());
        let processor = processor(EventProcessorConfig::default(), &transport);

        processor.enqueue(custom("a"));
        processor.enqueue(custom("b"));
        drop(processor);
        settle().await;

        let batches = transport.posted_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }
}

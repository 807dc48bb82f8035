//! Routes job events to every configured push channel.
//!
//! Notifications arrive at least once, so the dispatcher remembers recently
//! delivered `(job, status)` pairs and drops repeats. Individual channel
//! failures don't block other channels.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::traits::{JobEvent, Notifier};

/// Per-channel delivery outcome.
#[derive(Debug)]
pub struct DispatchResult {
    pub channel: String,
    pub delivered: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// Already delivered recently; nothing was sent.
    Duplicate,
    Sent(Vec<DispatchResult>),
}

const DEFAULT_DEDUPE_CAPACITY: usize = 4096;

pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    recent: Mutex<LruCache<JobEvent, ()>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self::with_dedupe_capacity(channels, DEFAULT_DEDUPE_CAPACITY)
    }

    pub fn with_dedupe_capacity(channels: Vec<Arc<dyn Notifier>>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            channels,
            recent: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Record `event` as seen. Returns false if it was seen recently.
    fn first_sighting(&self, event: &JobEvent) -> bool {
        let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
        recent.put(*event, ()).is_none()
    }

    pub async fn dispatch(&self, event: &JobEvent) -> DispatchOutcome {
        if !self.first_sighting(event) {
            tracing::debug!(job_id = %event.job_id(), status = %event.status(), "Duplicate notification suppressed");
            return DispatchOutcome::Duplicate;
        }

        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let start = std::time::Instant::now();
            let result = channel.send(event).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let (delivered, error) = match result {
                Ok(n) => {
                    tracing::info!(
                        job_id = %event.job_id(),
                        event = event.event_name(),
                        channel = channel.channel_name(),
                        subscribers = n,
                        "Notification delivered"
                    );
                    (n, None)
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %event.job_id(),
                        channel = channel.channel_name(),
                        error = %e,
                        "Notification delivery failed"
                    );
                    (0, Some(e.to_string()))
                }
            };

            results.push(DispatchResult {
                channel: channel.channel_name().to_string(),
                delivered,
                error,
                duration_ms,
            });
        }

        DispatchOutcome::Sent(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use intake_core::{JobId, JobStatus, NotificationMessage};

    use crate::traits::NotifyError;

    struct CountingNotifier {
        count: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _event: &JobEvent) -> Result<usize, NotifyError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }

        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    struct FailingNotifier;

    #[async_trait::async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _event: &JobEvent) -> Result<usize, NotifyError> {
            Err(NotifyError::Closed("gone".into()))
        }

        fn channel_name(&self) -> &str {
            "failing"
        }
    }

    fn event(id: i64, status: JobStatus) -> JobEvent {
        NotificationMessage::for_status(JobId(id), status)
            .map(JobEvent::from)
            .expect("terminal status")
    }

    #[tokio::test]
    async fn duplicates_are_suppressed() {
        let counter = Arc::new(CountingNotifier {
            count: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(vec![counter.clone()]);

        dispatcher.dispatch(&event(1, JobStatus::Completed)).await;
        let second = dispatcher.dispatch(&event(1, JobStatus::Completed)).await;

        assert!(matches!(second, DispatchOutcome::Duplicate));
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn same_job_different_status_is_not_a_duplicate() {
        let counter = Arc::new(CountingNotifier {
            count: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(vec![counter.clone()]);

        dispatcher.dispatch(&event(1, JobStatus::Failed)).await;
        dispatcher.dispatch(&event(1, JobStatus::Completed)).await;
        assert_eq!(counter.count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_channel_does_not_block_others() {
        let counter = Arc::new(CountingNotifier {
            count: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(vec![Arc::new(FailingNotifier), counter.clone()]);

        let DispatchOutcome::Sent(results) = dispatcher.dispatch(&event(2, JobStatus::Completed)).await else {
            panic!("expected a delivery");
        };
        assert!(results[0].error.is_some());
        assert_eq!(results[1].delivered, 1);
        assert_eq!(counter.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evicted_keys_are_delivered_again() {
        let counter = Arc::new(CountingNotifier {
            count: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::with_dedupe_capacity(vec![counter.clone()], 1);

        dispatcher.dispatch(&event(1, JobStatus::Completed)).await;
        dispatcher.dispatch(&event(2, JobStatus::Completed)).await;
        dispatcher.dispatch(&event(1, JobStatus::Completed)).await;
        assert_eq!(counter.count.load(Ordering::SeqCst), 3);
    }
}

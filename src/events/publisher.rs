use super::types::OrchestrationEvent;
use crate::client::traits::EventSink;
use crate::constants::defaults;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for the event publisher
#[derive(Debug, Clone, Copy)]
pub struct EventPublisherConfig {
    /// Capacity of each subscriber's buffer
    pub buffer_size: usize,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self {
            buffer_size: defaults::EVENT_BUFFER_SIZE,
        }
    }
}

/// Counters describing delivery so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventPublisherStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
struct PublisherInner {
    config: EventPublisherConfig,
    subscribers: Mutex<Vec<mpsc::Sender<OrchestrationEvent>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// Best-effort fan-out of orchestration events.
///
/// Publishing never blocks: every subscriber has its own bounded buffer and an
/// event that does not fit is dropped for that subscriber with a warning.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    inner: Arc<PublisherInner>,
}

impl EventPublisher {
    pub fn new(config: EventPublisherConfig) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                config,
                subscribers: Mutex::new(Vec::new()),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self::new(EventPublisherConfig {
            buffer_size: buffer_size.max(1),
        })
    }

    /// Register a new subscriber with its own bounded buffer
    pub fn subscribe(&self) -> mpsc::Receiver<OrchestrationEvent> {
        let (sender, receiver) = mpsc::channel(self.inner.config.buffer_size.max(1));
        self.inner.subscribers.lock().push(sender);
        receiver
    }

    /// Publish an event to every live subscriber
    pub fn publish(&self, event: OrchestrationEvent) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event = dropped.name(),
                    run_id = %dropped.run_id(),
                    "Subscriber buffer full, dropping event"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Pruning closed event subscriber");
                false
            }
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn stats(&self) -> EventPublisherStats {
        EventPublisherStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(EventPublisherConfig::default())
    }
}

/// Forward every published event to a sink on a background task.
///
/// Sink failures are logged and the forwarder keeps going; the task ends when the
/// publisher and all its clones are dropped.
pub fn spawn_sink(publisher: &EventPublisher, sink: Arc<dyn EventSink>) -> JoinHandle<()> {
    let mut receiver = publisher.subscribe();
    let sink_name = sink.name().to_string();

    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            if let Err(error) = sink.deliver(&event).await {
                warn!(
                    sink = %sink_name,
                    event = event.name(),
                    run_id = %event.run_id(),
                    error = %error,
                    "Event sink failed to deliver event"
                );
            }
        }
        debug!(sink = %sink_name, "Event sink forwarder stopped");
    })
}

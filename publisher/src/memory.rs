//! In-process stand-in for the Pub/Sub service.
//!
//! Topics spring into existence on first publish. Subscriptions attached to a
//! topic receive a copy of every message published after they were created.
//! Failures can be injected per topic to exercise the recovery paths.

use crate::backend::{Message, MessageId, PublishBackend, TopicHandle, TopicSettings};
use crate::errors::BackendError;
use crate::ordering::{OrderedTopic, Transport};
use crate::subscriber::{ReceivedMessage, Subscription};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub message: Message,
}

struct SubscriptionState {
    topic: String,
    pending: VecDeque<ReceivedMessage>,
}

#[derive(Default)]
struct MemoryState {
    topics: HashMap<String, Vec<StoredMessage>>,
    subscriptions: HashMap<String, SubscriptionState>,
    injected_failures: HashMap<String, usize>,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct MemoryTransport {
    next_id: AtomicU64,
    closed: AtomicBool,
    state: Mutex<MemoryState>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, topic: &str, message: Message) -> Result<MessageId, BackendError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.closed.load(Ordering::Relaxed) {
            return Err(BackendError::Unavailable("connection closed".into()));
        }

        let mut state = self.state.lock();
        if let Some(remaining) = state.injected_failures.get_mut(topic)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(BackendError::Rejected {
                status: 503,
                message: "injected failure".into(),
            });
        }

        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();

        for (name, subscription) in state.subscriptions.iter_mut() {
            if subscription.topic == topic {
                subscription.pending.push_back(ReceivedMessage {
                    ack_id: format!("{name}-{id}"),
                    message_id: id.clone(),
                    message: message.clone(),
                    publish_time: None,
                });
            }
        }

        state
            .topics
            .entry(topic.to_owned())
            .or_default()
            .push(StoredMessage {
                id: id.clone(),
                message,
            });

        Ok(id)
    }
}

/// Backend that keeps everything in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    transport: Arc<MemoryTransport>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a new subscription to `topic`.
    pub fn create_subscription(&self, name: &str, topic: &str) {
        self.transport.state.lock().subscriptions.insert(
            name.to_owned(),
            SubscriptionState {
                topic: topic.to_owned(),
                pending: VecDeque::new(),
            },
        );
    }

    /// Makes the next `count` publishes to `topic` fail.
    pub fn inject_publish_errors(&self, topic: &str, count: usize) {
        *self
            .transport
            .state
            .lock()
            .injected_failures
            .entry(topic.to_owned())
            .or_default() += count;
    }

    /// Delays every publish by `latency`.
    pub fn set_publish_latency(&self, latency: Duration) {
        self.transport.state.lock().latency = Some(latency);
    }

    /// Messages accepted for `topic`, in acceptance order.
    pub fn messages(&self, topic: &str) -> Vec<StoredMessage> {
        self.transport
            .state
            .lock()
            .topics
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PublishBackend for MemoryBackend {
    fn topic(&self, name: &str, settings: TopicSettings) -> Arc<dyn TopicHandle> {
        Arc::new(OrderedTopic::new(name, settings, self.transport.clone()))
    }

    fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        Arc::new(MemorySubscription {
            name: name.to_owned(),
            transport: self.transport.clone(),
        })
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.transport.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

struct MemorySubscription {
    name: String,
    transport: Arc<MemoryTransport>,
}

impl MemorySubscription {
    fn not_found(&self) -> BackendError {
        BackendError::Rejected {
            status: 404,
            message: format!("subscription {} not found", self.name),
        }
    }
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BackendError> {
        let mut state = self.transport.state.lock();
        let subscription = state
            .subscriptions
            .get_mut(&self.name)
            .ok_or_else(|| self.not_found())?;

        let count = max_messages.min(subscription.pending.len());
        Ok(subscription.pending.drain(..count).collect())
    }

    /// Pulled messages are never redelivered, so there is nothing to settle
    /// beyond checking that the subscription exists.
    async fn acknowledge(&self, _ack_ids: &[String]) -> Result<(), BackendError> {
        if self.transport.state.lock().subscriptions.contains_key(&self.name) {
            Ok(())
        } else {
            Err(self.not_found())
        }
    }
}

//! Client-side ordering discipline shared by all backends.
//!
//! Messages without an ordering key are sent concurrently. Messages that carry
//! a key are queued per key and sent one at a time, so the backend receives
//! them in submission order. A failed send pauses its key: every queued or
//! newly submitted message for that key fails with
//! [`BackendError::OrderingKeyPaused`] until [`TopicHandle::resume_publish`] is
//! called for it.

use crate::backend::{Message, MessageId, PendingPublish, PublishSender, TopicHandle, TopicSettings};
use crate::errors::BackendError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

/// A single network round-trip to the backend. No ordering logic.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, topic: &str, message: Message) -> Result<MessageId, BackendError>;
}

type Job = (Message, PublishSender);

#[derive(Default)]
struct KeyState {
    // One entry per key that currently has a worker draining its queue.
    queues: HashMap<String, mpsc::UnboundedSender<Job>>,
    paused: HashSet<String>,
    stopped: bool,
}

struct Inner<T> {
    name: String,
    settings: TopicSettings,
    transport: Arc<T>,
    state: Mutex<KeyState>,
    tasks: TaskTracker,
}

/// Topic handle that enforces per-key ordering on top of a [`Transport`].
pub struct OrderedTopic<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> OrderedTopic<T> {
    pub fn new(name: &str, settings: TopicSettings, transport: Arc<T>) -> Self {
        OrderedTopic {
            inner: Arc::new(Inner {
                name: name.to_owned(),
                settings,
                transport,
                state: Mutex::new(KeyState::default()),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn is_paused(&self, ordering_key: &str) -> bool {
        self.inner.state.lock().paused.contains(ordering_key)
    }

    fn publish_unordered(&self, message: Message, reply: PublishSender) {
        // Spawning under the lock orders every spawn before `stop` marks the
        // topic stopped, so `stop` always waits for it.
        let state = self.inner.state.lock();
        if state.stopped {
            let _ = reply.send(Err(BackendError::Stopped(self.inner.name.clone())));
            return;
        }

        let inner = self.inner.clone();
        self.inner.tasks.spawn(async move {
            let result = inner.transport.send(&inner.name, message).await;
            let _ = reply.send(result);
        });
        drop(state);
    }

    fn publish_ordered(&self, message: Message, reply: PublishSender) {
        let key = message.ordering_key.clone();
        let mut state = self.inner.state.lock();

        if state.stopped {
            let _ = reply.send(Err(BackendError::Stopped(self.inner.name.clone())));
            return;
        }
        if state.paused.contains(&key) {
            let _ = reply.send(Err(BackendError::OrderingKeyPaused(key)));
            return;
        }

        let job = match state.queues.get(&key) {
            Some(queue) => match queue.send((message, reply)) {
                Ok(()) => return,
                // The worker is gone; start a new one below.
                Err(mpsc::error::SendError(job)) => job,
            },
            None => (message, reply),
        };

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        state.queues.insert(key.clone(), queue_tx);
        self.inner
            .tasks
            .spawn(drain_key(self.inner.clone(), key, job, queue_rx));
        drop(state);
    }
}

/// Sends the queued messages of one ordering key, one at a time, and exits
/// once the queue is empty.
async fn drain_key<T: Transport>(
    inner: Arc<Inner<T>>,
    key: String,
    first: Job,
    mut queue: mpsc::UnboundedReceiver<Job>,
) {
    let mut next = Some(first);

    while let Some((message, reply)) = next.take() {
        let paused = inner.state.lock().paused.contains(&key);

        let result = if paused {
            Err(BackendError::OrderingKeyPaused(key.clone()))
        } else {
            let result = inner.transport.send(&inner.name, message).await;
            if let Err(e) = &result {
                tracing::warn!(
                    topic = %inner.name,
                    ordering_key = %key,
                    error = %e,
                    "publish failed, pausing ordering key"
                );
                // Recorded before replying so that a resume issued by the
                // caller on receipt of the error is never lost.
                inner.state.lock().paused.insert(key.clone());
            }
            result
        };
        let _ = reply.send(result);

        let mut state = inner.state.lock();
        match queue.try_recv() {
            Ok(job) => next = Some(job),
            Err(_) => {
                state.queues.remove(&key);
            }
        }
    }
}

#[async_trait]
impl<T: Transport> TopicHandle for OrderedTopic<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn settings(&self) -> &TopicSettings {
        &self.inner.settings
    }

    fn publish(&self, message: Message) -> PendingPublish {
        let (reply, pending) = PendingPublish::channel();

        if message.ordering_key.is_empty() {
            self.publish_unordered(message, reply);
        } else if !self.ordering_enabled() {
            let _ = reply.send(Err(BackendError::OrderingDisabled(self.inner.name.clone())));
        } else {
            self.publish_ordered(message, reply);
        }

        pending
    }

    fn resume_publish(&self, ordering_key: &str) {
        if self.inner.state.lock().paused.remove(ordering_key) {
            tracing::debug!(topic = %self.inner.name, ordering_key, "resumed ordering key");
        }
    }

    async fn stop(&self) -> Result<(), BackendError> {
        {
            let mut state = self.inner.state.lock();
            state.stopped = true;
            self.inner.tasks.close();
        }
        self.inner.tasks.wait().await;
        Ok(())
    }
}

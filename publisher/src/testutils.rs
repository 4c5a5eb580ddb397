//! Backend wrapper that records how handles are used.

use crate::backend::{Message, PendingPublish, PublishBackend, TopicHandle, TopicSettings};
use crate::errors::BackendError;
use crate::memory::MemoryBackend;
use crate::subscriber::Subscription;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct Record {
    created: AtomicUsize,
    published: AtomicUsize,
    resumes: Mutex<Vec<(String, String)>>,
    stopped: Mutex<Vec<String>>,
    failing_stops: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

/// Wraps a [`MemoryBackend`] and records topic creation, publishes, resumes
/// and stops.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    memory: MemoryBackend,
    record: Arc<Record>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryBackend {
        &self.memory
    }

    /// Makes `stop` fail for the handle of `topic`.
    pub fn fail_stop(&self, topic: &str) {
        self.record.failing_stops.lock().insert(topic.to_owned());
    }

    pub fn created_topics(&self) -> usize {
        self.record.created.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.record.published.load(Ordering::SeqCst)
    }

    /// `(topic, ordering_key)` of every resume call, in call order.
    pub fn resumes(&self) -> Vec<(String, String)> {
        self.record.resumes.lock().clone()
    }

    pub fn stopped_topics(&self) -> Vec<String> {
        self.record.stopped.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.record.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishBackend for RecordingBackend {
    fn topic(&self, name: &str, settings: TopicSettings) -> Arc<dyn TopicHandle> {
        self.record.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(RecordingTopic {
            inner: self.memory.topic(name, settings),
            record: self.record.clone(),
        })
    }

    fn subscription(&self, name: &str) -> Arc<dyn Subscription> {
        self.memory.subscription(name)
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.record.closed.store(true, Ordering::SeqCst);
        self.memory.close().await
    }
}

struct RecordingTopic {
    inner: Arc<dyn TopicHandle>,
    record: Arc<Record>,
}

#[async_trait]
impl TopicHandle for RecordingTopic {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn settings(&self) -> &TopicSettings {
        self.inner.settings()
    }

    fn publish(&self, message: Message) -> PendingPublish {
        self.record.published.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(message)
    }

    fn resume_publish(&self, ordering_key: &str) {
        self.record
            .resumes
            .lock()
            .push((self.inner.name().to_owned(), ordering_key.to_owned()));
        self.inner.resume_publish(ordering_key);
    }

    async fn stop(&self) -> Result<(), BackendError> {
        let name = self.inner.name().to_owned();
        self.record.stopped.lock().push(name.clone());
        self.inner.stop().await?;

        if self.record.failing_stops.lock().contains(&name) {
            return Err(BackendError::Unavailable(format!("failed to flush {name}")));
        }
        Ok(())
    }
}

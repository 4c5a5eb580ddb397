use crate::errors::BackendError;
use crate::subscriber::Subscription;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Server-assigned identifier of a published message.
pub type MessageId = String;

pub type PublishSender = oneshot::Sender<Result<MessageId, BackendError>>;

/// A message as submitted to a topic handle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Message {
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    /// Empty means unordered.
    pub ordering_key: String,
}

/// Settings applied to a topic handle when it is created. They cannot be
/// changed afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopicSettings {
    pub enable_message_ordering: bool,
}

/// Resolves to the outcome of a single publish.
///
/// Dropping it abandons the wait, not the publish itself.
pub struct PendingPublish {
    rx: oneshot::Receiver<Result<MessageId, BackendError>>,
}

impl PendingPublish {
    pub fn channel() -> (PublishSender, PendingPublish) {
        let (tx, rx) = oneshot::channel();
        (tx, PendingPublish { rx })
    }
}

impl Future for PendingPublish {
    type Output = Result<MessageId, BackendError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| {
                Err(BackendError::Unavailable(
                    "publish task ended without a result".into(),
                ))
            })
        })
    }
}

/// A reusable, per-topic client-side object through which messages are
/// submitted.
#[async_trait]
pub trait TopicHandle: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &TopicSettings;

    fn ordering_enabled(&self) -> bool {
        self.settings().enable_message_ordering
    }

    /// Submits a message. The returned future resolves once the backend has
    /// acknowledged or rejected it.
    fn publish(&self, message: Message) -> PendingPublish;

    /// Clears the paused state of `ordering_key` after a failed publish.
    fn resume_publish(&self, ordering_key: &str);

    /// Flushes outstanding messages and rejects any further publishes.
    async fn stop(&self) -> Result<(), BackendError>;
}

/// Connection to a messaging backend.
#[async_trait]
pub trait PublishBackend: Send + Sync {
    /// Creates a handle for the named topic. Callers are expected to cache it.
    fn topic(&self, name: &str, settings: TopicSettings) -> Arc<dyn TopicHandle>;

    fn subscription(&self, name: &str) -> Arc<dyn Subscription>;

    /// Closes the connection. Handles must be stopped first.
    async fn close(&self) -> Result<(), BackendError>;
}

use crate::backend::{Message, MessageId};
use crate::errors::BackendError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message_id: MessageId,
    pub message: Message,
    pub publish_time: Option<String>,
}

#[async_trait]
pub trait Subscription: Send + Sync {
    fn name(&self) -> &str;

    async fn pull(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, BackendError>;

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<(), BackendError>;
}

#[derive(Clone, Debug)]
pub struct ReceiveSettings {
    pub max_messages: usize,
    /// How long to wait before pulling again after an empty pull.
    pub poll_interval: Duration,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        ReceiveSettings {
            max_messages: 100,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Pulls messages and hands them to `handler` until `cancel` fires.
///
/// Each batch is acknowledged after the handler has returned for every message
/// in it. Returns the number of messages delivered, or the first pull or
/// acknowledge error.
pub async fn receive<F, Fut>(
    subscription: &dyn Subscription,
    settings: &ReceiveSettings,
    cancel: &CancellationToken,
    mut handler: F,
) -> Result<u64, BackendError>
where
    F: FnMut(ReceivedMessage) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut delivered = 0;

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => return Ok(delivered),
            batch = subscription.pull(settings.max_messages) => batch?,
        };

        if batch.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(delivered),
                _ = tokio::time::sleep(settings.poll_interval) => continue,
            }
        }

        tracing::debug!(
            subscription = subscription.name(),
            count = batch.len(),
            "received batch"
        );

        let mut ack_ids = Vec::with_capacity(batch.len());
        for received in batch {
            ack_ids.push(received.ack_id.clone());
            handler(received).await;
            delivered += 1;
        }

        subscription.acknowledge(&ack_ids).await?;
    }
}

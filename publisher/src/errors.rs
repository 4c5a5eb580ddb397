use std::time::Duration;

/// Errors reported by a publish backend or one of its topic handles.
#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("rejected by backend (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response from backend: {0}")]
    InvalidResponse(String),

    #[error("ordering key {0:?} is paused after a failed publish")]
    OrderingKeyPaused(String),

    #[error("message ordering is disabled for topic {0:?}, but an ordering key was set")]
    OrderingDisabled(String),

    #[error("topic {0:?} has been stopped")]
    Stopped(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("invalid backend configuration: {0}")]
    Configuration(String),
}

/// Errors surfaced to callers of [`crate::OrderedPublisher::publish`].
#[derive(thiserror::Error, Debug)]
pub enum PublishError {
    #[error("invalid publish request: {0}")]
    Validation(String),

    #[error("failed to publish to topic {topic:?} (ordering key {ordering_key:?}): {source}")]
    Backend {
        topic: String,
        ordering_key: String,
        source: BackendError,
    },

    #[error("publish to topic {topic:?} (ordering key {ordering_key:?}) was cancelled")]
    Cancelled { topic: String, ordering_key: String },
}

impl PublishError {
    /// The ordering key that was active when the publish failed, if any.
    pub fn ordering_key(&self) -> Option<&str> {
        match self {
            PublishError::Validation(_) => None,
            PublishError::Backend { ordering_key, .. }
            | PublishError::Cancelled { ordering_key, .. } => {
                Some(ordering_key.as_str()).filter(|k| !k.is_empty())
            }
        }
    }
}

//! Ordered publishing to Pub/Sub topics.
//!
//! [`OrderedPublisher`] is the entry point: it resolves a cached topic handle
//! through the [`TopicRegistry`], submits the message and, when an ordered
//! publish fails, resumes the ordering key before reporting the error so the
//! key is not left paused.

pub mod backend;
pub mod config;
pub mod errors;
pub mod memory;
pub mod metrics_defs;
pub mod ordering;
pub mod publisher;
pub mod registry;
pub mod rest;
pub mod subscriber;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use backend::{Message, MessageId, PendingPublish, PublishBackend, TopicHandle, TopicSettings};
pub use config::{BackendConfig, build_backend};
pub use errors::{BackendError, PublishError};
pub use publisher::{OrderedPublisher, PublishRequest, validate_topic_name};
pub use registry::TopicRegistry;

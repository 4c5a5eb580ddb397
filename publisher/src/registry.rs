use crate::backend::{PublishBackend, TopicHandle, TopicSettings};
use crate::errors::BackendError;
use crate::metrics_defs::{HANDLE_STOP_FAILURE, TOPICS_CACHED};
use parking_lot::RwLock;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns one long-lived handle per topic name.
///
/// Every handle is created with message ordering enabled, whether or not the
/// request that caused its creation carried an ordering key: the setting
/// cannot be changed once the handle exists, and an unordered first publish
/// must not lock out ordered publishes to the same topic.
pub struct TopicRegistry {
    backend: Arc<dyn PublishBackend>,
    settings: TopicSettings,
    topics: RwLock<HashMap<String, Arc<dyn TopicHandle>>>,
}

impl TopicRegistry {
    pub fn new(backend: Arc<dyn PublishBackend>) -> Self {
        TopicRegistry {
            backend,
            settings: TopicSettings {
                enable_message_ordering: true,
            },
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached handle for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<dyn TopicHandle> {
        if let Some(handle) = self.topics.read().get(name) {
            return handle.clone();
        }

        let mut topics = self.topics.write();
        // Another caller may have created it while we waited for the lock.
        let handle = topics
            .entry(name.to_owned())
            .or_insert_with(|| {
                tracing::debug!(topic = name, "creating topic handle");
                self.backend.topic(name, self.settings.clone())
            })
            .clone();

        gauge!(TOPICS_CACHED).set(topics.len() as f64);
        handle
    }

    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    /// Stops every cached handle, then closes the backend.
    ///
    /// A handle that fails to stop is logged and skipped; the remaining
    /// handles are still stopped and the backend is still closed.
    pub async fn shutdown(&self) -> Result<(), BackendError> {
        let handles: Vec<(String, Arc<dyn TopicHandle>)> = self.topics.write().drain().collect();
        gauge!(TOPICS_CACHED).set(0.0);

        tracing::info!(count = handles.len(), "stopping topic handles");
        for (name, handle) in handles {
            if let Err(e) = handle.stop().await {
                tracing::error!(topic = %name, error = %e, "failed to flush topic handle");
                counter!(HANDLE_STOP_FAILURE).increment(1);
            }
        }

        self.backend.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::testutils::RecordingBackend;

    #[test]
    fn test_get_or_create_caches_handle() {
        let registry = TopicRegistry::new(Arc::new(MemoryBackend::new()));
        assert!(registry.is_empty());

        let first = registry.get_or_create("orders");
        let second = registry.get_or_create("orders");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.ordering_enabled());
        assert!(second.ordering_enabled());
        assert_eq!(first.name(), "orders");

        let other = registry.get_or_create("payments");
        assert!(!Arc::ptr_eq(&first, &other));
        assert!(other.ordering_enabled());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_concurrent_get_or_create() {
        let backend = Arc::new(RecordingBackend::new());
        let registry = Arc::new(TopicRegistry::new(backend.clone()));

        let threads: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let shared = registry.get_or_create("orders");
                    let own = registry.get_or_create(&format!("topic-{}", i % 4));
                    (shared, own)
                })
            })
            .collect();

        let handles: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        for (shared, _) in &handles {
            assert!(Arc::ptr_eq(shared, &handles[0].0));
        }

        assert_eq!(registry.len(), 5);
        assert_eq!(backend.created_topics(), 5);
    }

    #[tokio::test]
    async fn test_shutdown_continues_after_stop_failure() {
        let backend = Arc::new(RecordingBackend::new());
        backend.fail_stop("b");
        let registry = TopicRegistry::new(backend.clone());

        for name in ["a", "b", "c"] {
            registry.get_or_create(name);
        }

        registry.shutdown().await.unwrap();

        let mut stopped = backend.stopped_topics();
        stopped.sort();
        assert_eq!(stopped, vec!["a", "b", "c"]);
        assert!(backend.is_closed());
        assert!(registry.is_empty());
    }
}

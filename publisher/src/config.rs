use crate::backend::PublishBackend;
use crate::errors::BackendError;
use crate::memory::MemoryBackend;
use crate::rest::{DEFAULT_ENDPOINT, RestBackend};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Set by the Pub/Sub emulator tooling, e.g. `localhost:8085`.
pub const EMULATOR_HOST_ENV: &str = "PUBSUB_EMULATOR_HOST";

fn default_timeout_secs() -> u64 {
    60
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum BackendConfig {
    Rest {
        #[serde(default)]
        endpoint: Option<Url>,
        #[serde(default)]
        access_token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    Memory,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Rest {
            endpoint: None,
            access_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Picks the REST endpoint: explicit configuration first, then the emulator
/// host, then the public service.
pub fn resolve_endpoint(
    configured: Option<&Url>,
    emulator_host: Option<&str>,
) -> Result<Url, BackendError> {
    if let Some(url) = configured {
        return Ok(url.clone());
    }

    let raw = match emulator_host.filter(|h| !h.is_empty()) {
        Some(host) => format!("http://{host}"),
        None => DEFAULT_ENDPOINT.to_string(),
    };
    Url::parse(&raw).map_err(|e| BackendError::Configuration(format!("{raw}: {e}")))
}

pub fn build_backend(
    config: &BackendConfig,
    project_id: &str,
) -> Result<Arc<dyn PublishBackend>, BackendError> {
    match config {
        BackendConfig::Rest {
            endpoint,
            access_token,
            timeout_secs,
        } => {
            let emulator_host = std::env::var(EMULATOR_HOST_ENV).ok();
            let endpoint = resolve_endpoint(endpoint.as_ref(), emulator_host.as_deref())?;
            tracing::info!(endpoint = %endpoint, project_id, "using pubsub rest backend");

            let backend = RestBackend::new(
                endpoint,
                project_id,
                access_token.clone(),
                Duration::from_secs(*timeout_secs),
            )?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Memory => {
            tracing::warn!("using the in-memory backend, messages are not delivered anywhere");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}

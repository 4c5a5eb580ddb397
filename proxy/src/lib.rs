//! HTTP front end for the ordered publisher.
//!
//! Two listeners are served: the publish listener handling `POST /publish`,
//! and the admin listener answering health and readiness probes. Both stop
//! accepting connections when the shutdown token fires, after which the
//! publisher flushes its topic handles and closes the backend.

pub mod config;
pub mod errors;
pub mod metrics_defs;
mod publish_service;

pub use errors::{ProxyError, RequestError};
pub use publish_service::{PUBLISH_PATH, PublishService};

use publisher::OrderedPublisher;
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

pub async fn run(
    config: config::Config,
    publisher: OrderedPublisher,
    shutdown: CancellationToken,
) -> Result<(), ProxyError> {
    config.validate()?;

    let ready = Arc::new(AtomicBool::new(true));
    let ready_probe = ready.clone();

    // The admin listener outlives the publish listener so probes keep
    // answering (with 503 on /ready) while requests drain.
    let admin_shutdown = CancellationToken::new();

    let publish_task = async {
        let served = run_http_service(
            &config.listener.host,
            config.listener.port,
            PublishService::new(publisher.clone(), &config),
            shutdown.clone(),
        )
        .await;
        admin_shutdown.cancel();
        served
    };
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        AdminService::<_, ProxyError>::new(move || ready_probe.load(Ordering::Relaxed)),
        admin_shutdown.clone(),
    );
    let readiness_task = async {
        shutdown.cancelled().await;
        ready.store(false, Ordering::Relaxed);
        Ok::<(), ProxyError>(())
    };

    let served = tokio::try_join!(publish_task, admin_task, readiness_task);

    tracing::info!("listeners stopped, shutting down publisher");
    if let Err(e) = publisher.shutdown().await {
        tracing::error!(error = %e, "publisher shutdown failed");
    }

    served.map(|_| ())
}

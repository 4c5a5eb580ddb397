mod config;
mod logging;
mod statsd;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Overrides};
use publisher::subscriber::{ReceiveSettings, ReceivedMessage, receive};
use publisher::{BackendError, OrderedPublisher, build_backend};
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(version, about = "HTTP proxy that publishes ordered messages to Pub/Sub")]
struct Cli {
    /// Google Cloud project that owns the topics
    #[arg(long, env = "GCP_PROJECT_ID", global = true)]
    project: Option<String>,

    /// Port of the publish listener [default: 8080]
    #[arg(long, env = "PORT", global = true)]
    port: Option<u16>,

    /// YAML config file
    #[arg(long, env = "PUBSUB_PROXY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum CliCommand {
    /// Serve the publish endpoint (default)
    Serve,
    /// Pull from a subscription, log and acknowledge every message
    Receive {
        #[arg(long)]
        subscription: String,
        #[arg(long, default_value_t = 100)]
        max_messages: usize,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Metrics(#[from] statsd::MetricsError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Proxy(#[from] proxy::ProxyError),
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load(
        cli.config.as_deref(),
        Overrides {
            project_id: cli.project,
            port: cli.port,
        },
    ) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {e}");
            process::exit(1);
        }
    };

    let _sentry = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run(config, cli.command.unwrap_or(CliCommand::Serve)) {
        tracing::error!(error = %e, "pubsub-proxy exited with an error");
        process::exit(1);
    }
}

fn run(config: Config, command: CliCommand) -> Result<(), CliError> {
    if let Some(metrics_config) = &config.metrics {
        statsd::init(metrics_config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_on_signal(shutdown.clone()));

        let backend = build_backend(&config.backend, &config.project_id)?;

        match command {
            CliCommand::Serve => {
                tracing::info!(project_id = %config.project_id, "starting pubsub-proxy");
                let publisher = OrderedPublisher::new(backend);
                proxy::run(config.proxy, publisher, shutdown).await?;
            }
            CliCommand::Receive {
                subscription,
                max_messages,
            } => {
                let settings = ReceiveSettings {
                    max_messages,
                    ..Default::default()
                };
                let handle = backend.subscription(&subscription);
                let received = receive(handle.as_ref(), &settings, &shutdown, log_message).await;
                backend.close().await?;

                let delivered = received?;
                tracing::info!(subscription = %subscription, delivered, "receive loop stopped");
            }
        }
        Ok(())
    })
}

async fn log_message(received: ReceivedMessage) {
    tracing::info!(
        message_id = %received.message_id,
        ordering_key = %received.message.ordering_key,
        data = %String::from_utf8_lossy(&received.message.data),
        attributes = ?received.message.attributes,
        "received message"
    );
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn shutdown_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::warn!(error = %e, "could not listen for ctrl-c");
            }
        }
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received, draining");
    shutdown.cancel();
}

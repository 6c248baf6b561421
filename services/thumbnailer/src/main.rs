use anyhow::{Context, Result};
use photo_service::{PgDocumentStore, S3ObjectStore};
use photo_thumbnailer::{Config, ThumbnailConsumer, ThumbnailWorker};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting photo thumbnailer"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let objects = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let documents = Arc::new(
        PgDocumentStore::new(&config.documents)
            .await
            .context("Failed to initialize document store")?,
    );
    if config.documents.run_migrations {
        documents
            .ensure_schema()
            .await
            .context("Failed to prepare document store schema")?;
    }

    let worker = Arc::new(ThumbnailWorker::new(
        objects,
        documents,
        config.thumbnails.jpeg_quality,
    ));

    let consumer = ThumbnailConsumer::new(&config.kafka, worker)
        .context("Failed to initialize Kafka consumer")?;

    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run().await {
            error!(error = ?e, "Kafka consumer error");
        }
    });

    info!("Thumbnailer started successfully");

    shutdown_signal().await;

    info!("Shutting down thumbnailer");
    consumer_handle.abort();
    info!("Thumbnailer stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

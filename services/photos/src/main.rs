use anyhow::{Context, Result};
use photo_service::{
    start_api_server, AlbumWorkflow, AppState, Config, GeminiImageGenerator, PgDocumentStore,
    PgRelationalStore, PhotoWorkflow, S3ObjectStore, TokenIssuer, UserService,
};
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
        "Starting photo service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Initialize stores
    let relational = Arc::new(
        PgRelationalStore::new(&config.database)
            .await
            .context("Failed to initialize relational store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        relational
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

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

    let objects = Arc::new(
        S3ObjectStore::new(&config.s3)
            .await
            .context("Failed to initialize object store")?,
    );

    let generator =
        Arc::new(GeminiImageGenerator::new(&config.ai).context("Failed to initialize generator")?);
    let tokens = TokenIssuer::new(&config.auth).context("Failed to initialize token issuer")?;

    let state = AppState {
        photos: PhotoWorkflow::new(
            relational.clone(),
            objects,
            documents,
            generator,
            config.upload.clone(),
        ),
        albums: AlbumWorkflow::new(relational.clone()),
        users: UserService::new(relational.clone(), tokens),
        relational,
        service_name: config.service.name.clone(),
        max_upload_bytes: config.upload.max_upload_bytes,
        url_expiration_secs: config.s3.presigned_url_expiry_secs,
    };

    info!("Photo service started successfully");

    if let Err(e) = start_api_server(state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("Photo service stopped");

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
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
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

    info!("Shutting down photo service");
}

//! Integrator store-and-forward dispatcher.
//!
//! Main entry point. Initializes tracing and configuration, connects to
//! PostgreSQL, bootstraps the schema, loads the destination snapshot, and
//! runs the dispatch engine alongside the HTTP API until a shutdown signal
//! arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use integrator_api::{ApiCredentials, AppState, Config};
use integrator_core::{storage::Storage, Destinations};
use integrator_dispatch::{DispatchEngine, PostgresDispatchStorage};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting integrator dispatcher");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        port = config.port,
        max_concurrent = config.max_concurrent,
        max_retries = config.max_retries,
        "configuration loaded"
    );

    let pool = create_database_pool(&config).await?;
    info!("database connection pool established");

    ensure_schema(&pool).await?;
    info!("database schema ready");

    let storage = Arc::new(Storage::new(pool.clone()));
    let destinations = Arc::new(Destinations::load(&storage).await?);

    let dispatch_storage = Arc::new(PostgresDispatchStorage::new(storage.clone()));
    let mut engine = DispatchEngine::new(
        dispatch_storage,
        destinations.clone(),
        config.to_dispatch_config(),
    )?;
    engine.start().await;

    let state = AppState {
        storage: storage.clone(),
        destinations: destinations.clone(),
        credentials: Arc::new(ApiCredentials {
            username: config.api_username.clone(),
            password: config.api_password.clone(),
        }),
    };
    let addr = config.parse_server_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = integrator_api::start_server(state, addr).await {
            error!(error = %e, "API server failed");
        }
    });

    info!(addr = %addr, "integrator is ready");

    shutdown_signal().await;
    info!("shutdown signal received, starting graceful shutdown");

    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "dispatch engine shutdown failed");
    }
    server_handle.abort();

    pool.close().await;
    info!("integrator shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,integrator=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with bounded retries.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;
                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Bootstraps the schema the dispatcher needs.
async fn ensure_schema(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS servers (
            id BIGSERIAL PRIMARY KEY,
            uid TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL DEFAULT '',
            password TEXT NOT NULL DEFAULT '',
            auth_token TEXT NOT NULL DEFAULT '',
            auth_method TEXT NOT NULL DEFAULT 'Basic',
            url TEXT NOT NULL DEFAULT '',
            http_method TEXT NOT NULL DEFAULT 'POST',
            cc_urls TEXT[] NOT NULL DEFAULT '{}',
            callback_url TEXT NOT NULL DEFAULT '',
            allow_callbacks BOOLEAN NOT NULL DEFAULT FALSE,
            allow_copies BOOLEAN NOT NULL DEFAULT FALSE,
            use_async BOOLEAN NOT NULL DEFAULT FALSE,
            use_ssl BOOLEAN NOT NULL DEFAULT FALSE,
            parse_responses BOOLEAN NOT NULL DEFAULT FALSE,
            suspended BOOLEAN NOT NULL DEFAULT FALSE,
            start_submission_period INTEGER NOT NULL DEFAULT 0,
            end_submission_period INTEGER NOT NULL DEFAULT 23,
            url_params JSONB NOT NULL DEFAULT '{}',
            created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create servers table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS requests (
            id BIGSERIAL PRIMARY KEY,
            uid TEXT NOT NULL UNIQUE,
            batch_id TEXT NOT NULL DEFAULT '',
            source BIGINT NOT NULL,
            destination BIGINT NOT NULL,
            content_type TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL DEFAULT '',
            response TEXT,
            status TEXT NOT NULL DEFAULT 'ready',
            status_code TEXT NOT NULL DEFAULT '',
            retries INTEGER NOT NULL DEFAULT 0,
            errors TEXT NOT NULL DEFAULT '',
            frequency_type TEXT NOT NULL DEFAULT '',
            period TEXT NOT NULL DEFAULT '',
            day TEXT NOT NULL DEFAULT '',
            week TEXT NOT NULL DEFAULT '',
            month TEXT NOT NULL DEFAULT '',
            year TEXT NOT NULL DEFAULT '',
            msisdn TEXT NOT NULL DEFAULT '',
            raw_msg TEXT NOT NULL DEFAULT '',
            facility TEXT NOT NULL DEFAULT '',
            district TEXT NOT NULL DEFAULT '',
            report_type TEXT NOT NULL DEFAULT '',
            object_type TEXT NOT NULL DEFAULT '',
            extras TEXT NOT NULL DEFAULT '',
            suspended BOOLEAN NOT NULL DEFAULT FALSE,
            body_is_query_params BOOLEAN NOT NULL DEFAULT FALSE,
            submission_id TEXT NOT NULL DEFAULT '',
            url_suffix TEXT NOT NULL DEFAULT '',
            created TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create requests table")?;

    sqlx::query(
        r"
        CREATE INDEX IF NOT EXISTS idx_requests_status_created
        ON requests (status, created)
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create requests status index")?;

    Ok(())
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received CTRL+C signal");
        },
        _ = terminate => {
            info!("received SIGTERM signal");
        },
    }
}

use std::process::ExitCode;

use tokio::net::TcpListener;
use tracing::{error, info};

use gocbt_license::config::ServerConfig;
use gocbt_license::errors::{LicenseError, LicenseResult};
use gocbt_license::server::logging::init_tracing;
use gocbt_license::server::{build_router, AppState, Database};

#[tokio::main]
async fn main() -> ExitCode {
    // Installed before the config loads so its warnings are visible.
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&level.to_lowercase());

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server stopped: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LicenseResult<()> {
    let config = ServerConfig::load()?;

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let addr = config.bind_address();
    let product = config.product_code.clone();
    let app = build_router(AppState::new(db, config)?);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| LicenseError::ServerError(format!("failed to bind {addr}: {e}")))?;
    info!(product = %product, "GO CBT license server listening on http://{addr}");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LicenseError::ServerError(format!("server error: {e}")))?;

    info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

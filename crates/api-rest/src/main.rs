//! Standalone REST API server binary.
//!
//! ## Purpose
//! Runs the console REST API on its own.
//!
//! ## Intended use
//! Useful for development and debugging. The workspace's main `nutri-run` binary serves the
//! same router.

use api_rest::{router, AppState};
use nutri_core::ConsoleConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the console REST API server
///
/// Starts the REST API server on the configured address (default: 0.0.0.0:3000).
///
/// # Environment Variables
/// - `NUTRI_REST_ADDR`: Server address (default: "0.0.0.0:3000")
/// - `NUTRI_DATA_BACKEND` and the other `NUTRI_*` keys read by [`ConsoleConfig`]
///
/// # Errors
/// Returns an error if:
/// - the logging/tracing configuration cannot be initialised,
/// - the console configuration is invalid,
/// - the server address cannot be bound, or
/// - the HTTP server fails while running.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("api_rest=info".parse()?)
                .add_directive("nutri_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("NUTRI_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("-- Starting Nutri console REST API on {}", addr);

    let cfg = ConsoleConfig::from_env()?;
    let app = router(AppState::from_config(&cfg)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

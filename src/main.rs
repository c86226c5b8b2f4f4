use api_rest::{router, AppState};
use nutri_core::ConsoleConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the Nutri console
///
/// Resolves the console configuration once, builds the selected data-access transport and
/// serves the REST API (with Swagger UI at `/swagger-ui`).
///
/// # Environment Variables
/// - `NUTRI_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `NUTRI_DATA_BACKEND`: `rest` (default) or `document`
/// - `NUTRI_APP_ID`, `NUTRI_SERVER_URL`, `NUTRI_ACCESS_TOKEN`: REST proxy settings
/// - `NUTRI_DOCUMENT_DIR`, `NUTRI_LOCAL_STATE`: local storage locations
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, startup or serving fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nutri=info".parse()?)
                .add_directive("nutri_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cfg = ConsoleConfig::from_env()?;
    let rest_addr = std::env::var("NUTRI_REST_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());

    tracing::info!("++ Starting Nutri console ({:?} backend)", cfg.backend());
    tracing::info!("++ Starting Nutri REST on {}", rest_addr);

    let app = router(AppState::from_config(&cfg)?);

    let listener = tokio::net::TcpListener::bind(&rest_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

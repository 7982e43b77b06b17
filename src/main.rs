use anyhow::{Context, Result};
use folio_site::{
    config::AppConfig,
    path_guard::AllowedExtensions,
    server::{AppState, router, shutdown_signal},
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_FILTER: &str = "folio_site=info,security=info,tower_http=info,axum=info";

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    if let Err(err) = dotenv
        && !err.not_found()
    {
        warn!("failed loading .env: {err}");
    }

    let config = AppConfig::from_env()?;
    let state = AppState::new(config)?;
    info!(
        site_root = %state.site.root().display(),
        data_root = %state.data.root().display(),
        notifications = ?state.notifier.channels(),
        admin = state.config.admin_password.is_some(),
        "serving {}",
        state.config.service_name
    );
    info!(
        site_types = %describe(state.site.allowed()),
        data_types = %describe(state.data.allowed()),
        "extension allow-lists"
    );

    let app = router(state.clone());
    let listener = TcpListener::bind(&state.config.http_bind_addr)
        .await
        .with_context(|| format!("failed binding {}", state.config.http_bind_addr))?;
    info!("listening on {}", state.config.http_bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn describe(allowed: Option<&AllowedExtensions>) -> String {
    match allowed {
        Some(allowed) => allowed.to_string(),
        None => "any".to_string(),
    }
}

mod allowlist;
mod config;
mod dispatch;
mod error;
mod extractor;
mod rate_limit;
mod routes;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    error::ApiError,
    extractor::{YtDlp, cleanup_stale_jobs},
    routes::AppState,
};

const STALE_JOB_MAX_AGE: Duration = Duration::from_secs(2 * 60 * 60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "svd_backend=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        error!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.transfer_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create transfer directory {:?}: {error}",
                config.transfer_dir
            ))
        })?;
    cleanup_stale_jobs(&config.transfer_dir, STALE_JOB_MAX_AGE).await;

    if !config.trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: rate limiting uses the socket address.");
    }
    match &config.cookies_file {
        Some(path) => info!("Using cookies file {:?} for extraction.", path),
        None => info!("No cookies file configured, extracting unauthenticated."),
    }
    if config.pot_provider_url.is_some() {
        info!("YouTube PO-token provider configured for bot-block retries.");
    }

    let extractor = Arc::new(YtDlp::from_config(&config));
    let state = AppState::new(&config, extractor);
    info!(
        "Allowing {:?}, {} requests per {}s per client.",
        state.allowlist().domains(),
        config.rate_limit_requests,
        config.rate_limit_window_seconds
    );

    let app = routes::router(state, &config.cors_origins)?;

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Could not bind {}: {error}", config.bind_addr))
    })?;

    info!("Backend ready on http://{}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

use std::{collections::HashSet, net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderName, HeaderValue, Method, header::CONTENT_DISPOSITION},
    response::Response,
    routing::get,
};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    allowlist::Allowlist,
    config::Config,
    dispatch::{self, DOWNLOAD_FILENAME_HEADER},
    error::ApiError,
    extractor::{ExtractOptions, Extractor, JobDir},
    rate_limit::{RateDecision, RateLimiter},
};

#[derive(Clone)]
pub struct AppState {
    allowlist: Arc<Allowlist>,
    rate_limiter: Arc<RateLimiter>,
    extractor: Arc<dyn Extractor>,
    download_semaphore: Arc<Semaphore>,
    trust_proxy_headers: bool,
    cookies_file: Option<PathBuf>,
    transfer_dir: PathBuf,
}

impl AppState {
    pub fn new(config: &Config, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            allowlist: Arc::new(Allowlist::new(&config.allowed_domains)),
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_requests,
                config.rate_limit_window_seconds,
            )),
            extractor,
            download_semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            trust_proxy_headers: config.trust_proxy_headers,
            cookies_file: config.cookies_file.clone(),
            transfer_dir: config.transfer_dir.clone(),
        }
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }
}

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    url: String,
    #[serde(default)]
    redirect: bool,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Result<Router, ApiError> {
    let cors = build_cors_layer(cors_origins)?;

    Ok(Router::new()
        .route("/api/health", get(health))
        .route("/api/download", get(download_from_query).post(download_from_json))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn download_from_json(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<DownloadRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let client_ip = client_ip_for_request(&state, &headers, addr);
    handle_download(&state, &client_ip, payload).await
}

async fn download_from_query(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Query<DownloadRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let client_ip = client_ip_for_request(&state, &headers, addr);
    handle_download(&state, &client_ip, payload).await
}

async fn handle_download(
    state: &AppState,
    client_ip: &str,
    payload: DownloadRequest,
) -> Result<Response, ApiError> {
    let url = payload.url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("Enter a video URL."));
    }

    if !state.allowlist.is_allowed(url) {
        info!("Rejected URL outside the allowlist from {client_ip}: {url:?}");
        return Err(ApiError::invalid_origin());
    }

    if let RateDecision::Limited {
        retry_after_seconds,
    } = state.rate_limiter.check(client_ip).await
    {
        warn!("Rate limit exceeded for {client_ip}, retry after {retry_after_seconds}s");
        return Err(ApiError::rate_limited(retry_after_seconds));
    }

    let _permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve download capacity."))?;

    let job = JobDir::create(&state.transfer_dir).await.map_err(|error| {
        ApiError::internal(format!("Could not prepare a temporary download: {error}"))
    })?;
    let options = ExtractOptions {
        cookies_file: state.cookies_file.clone(),
        job_dir: job.path().to_path_buf(),
    };

    let extraction = state
        .extractor
        .resolve(url, &options)
        .await
        .map_err(|error| {
            warn!("Extraction failed for {url}: {error:?}");
            ApiError::from(error)
        })?;

    dispatch::respond(extraction, job, payload.redirect).await
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for")
        && let Some(first_ip) = forwarded
            .split(',')
            .map(str::trim)
            .find(|value| !value.is_empty())
    {
        return Some(first_ip.to_string());
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}

fn build_cors_layer(configured: &[String]) -> Result<CorsLayer, ApiError> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            HeaderName::from_static(DOWNLOAD_FILENAME_HEADER),
        ]);

    if configured.is_empty() || configured.iter().any(|origin| origin == "*") {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing any browser origin.");
        return Ok(layer.allow_origin(Any));
    }

    let allowed_origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin).ok_or_else(|| {
                ApiError::internal(format!(
                    "Invalid origin in CORS_ALLOWED_ORIGINS: {origin}. \
                     Use values like https://example.com"
                ))
            })
        })
        .collect::<Result<HashSet<_>, _>>()?;
    info!(
        "CORS allow-list loaded with {} origin(s): {:?}",
        allowed_origins.len(),
        allowed_origins
    );

    let allowed_origins = Arc::new(allowed_origins);
    Ok(layer.allow_origin(AllowOrigin::predicate(
        move |origin: &HeaderValue, _| {
            let normalized = origin.to_str().ok().and_then(normalize_origin);
            let allowed = normalized
                .as_ref()
                .is_some_and(|value| allowed_origins.contains(value));
            debug!("CORS origin check {:?} allowed={allowed}", origin);
            allowed
        },
    )))
}

fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    if !matches!(scheme, "http" | "https") {
        return None;
    }

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    // Url drops default ports, so any remaining port is explicit
    match parsed.port() {
        Some(port) => Some(format!("{scheme}://{host}:{port}")),
        None => Some(format!("{scheme}://{host}")),
    }
}

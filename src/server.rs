use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, State, rejection::PathRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    admin,
    config::AppConfig,
    error::ApiError,
    leads::{LeadStore, LeadSubmission},
    notify::Notifier,
    path_guard::{Rejection, SafePathResolver},
};

const ASSET_MAX_AGE: &str = "public, max-age=604800";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub site: Arc<SafePathResolver>,
    pub data: Arc<SafePathResolver>,
    pub leads: Arc<LeadStore>,
    pub notifier: Notifier,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Validates both serving roots; a bad root is a startup failure.
    pub fn new(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).context("failed creating DATA_DIR")?;
        let site = SafePathResolver::new(&config.site_root, Some(config.static_extensions.clone()))
            .context("SITE_ROOT must be an existing directory")?;
        let data = SafePathResolver::new(&config.data_dir, Some(config.data_extensions.clone()))
            .context("DATA_DIR must be a directory")?;
        let webhook_url = config.lead_webhook_url.as_deref();
        let notifier = Notifier::new(webhook_url, config.smtp.as_ref())?;
        let leads = LeadStore::new(config.leads_dir.clone());

        Ok(Self {
            config: Arc::new(config),
            site: Arc::new(site),
            data: Arc::new(data),
            leads: Arc::new(leads),
            notifier,
            started_at: Utc::now(),
        })
    }
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    status: &'static str,
    service: String,
    site: String,
    config_loaded: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    ok: bool,
    service: String,
    backend: &'static str,
    data_endpoint: &'static str,
    started_at: DateTime<Utc>,
    uptime_seconds: i64,
    leads: Option<usize>,
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/api/config", get(site_config))
        .route("/lead", post(submit_lead))
        .route("/api/lead", post(submit_lead))
        .route("/api/leads", get(admin::list_leads))
        .route("/admin/leads", get(admin::list_leads))
        .route("/admin/leads.csv", get(admin::export_leads_csv))
        .route("/data/*path", get(get_data_file))
        .fallback(get_static_file)
        .layer(middleware::map_response(nosniff))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Unset origins mean any origin may call the API.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let max_age = Duration::from_secs(86400);
    if origins.is_empty() {
        return CorsLayer::permissive().max_age(max_age);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(max_age)
}

async fn nosniff(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

async fn load_site_config(state: &AppState) -> Map<String, Value> {
    let path = &state.config.site_config_file;
    let Ok(raw) = fs::read(path).await else {
        return Map::new();
    };
    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            warn!("ignoring unreadable site config {}", path.display());
            Map::new()
        }
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let site_config = load_site_config(&state).await;
    let site = site_config
        .get("siteName")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| state.config.service_name.clone());
    (
        [(header::CACHE_CONTROL, "no-cache")],
        Json(HealthResponse {
            ok: true,
            status: "healthy",
            service: state.config.service_name.clone(),
            site,
            config_loaded: !site_config.is_empty(),
        }),
    )
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let leads = match state.leads.count().await {
        Ok(count) => Some(count),
        Err(err) => {
            warn!("lead count unavailable: {err}");
            None
        }
    };
    let now = Utc::now();
    Json(StatusResponse {
        ok: true,
        service: state.config.service_name.clone(),
        backend: "axum",
        data_endpoint: "secured",
        started_at: state.started_at,
        uptime_seconds: (now - state.started_at).num_seconds(),
        leads,
    })
}

async fn site_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(Value::Object(load_site_config(&state).await))
}

async fn submit_lead(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let submission: LeadSubmission = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("invalid JSON body".to_string()))?;
    let lead = submission.into_lead()?;
    state.leads.append(&lead).await?;
    info!("lead saved from {}", lead.email);
    state.notifier.spawn(lead);
    let saved = serde_json::json!({ "ok": true, "saved": true });
    Ok(Json(saved).into_response())
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    serve_from(&state, &state.site, "index.html", false, headers).await
}

async fn get_data_file(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
    headers: HeaderMap,
) -> Response {
    // the router has already percent-decoded the capture
    match path {
        Ok(Path(path)) => serve_from(&state, &state.data, &path, false, headers).await,
        Err(_) => ApiError::from(Rejection::MalformedInput).into_response(),
    }
}

async fn get_static_file(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return ApiError::MethodNotAllowed.into_response();
    }
    let mut requested = uri.path().trim_start_matches('/').to_string();
    if requested.is_empty() || requested.ends_with('/') {
        requested.push_str("index.html");
    }
    let mut response = serve_from(&state, &state.site, &requested, true, headers).await;
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
    }
    response
}

async fn serve_from(
    state: &AppState,
    resolver: &SafePathResolver,
    requested: &str,
    encoded: bool,
    headers: HeaderMap,
) -> Response {
    if requested.len() > state.config.max_path_length {
        return ApiError::PathTooLong.into_response();
    }
    let decision = if encoded {
        resolver.resolve_encoded(requested)
    } else {
        resolver.resolve(requested)
    };
    let file_path = match decision {
        Ok(p) => p,
        Err(rejection) => {
            log_rejection(resolver, requested, rejection);
            return ApiError::from(rejection).into_response();
        }
    };

    match serve_file(file_path, headers, state.config.max_file_size_bytes).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn log_rejection(resolver: &SafePathResolver, requested: &str, rejection: Rejection) {
    match rejection {
        Rejection::TraversalAttempt => warn!(
            target: "security",
            root = %resolver.root().display(),
            requested,
            "blocked path traversal attempt"
        ),
        other => debug!(
            root = %resolver.root().display(),
            requested,
            "file request rejected: {other}"
        ),
    }
}

async fn serve_file(
    file_path: PathBuf,
    headers: HeaderMap,
    max_size: u64,
) -> Result<Response, ApiError> {
    // the file may vanish between resolution and here
    let metadata = fs::metadata(&file_path)
        .await
        .map_err(|_| ApiError::Path(Rejection::NotFound))?;
    if !metadata.is_file() {
        return Err(ApiError::Path(Rejection::NotFound));
    }
    if metadata.len() > max_size {
        return Err(ApiError::TooLarge);
    }

    let bytes = match fs::read(&file_path).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let shown = file_path.display();
            return Err(ApiError::Internal(format!("failed to read {shown}: {err}")));
        }
    };

    let digest = hex::encode(Sha256::digest(&bytes));
    let etag = format!("\"{digest}\"");

    if let Some(client_etag) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        && etag_matches(client_etag, &etag)
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let content_type = mime_guess::from_path(&file_path).first_or_octet_stream();
    let cache_control = if content_type.essence_str() == "text/html" {
        "no-cache"
    } else {
        ASSET_MAX_AGE
    };

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    response_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );
    if let Ok(v) = HeaderValue::from_str(&etag) {
        response_headers.insert(header::ETAG, v);
    }
    if let Ok(modified) = metadata.modified() {
        let last_modified = httpdate::fmt_http_date(modified);
        if let Ok(v) = HeaderValue::from_str(&last_modified) {
            response_headers.insert(header::LAST_MODIFIED, v);
        }
    }

    Ok(response)
}

/// `If-None-Match` may list several tags or `*`.
fn etag_matches(header: &str, etag: &str) -> bool {
    header
        .split(',')
        .map(str::trim)
        .any(|tag| tag == "*" || tag == etag)
}

pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let terminate = signal(SignalKind::terminate());
        let interrupt = signal(SignalKind::interrupt());
        match (terminate, interrupt) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}

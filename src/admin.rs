//! Basic-auth protected lead viewer and CSV export.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::{
    error::ApiError,
    leads::{Lead, render_csv},
    server::AppState,
};

const REALM: &str = "Basic realm=\"Site Admin\"";

#[derive(Debug, PartialEq, Eq)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

impl BasicAuth {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let raw = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
        let (user, password) = raw.split_once(':')?;
        Some(Self {
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Compares digests so mismatches do not short-circuit on the first byte.
    pub fn check(&self, user: &str, password: &str) -> bool {
        let user_ok = Sha256::digest(self.user.as_bytes()) == Sha256::digest(user.as_bytes());
        let password_ok =
            Sha256::digest(self.password.as_bytes()) == Sha256::digest(password.as_bytes());
        user_ok & password_ok
    }
}

/// No configured password means the admin surface is closed.
pub fn is_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(password) = state.config.admin_password.as_deref() else {
        return false;
    };
    let Some(auth) = BasicAuth::from_headers(headers) else {
        return false;
    };
    auth.check(&state.config.admin_user, password)
}

fn challenge() -> Response {
    let mut response = (StatusCode::UNAUTHORIZED, "Auth required").into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(REALM));
    response
}

#[derive(Serialize)]
struct LeadsResponse {
    ok: bool,
    count: usize,
    rows: Vec<Lead>,
}

pub async fn list_leads(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_authorized(&state, &headers) {
        warn!(target: "security", "unauthorized leads request");
        return challenge();
    }
    match state.leads.list().await {
        Ok(rows) => Json(LeadsResponse {
            ok: true,
            count: rows.len(),
            rows,
        })
        .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

pub async fn export_leads_csv(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !is_authorized(&state, &headers) {
        warn!(target: "security", "unauthorized leads export");
        return challenge();
    }
    match state.leads.list().await {
        Ok(rows) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"leads.csv\""),
                (header::CACHE_CONTROL, "no-store"),
            ],
            render_csv(&rows),
        )
            .into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

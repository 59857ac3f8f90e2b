//! Request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::ApiError;
use super::session::{
    bearer_token, cookie_value, expired_cookie, secret_matches, session_cookie,
};
use super::AppState;
use crate::dashboard::{self, DashboardData, HistoryReport, NodeReport, TrendReport};

/// Proof that the request carries a live operator session.
#[derive(Debug, Clone, Copy)]
pub struct Operator;

impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let id = cookie_value(&parts.headers, &state.config.server.cookie_name)
            .ok_or(ApiError::AuthenticationRequired)?;
        if state.sessions.is_valid(id, Utc::now()) {
            Ok(Self)
        } else {
            Err(ApiError::AuthenticationRequired)
        }
    }
}

fn require_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
    match bearer_token(headers) {
        Some(token) if secret_matches(token, expected) => Ok(()),
        _ => Err(ApiError::AuthorizationDenied),
    }
}

/// Login form or JSON body.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    username: String,
    password: String,
}

pub async fn login(State(state): State<AppState>, request: Request) -> Result<Response, ApiError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    let credentials = if is_json {
        let Json(credentials) = Json::<Credentials>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        credentials
    } else {
        let Form(credentials) = Form::<Credentials>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        credentials
    };

    let auth = &state.config.auth;
    let username_ok = secret_matches(&credentials.username, auth.username.as_deref());
    let password_ok = secret_matches(&credentials.password, auth.password.as_deref());
    if !(username_ok && password_ok) {
        warn!(username = %credentials.username, "Rejected login");
        return Err(ApiError::InvalidCredentials);
    }

    let id = state.sessions.create(Utc::now());
    info!(username = %credentials.username, "Operator logged in");

    let cookie = session_cookie(
        &state.config.server.cookie_name,
        &id,
        state.sessions.ttl(),
    );
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "status": "ok" })),
    )
        .into_response())
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let name = &state.config.server.cookie_name;
    if let Some(id) = cookie_value(&headers, name) {
        if state.sessions.revoke(id) {
            info!("Operator logged out");
        }
    }
    (
        [(header::SET_COOKIE, expired_cookie(name))],
        Json(json!({ "status": "ok" })),
    )
        .into_response()
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn dashboard_data(
    _: Operator,
    State(state): State<AppState>,
) -> Result<Json<DashboardData>, ApiError> {
    let data = state
        .with_storage(|storage| dashboard::dashboard_data(storage))
        .await?;
    Ok(Json(data))
}

pub async fn history(
    _: Operator,
    State(state): State<AppState>,
) -> Result<Json<HistoryReport>, ApiError> {
    let settings = state.settings;
    let report = state
        .with_storage(move |storage| dashboard::history(storage, &settings, Utc::now()))
        .await?;
    Ok(Json(report))
}

pub async fn daily_trend(
    _: Operator,
    State(state): State<AppState>,
) -> Result<Json<TrendReport>, ApiError> {
    let settings = state.settings;
    let cache = state.cache.clone();
    let report = state
        .with_storage(move |storage| {
            dashboard::daily_trend(storage, &settings, &cache, Utc::now())
        })
        .await?;
    Ok(Json(report))
}

pub async fn update(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<NodeReport>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&headers, state.config.auth.api_key.as_deref())?;
    let Json(report) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let node = report.node.clone();
    let stored = state
        .with_storage(move |storage| dashboard::ingest(storage, &report, Utc::now()))
        .await?;
    info!(node = %node, stored, "Accepted node report");

    Ok(Json(json!({ "status": "ok", "stored": stored })))
}

pub async fn reset(
    _: Operator,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_bearer(&headers, state.config.auth.reset_key.as_deref())?;

    let deleted = state.with_storage(|storage| storage.reset()).await?;
    warn!(deleted, "Measurements reset");

    Ok(Json(json!({ "status": "ok", "deleted": deleted })))
}

//! `/user`, `/healthz`, and `/loglevel` handlers (spec.md §6).

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warden_core::LookupKind;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub phone: Option<String>,
    pub mail: Option<String>,
    pub user_id: Option<String>,
    #[allow(dead_code)]
    pub lang: Option<String>,
}

/// `GET /user?phone=…|mail=…|user_id=…` — exactly one identifier must
/// be present (spec.md §4.5, §8 scenarios 3/4).
pub async fn lookup_user(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let present: Vec<(LookupKind, &str)> = [
        query.phone.as_deref().map(|v| (LookupKind::Phone, v)),
        query.mail.as_deref().map(|v| (LookupKind::Mail, v)),
        query.user_id.as_deref().map(|v| (LookupKind::UserId, v)),
    ]
    .into_iter()
    .flatten()
    .collect();

    let (kind, key) = match present.as_slice() {
        [] => {
            return Err(ApiError::input("exactly one identifier is required")
                .with_code("missing_identifier"))
        }
        [one] => *one,
        _ => {
            return Err(
                ApiError::input("exactly one identifier is allowed").with_code("multiple_identifiers")
            )
        }
    };

    let key = if matches!(kind, LookupKind::Mail) {
        key.to_lowercase()
    } else {
        key.to_string()
    };

    match state.cache.lookup(kind, &key) {
        Some(user) => Ok(Json(serde_json::to_value(&*user).expect("AllowListUser always serializes"))),
        None => Err(ApiError::not_found("identifier not found").with_code("not_found")),
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub cache_size: usize,
}

/// `GET /healthz` — liveness. Warden serves not-found responses even
/// with an empty cache by design (spec.md §4.3), so liveness never
/// depends on the cache being populated; it only reports size.
pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        cache_size: state.cache.size(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LogLevelRequest {
    pub level: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogLevelResponse {
    pub level: String,
}

/// `GET/POST /loglevel` — reads or sets the runtime log level. Gated by
/// the same API-key set used for the service-auth chain (spec.md §6:
/// "200; 401").
pub async fn get_log_level(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LogLevelResponse>, ApiError> {
    require_api_key(&state, &headers)?;
    Ok(Json(LogLevelResponse {
        level: crate::telemetry::current_level(),
    }))
}

pub async fn set_log_level(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<LogLevelRequest>,
) -> Result<Json<LogLevelResponse>, ApiError> {
    require_api_key(&state, &headers)?;
    let level = body
        .level
        .ok_or_else(|| ApiError::input("missing 'level' field"))?;

    crate::telemetry::set_level(&level).map_err(ApiError::input)?;

    Ok(Json(LogLevelResponse { level }))
}

fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    if state.auth.api_keys.is_empty() {
        return Ok(());
    }
    let provided = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::auth("missing X-API-Key header"))?;

    if state.auth.api_keys.iter().any(|k| k == provided) {
        Ok(())
    } else {
        Err(ApiError::auth("invalid API key"))
    }
}

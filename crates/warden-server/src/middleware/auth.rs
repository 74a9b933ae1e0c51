//! Service-auth chain middleware (spec.md §4.5 step 6): the first
//! satisfied of mTLS client cert, HMAC signature, or API key passes the
//! request through; none satisfied is an `AuthError`.

use crate::auth::verify_hmac;
use crate::error::ApiError;
use crate::state::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

const MAX_BUFFERED_BODY: usize = 16 * 1024 * 1024;

/// Set by the TLS-terminating proxy when the client presented a
/// verified certificate. TLS server plumbing itself is out of scope
/// (spec.md §1) — this middleware only reads the outcome.
const CLIENT_CERT_HEADER: &str = "x-client-cert-verified";

pub async fn service_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if has_verified_client_cert(&request) {
        return Ok(next.run(request).await);
    }

    let request = authenticate(&state, request).await?;
    Ok(next.run(request).await)
}

/// Tries HMAC first (when `X-Signature`/`X-Timestamp`/`X-Key-Id` are
/// all present), falling back to API-key auth otherwise.
async fn authenticate(state: &AppState, request: Request<Body>) -> Result<Request<Body>, ApiError> {
    if has_hmac_headers(&request) {
        try_hmac(state, request).await
    } else {
        api_key_fallback(state, request).await
    }
}

fn has_hmac_headers(request: &Request<Body>) -> bool {
    let headers = request.headers();
    headers.contains_key("x-signature")
        && headers.contains_key("x-timestamp")
        && headers.contains_key("x-key-id")
}

fn has_verified_client_cert(request: &Request<Body>) -> bool {
    request
        .headers()
        .get(CLIENT_CERT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Verifies the HMAC signature (spec.md §4.5), restoring the body as a
/// fresh reader for the handler afterward. Called only when all three
/// HMAC headers are present — `has_hmac_headers` gates the call.
async fn try_hmac(state: &AppState, request: Request<Body>) -> Result<Request<Body>, ApiError> {
    let headers = request.headers().clone();
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .expect("has_hmac_headers guarantees presence");
    let timestamp = headers
        .get("x-timestamp")
        .and_then(|v| v.to_str().ok())
        .expect("has_hmac_headers guarantees presence");
    let key_id = headers
        .get("x-key-id")
        .and_then(|v| v.to_str().ok())
        .expect("has_hmac_headers guarantees presence");

    let secret = state
        .auth
        .hmac_keys
        .get(key_id)
        .ok_or_else(|| ApiError::auth("unknown X-Key-Id"))?;

    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| ApiError::auth("invalid X-Timestamp"))?;

    let method = request.method().to_string();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    // Read the body into a buffer once so the signature check doesn't
    // consume it, then restore a fresh reader for the handler
    // (spec.md §4.5: "the request body is read into a buffer once and
    // restored to the handler as a fresh reader").
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BUFFERED_BODY)
        .await
        .map_err(|_| ApiError::input("failed to buffer request body"))?;

    let tolerance = state.auth.timestamp_tolerance.as_secs() as i64;
    let valid = verify_hmac(
        secret,
        &method,
        &path_and_query,
        timestamp,
        &bytes,
        signature,
        tolerance,
        crate::auth::now_unix(),
    );

    if !valid {
        return Err(ApiError::auth("HMAC signature verification failed"));
    }

    Ok(Request::from_parts(parts, Body::from(bytes)))
}

async fn api_key_fallback(state: &AppState, request: Request<Body>) -> Result<Request<Body>, ApiError> {
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::to_string)
        })
        .ok_or_else(|| ApiError::auth("missing X-API-Key or Authorization header"))?;

    if state.auth.api_keys.iter().any(|k| k == &provided) {
        Ok(request)
    } else {
        Err(ApiError::auth("invalid API key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_cert_header_must_be_exactly_true() {
        let request = axum::http::Request::builder()
            .header(CLIENT_CERT_HEADER, "true")
            .body(Body::empty())
            .unwrap();
        assert!(has_verified_client_cert(&request));

        let request = axum::http::Request::builder()
            .header(CLIENT_CERT_HEADER, "false")
            .body(Body::empty())
            .unwrap();
        assert!(!has_verified_client_cert(&request));

        let request = axum::http::Request::builder().body(Body::empty()).unwrap();
        assert!(!has_verified_client_cert(&request));
    }
}

//! Per-client-IP rate limiting (spec.md §4.4, §4.5 step 7), sitting on
//! top of `warden_core::RateLimiter`'s fixed-window counter. Client IP
//! comes from the trusted-proxy-aware resolver so a plain client can't
//! spoof `X-Forwarded-For` to dodge its own bucket.

use crate::error::ApiError;
use crate::ip_resolver::resolve_client_ip;
use crate::middleware::metrics::{normalize_endpoint, RATE_LIMIT_REJECTIONS};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;

pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let client_ip = resolve_client_ip(request.headers(), peer.ip(), &state.auth);
    let key = client_ip.to_string();

    if !state.rate_limiter.allow(&key) {
        let endpoint = normalize_endpoint(request.uri().path());
        RATE_LIMIT_REJECTIONS.with_label_values(&[&endpoint]).inc();
        return Err(ApiError::rate_limited("rate limit exceeded"));
    }

    Ok(next.run(request).await)
}

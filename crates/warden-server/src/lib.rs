use axum::{
    middleware as axum_middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ip_resolver;
pub mod middleware;
pub mod state;
pub mod telemetry;

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// Builds the full request pipeline (spec.md §4.5): i18n resolution,
/// security headers, body limit, compression, metrics, the service-auth
/// chain, and per-IP rate limiting, wrapping `/user`; `/healthz`,
/// `/metrics`, and `/loglevel` sit outside the auth chain per their own
/// rules (spec.md §6).
pub fn create_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    let lookup_routes = Router::new()
        .route("/user", get(handlers::lookup_user))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::service_auth_middleware,
        ));

    let loglevel_routes = Router::new().route(
        "/loglevel",
        get(handlers::get_log_level).post(handlers::set_log_level),
    );

    let unauthenticated_routes = Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(middleware::metrics::create_metrics_router());

    Router::new()
        .merge(lookup_routes)
        .merge(loglevel_routes)
        .merge(unauthenticated_routes)
        .layer(axum_middleware::from_fn(
            middleware::logging::request_tracing_middleware,
        ))
        .layer(axum_middleware::from_fn(
            middleware::metrics::metrics_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(axum_middleware::from_fn(
            middleware::headers::security_headers_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::i18n::i18n_middleware))
        .layer(middleware::cors::create_cors_layer_for_environment())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::collections::HashMap;
    use std::time::Duration;
    use tower::ServiceExt;
    use warden_core::lock::LocalMutexLock;
    use warden_core::scheduler::LoaderConfig;
    use warden_core::source::LoadOptions;

    fn test_state() -> Arc<AppState> {
        let cache = Arc::new(warden_core::UserCache::new());
        let rate_limiter = warden_core::RateLimiter::new(1000, Duration::from_secs(1), 100, 10);
        let scheduler = Arc::new(warden_core::RefreshScheduler::new(
            cache.clone(),
            Arc::new(LocalMutexLock::new()),
            "test",
            Duration::from_secs(30),
            LoaderConfig {
                file_path: None,
                dir_glob: None,
                remote_url: None,
                remote_auth: None,
                options: LoadOptions::default(),
            },
            None,
        ));
        let auth = AuthConfig {
            hmac_keys: HashMap::new(),
            timestamp_tolerance: Duration::from_secs(60),
            api_keys: Vec::new(),
            trusted_proxies: Vec::new(),
            trust_private_proxies: false,
        };
        Arc::new(AppState::new(cache, rate_limiter, scheduler, auth))
    }

    #[tokio::test]
    async fn healthz_is_reachable_without_auth() {
        let request = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();
        // Exercised in isolation: the full router additionally requires
        // ConnectInfo<SocketAddr> (wired in main.rs via
        // into_make_service_with_connect_info) for the rate-limit layer
        // on /user, which /healthz never passes through.
        let response = axum::Router::new()
            .route("/healthz", get(handlers::healthz))
            .with_state(test_state())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn user_without_identifier_is_bad_request() {
        let request = Request::builder()
            .uri("/user")
            .body(Body::empty())
            .unwrap();
        let response = axum::Router::new()
            .route("/user", get(handlers::lookup_user))
            .with_state(test_state())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

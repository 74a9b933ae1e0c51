//! Concurrency-facing exercises: the rate limiter under a burst of
//! requests from one IP, and the HMAC signature path end-to-end
//! through the router.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use warden_core::cache::Snapshot;
use warden_core::lock::LocalMutexLock;
use warden_core::model::AllowListUser;
use warden_core::scheduler::LoaderConfig;
use warden_core::source::LoadOptions;
use warden_core::{RateLimiter, RefreshScheduler, UserCache};
use warden_server::auth::{compute_signature, hash_body, now_unix, signature_input};
use warden_server::config::AuthConfig;
use warden_server::create_router;
use warden_server::state::AppState;

fn seeded_state(auth: AuthConfig, rate: u32) -> Arc<AppState> {
    let cache = Arc::new(UserCache::new());
    cache.swap(Snapshot::build(vec![AllowListUser {
        phone: Some("13800138000".to_string()),
        mail: Some("a@example.com".to_string()),
        user_id: Some("u1".to_string()),
        extra: BTreeMap::new(),
    }]));

    let rate_limiter = RateLimiter::new(rate, Duration::from_secs(60), 100, 10);
    let scheduler = Arc::new(RefreshScheduler::new(
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

    Arc::new(AppState::new(cache, rate_limiter, scheduler, auth))
}

fn open_auth() -> AuthConfig {
    AuthConfig {
        hmac_keys: HashMap::new(),
        timestamp_tolerance: Duration::from_secs(60),
        api_keys: Vec::new(),
        trusted_proxies: Vec::new(),
        trust_private_proxies: false,
    }
}

fn peer_request(uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 443))))
}

/// A burst past the configured rate serves 429s once the window's
/// counter is exhausted, without the server dropping or hanging on
/// any request (spec.md §4.4).
#[tokio::test]
async fn burst_past_rate_limit_is_denied_not_dropped() {
    let app = create_router(seeded_state(open_auth(), 5), 1024 * 1024);

    let mut statuses = Vec::new();
    for _ in 0..10 {
        let request = peer_request("/user?phone=13800138000")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        statuses.push(response.status());
    }

    assert!(statuses.iter().filter(|s| **s == StatusCode::OK).count() >= 1);
    assert!(statuses
        .iter()
        .any(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(statuses.len(), 10);
}

/// A correctly computed HMAC signature passes the service-auth chain
/// end-to-end (spec.md §4.5, §8 scenario 6).
#[tokio::test]
async fn hmac_signed_request_succeeds() {
    let mut hmac_keys = HashMap::new();
    hmac_keys.insert("k1".to_string(), "top-secret".to_string());
    let auth = AuthConfig {
        hmac_keys,
        ..open_auth()
    };
    let app = create_router(seeded_state(auth, 1000), 1024 * 1024);

    let timestamp = now_unix();
    let path = "/user?phone=13800138000";
    let body_hash = hash_body(b"");
    let input = signature_input("GET", path, timestamp, &body_hash);
    let signature = compute_signature("top-secret", &input);

    let request = peer_request(path)
        .header("x-signature", signature)
        .header("x-timestamp", timestamp.to_string())
        .header("x-key-id", "k1")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// A tampered signature is rejected even with a valid key ID and a
/// fresh timestamp.
#[tokio::test]
async fn hmac_with_wrong_signature_is_rejected() {
    let mut hmac_keys = HashMap::new();
    hmac_keys.insert("k1".to_string(), "top-secret".to_string());
    let auth = AuthConfig {
        hmac_keys,
        ..open_auth()
    };
    let app = create_router(seeded_state(auth, 1000), 1024 * 1024);

    let timestamp = now_unix();

    let request = peer_request("/user?phone=13800138000")
        .header("x-signature", "0000000000000000000000000000000000000000000000000000000000000000")
        .header("x-timestamp", timestamp.to_string())
        .header("x-key-id", "k1")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

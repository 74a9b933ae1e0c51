use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use warden_core::lock::{DistributedLock, LocalMutexLock, RedisLock};
use warden_core::scheduler::{LoaderConfig, TickOutcome};
use warden_core::{RefreshScheduler, UserCache};
use warden_server::config::{AuthConfig, RateLimitConfig, RefreshConfig, ServerConfig, SourceConfig};
use warden_server::middleware::metrics::REFRESH_OUTCOME;
use warden_server::state::AppState;
use warden_server::{create_router, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    info!("Starting Warden");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let server_config = ServerConfig::from_env()?;
    let source_config = SourceConfig::from_env()?;
    let refresh_config = RefreshConfig::from_env()?;
    let rate_limit_config = RateLimitConfig::from_env()?;
    let auth_config = AuthConfig::from_env()?;

    let lock: Arc<dyn DistributedLock> = match &refresh_config.redis_url {
        Some(url) => match RedisLock::new(url) {
            Ok(lock) => Arc::new(lock),
            Err(err) => {
                warn!(error = %err, "redis lock backend unreachable, falling back to a process-local mutex");
                Arc::new(LocalMutexLock::new())
            }
        },
        None => Arc::new(LocalMutexLock::new()),
    };

    let kv_write_through = match &refresh_config.redis_url {
        Some(url) => redis::Client::open(url.as_str()).ok(),
        None => None,
    };

    let cache = Arc::new(UserCache::new());
    let scheduler = Arc::new(RefreshScheduler::new(
        cache.clone(),
        lock,
        refresh_config.lock_name.clone(),
        refresh_config.lock_ttl,
        LoaderConfig {
            file_path: source_config.file_path,
            dir_glob: source_config.dir_glob,
            remote_url: source_config.remote_url,
            remote_auth: source_config.remote_auth,
            options: source_config.options,
        },
        kv_write_through,
    ));

    // One synchronous initial load before the listener accepts traffic
    // (spec.md §4.3 step 4).
    scheduler.initial_load().await;

    let rate_limiter = warden_core::RateLimiter::new(
        rate_limit_config.rate,
        rate_limit_config.window,
        rate_limit_config.max_visitors,
        rate_limit_config.max_whitelist,
    );
    rate_limiter.spawn_sweeper(rate_limit_config.cleanup_interval);

    let state = Arc::new(AppState::new(
        cache,
        rate_limiter.clone(),
        scheduler.clone(),
        auth_config,
    ));

    // Driven by `RefreshScheduler::run_with_callback` so a panicking
    // loader is caught and logged without killing the loop (spec.md
    // §4.3); the callback reflects each tick's outcome in
    // `warden_refresh_outcomes_total` without pulling prometheus into
    // the data-plane crate.
    let refresh_scheduler = scheduler.clone();
    let refresh_interval = refresh_config.interval;
    let refresh_task = tokio::spawn(async move {
        refresh_scheduler
            .run_with_callback(refresh_interval, |outcome| {
                let label = match outcome {
                    TickOutcome::SkippedLockHeld => "skipped_lock_held",
                    TickOutcome::Unchanged => "unchanged",
                    TickOutcome::Swapped { .. } => "swapped",
                    TickOutcome::LoadFailed => "load_failed",
                };
                REFRESH_OUTCOME.with_label_values(&[label]).inc();
                if let TickOutcome::Swapped { count } = outcome {
                    info!(count, "refresh swapped in a new snapshot");
                }
            })
            .await;
    });

    let app = create_router(state, server_config.max_body_bytes as usize);

    let addr = SocketAddr::from(([0, 0, 0, 0], server_config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Warden listening on http://{}", addr);
    info!("Prometheus metrics at http://{}/metrics", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Graceful shutdown (spec.md §5): stop the scheduler ticker, then
    // wait for the refresh loop to notice and exit, draining any tick
    // already in progress rather than cutting it off mid-flight.
    scheduler.stop();
    if let Err(err) = refresh_task.await {
        warn!(error = %err, "refresh loop task panicked during shutdown");
    }
    rate_limiter.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

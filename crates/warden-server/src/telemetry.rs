//! Logging init and the runtime log-level handle backing `/loglevel`.
//!
//! Grounded on the teacher's `tracing_subscriber::fmt()` init in
//! `main.rs`, extended with a `reload` layer so the level can change
//! without a process restart.

use std::sync::OnceLock;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::reload;
use tracing_subscriber::{prelude::*, EnvFilter};

static RELOAD_HANDLE: OnceLock<reload::Handle<LevelFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Initializes the global tracing subscriber. Must be called exactly
/// once at startup, before any other thread emits a log line.
pub fn init() {
    let initial = EnvFilter::try_from_default_env()
        .ok()
        .and_then(|f| f.to_string().parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    let (filter, handle) = reload::Layer::new(initial);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    RELOAD_HANDLE
        .set(handle)
        .expect("telemetry::init called more than once");
}

pub fn current_level() -> String {
    RELOAD_HANDLE
        .get()
        .and_then(|h| h.with_current(|f| f.to_string()).ok())
        .unwrap_or_else(|| "info".to_string())
}

pub fn set_level(level: &str) -> Result<(), String> {
    let parsed: LevelFilter = level
        .parse()
        .map_err(|_| format!("invalid log level: {level}"))?;

    RELOAD_HANDLE
        .get()
        .ok_or_else(|| "telemetry not initialized".to_string())?
        .reload(parsed)
        .map_err(|e| format!("failed to reload log level: {e}"))
}

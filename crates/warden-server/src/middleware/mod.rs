/// Middleware modules for API server
pub mod auth;
pub mod cors;
pub mod headers;
pub mod i18n;
pub mod logging;
pub mod metrics;
pub mod rate_limit;

//! Application state: the shared data-plane handles every handler and
//! middleware layer reaches into.

use crate::config::AuthConfig;
use std::sync::Arc;
use warden_core::{RateLimiter, RefreshScheduler, UserCache};

pub struct AppState {
    pub cache: Arc<UserCache>,
    pub rate_limiter: Arc<RateLimiter>,
    pub scheduler: Arc<RefreshScheduler>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        cache: Arc<UserCache>,
        rate_limiter: Arc<RateLimiter>,
        scheduler: Arc<RefreshScheduler>,
        auth: AuthConfig,
    ) -> Self {
        AppState {
            cache,
            rate_limiter,
            scheduler,
            auth,
        }
    }
}

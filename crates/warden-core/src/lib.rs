//! Data-plane library for Warden: the concurrent user cache, its
//! background refresh pipeline, the multi-source rule loader, the
//! fixed-window rate limiter, and the distributed-lock abstraction
//! that coordinates refreshes across replicas.

pub mod cache;
pub mod error;
pub mod lock;
pub mod model;
pub mod ratelimit;
pub mod scheduler;
pub mod source;

pub use cache::{LookupKind, Snapshot, UserCache};
pub use error::{Error, Result};
pub use model::{normalize, AllowListUser};
pub use ratelimit::RateLimiter;
pub use scheduler::{LoaderConfig, RefreshScheduler, TickOutcome};
pub use source::{LoadOptions, Mode};

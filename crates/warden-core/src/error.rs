use thiserror::Error;

/// Error kinds produced by the data plane (spec.md §7). `warden-server`
/// maps these onto HTTP statuses at the outermost error-boundary layer;
/// this crate never encodes HTTP semantics itself.
#[derive(Debug, Error)]
pub enum Error {
    #[error("input error: {0}")]
    Input(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("not found")]
    NotFound,

    #[error("load error: {0}")]
    Load(String),

    #[error("lock error: {0}")]
    Lock(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

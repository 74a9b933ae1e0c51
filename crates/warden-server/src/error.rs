//! Structured error handling with secure defaults.
//!
//! Handler-layer errors are translated to HTTP responses once, at the
//! outermost error-boundary (the `IntoResponse` impl below) — they are
//! not thrown across middleware (spec.md §7).

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;

/// API error type with structured error information.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Error type identifier (spec.md §7 error kinds).
    pub error: String,
    /// User-friendly error message.
    pub message: String,
    /// Optional machine-readable code (spec.md §8 scenario 3/4: "code
    /// for missing/multiple identifiers").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip)]
    pub status_code: StatusCode,
}

impl ApiError {
    pub fn new(error: impl Into<String>, message: impl Into<String>, status_code: StatusCode) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            code: None,
            status_code,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// `InputError` (spec.md §7) — malformed or contradictory query
    /// parameters.
    pub fn input(message: impl Into<String>) -> Self {
        Self::new("input_error", message, StatusCode::BAD_REQUEST)
    }

    /// `AuthError` — missing/invalid API key, HMAC, or client
    /// certificate.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new("auth_error", message, StatusCode::UNAUTHORIZED)
    }

    /// `NotFoundError` — identifier not in the current snapshot.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found_error", message, StatusCode::NOT_FOUND)
    }

    /// `MethodError` — unsupported HTTP method.
    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::new("method_error", message, StatusCode::METHOD_NOT_ALLOWED)
    }

    /// `PayloadError` — body exceeds configured cap.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new("payload_error", message, StatusCode::PAYLOAD_TOO_LARGE)
    }

    /// `RateLimitError` — bucket exhausted.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new("rate_limit_error", message, StatusCode::TOO_MANY_REQUESTS)
    }

    /// `InternalError` — unexpected condition; detail is hidden outside
    /// development mode (spec.md §7 "User-visible behavior").
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message, StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            "service_unavailable",
            message,
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code;
        (status, Json(self)).into_response()
    }
}

/// `LoadError`/`LockError` are logged and never surfaced to clients
/// (spec.md §7); this impl only exists for the rare case a core-crate
/// error escapes to a request handler (e.g. a direct lookup against a
/// cache that failed to initialize), and it is intentionally generic.
impl From<warden_core::Error> for ApiError {
    fn from(err: warden_core::Error) -> Self {
        tracing::error!(error = %err, "internal error surfaced from data plane");
        match err {
            warden_core::Error::Input(msg) => ApiError::input(msg),
            warden_core::Error::Auth(msg) => ApiError::auth(msg),
            warden_core::Error::NotFound => {
                ApiError::not_found("identifier not found").with_code("not_found")
            }
            warden_core::Error::Load(_) | warden_core::Error::Lock(_) => {
                ApiError::internal("An internal error occurred. Please try again later.")
            }
            warden_core::Error::Internal(_) => {
                ApiError::internal("An internal error occurred. Please try again later.")
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!("internal error: {:?}", err);
        ApiError::internal("An internal error occurred. Please try again later.")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

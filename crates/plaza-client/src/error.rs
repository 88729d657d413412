//! Error types, split by flow: `ApiError` for the request path,
//! `AuthError` for session flows.

use std::time::Duration;

use plaza_client_core::input::AuthInputError;
use serde::Deserialize;
use thiserror::Error;

/// Request-path error.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized: {url}")]
    Unauthorized { url: String },

    #[error("forbidden: {url}")]
    Forbidden { url: String },

    #[error("request rejected ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("request timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("response decode failed: {message}")]
    Decode { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl ApiError {
    /// Whether another attempt could plausibly succeed. 4xx answers are
    /// terminal; only transport faults and 5xx qualify.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::Server { .. }
        )
    }
}

/// Session-flow error.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("a new two-factor challenge is required")]
    TwoFactorRequired,

    #[error("invalid verification code")]
    InvalidCode,

    #[error("two-factor challenge expired")]
    ChallengeExpired,

    #[error("code was just sent; retry in {}s", retry_after.as_secs())]
    ResendThrottled { retry_after: Duration },

    #[error(transparent)]
    Input(#[from] AuthInputError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Server error envelope: `{"error": "...", "message": "..."}` with both
/// fields optional.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

impl ErrorBody {
    /// Best human-readable detail from a response body, if any.
    pub(crate) fn detail(text: &str) -> Option<String> {
        let parsed: Self = serde_json::from_str(text).ok()?;
        parsed.message.or(parsed.error)
    }
}

/// Maps a login transport failure to the auth vocabulary. Rejections are
/// bad credentials; everything retryable passes through untouched.
pub(crate) fn classify_login_failure(error: ApiError) -> AuthError {
    match error {
        ApiError::Unauthorized { .. }
        | ApiError::Forbidden { .. }
        | ApiError::Validation { .. } => AuthError::InvalidCredentials,
        other => AuthError::Api(other),
    }
}

/// Maps a verify/resend failure. An envelope mentioning expiry means the
/// challenge is dead; other rejections mean the code was wrong.
pub(crate) fn classify_verify_failure(error: ApiError) -> AuthError {
    match error {
        ApiError::Validation { ref message, .. }
            if message.to_lowercase().contains("expired") =>
        {
            AuthError::ChallengeExpired
        }
        ApiError::Unauthorized { .. }
        | ApiError::Forbidden { .. }
        | ApiError::Validation { .. } => AuthError::InvalidCode,
        other => AuthError::Api(other),
    }
}

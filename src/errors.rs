//! Application error model
//!
//! Defines a typed error hierarchy using `thiserror`. Every fallible internal
//! function returns [`AppResult`]; errors propagate with `?` until the cycle
//! boundary in [`crate::cycle::run_cycle`], where they are logged and
//! swallowed so the scheduler keeps running.

use thiserror::Error;

/// Application error type
///
/// Covers all error cases the auto-reply daemon may encounter. Transient
/// provider failures, authorization failures, and logic errors all end a
/// cycle the same way; the variants exist so the operator-facing log line
/// says which kind it was.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid configuration or malformed input (bad env var, bad identifier)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Authorization failure (credential expired, rejected, or missing)
    #[error("authorization failed: {0}")]
    AuthFailed(String),
    /// Operation timeout (request exceeded the configured HTTP deadline)
    #[error("operation timed out: {0}")]
    Timeout(String),
    /// Provider returned a non-success response
    #[error("provider error: {0}")]
    Provider(String),
    /// Internal error (unexpected failure, malformed response shape)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Map a transport error to the appropriate variant
    ///
    /// `reqwest` folds request deadlines into its error type; timeouts map to
    /// [`AppError::Timeout`], everything else from the transport is
    /// [`AppError::Internal`].
    pub fn from_transport(context: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{context} timed out"))
        } else {
            Self::Internal(format!("{context} failed: {err}"))
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

//! Configuration module for the auto-reply daemon
//!
//! All configuration is loaded from environment variables under the
//! `MAIL_AUTOREPLY_` prefix. OAuth client credentials are required; polling
//! cadence, search filter, reply text, and label name fall back to defaults.

use std::env;
use std::env::VarError;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

/// Default search filter for candidate messages: unread and not sent by self
pub const DEFAULT_SEARCH_QUERY: &str = "is:unread -from:me";

/// Default reply body text
pub const DEFAULT_REPLY_BODY: &str = "Auto-reply: Thanks for your email!";

/// Default label applied to messages that received an auto-reply
pub const DEFAULT_LABEL_NAME: &str = "Auto-Replied";

/// Daemon configuration
///
/// Holds OAuth credentials, the polling/reply constants, and transport
/// settings. Secrets are stored using `SecretString` to prevent accidental
/// logging.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// OAuth 2.0 client ID from the provider's developer console
    pub client_id: String,
    /// OAuth 2.0 client secret
    pub client_secret: SecretString,
    /// Long-lived refresh token; absent until the `authorize` flow has run
    pub refresh_token: Option<SecretString>,
    /// Provider search query selecting candidate messages
    pub search_query: String,
    /// Body text of the auto-reply
    pub reply_body: String,
    /// Name of the label applied after a reply is sent
    pub label_name: String,
    /// Lower bound of the randomized polling delay in milliseconds
    pub delay_min_ms: u64,
    /// Upper bound of the randomized polling delay in milliseconds
    pub delay_max_ms: u64,
    /// Per-request HTTP timeout in milliseconds
    pub http_timeout_ms: u64,
    /// Local port the authorization callback server listens on
    pub oauth_port: u16,
    /// Redirect URI registered with the OAuth client
    pub redirect_uri: String,
}

impl BotConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a required variable is missing, a numeric
    /// variable is malformed, or the delay bounds are inverted.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_AUTOREPLY_CLIENT_ID=123.apps.googleusercontent.com
    /// MAIL_AUTOREPLY_CLIENT_SECRET=xxxx
    /// MAIL_AUTOREPLY_REFRESH_TOKEN=1//xxxx
    /// MAIL_AUTOREPLY_SEARCH_QUERY=is:unread -from:me
    /// MAIL_AUTOREPLY_DELAY_MIN_MS=45000
    /// MAIL_AUTOREPLY_DELAY_MAX_MS=120000
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        let oauth_port = parse_u16_env("MAIL_AUTOREPLY_OAUTH_PORT", 4000)?;
        let redirect_uri = string_env(
            "MAIL_AUTOREPLY_REDIRECT_URI",
            &format!("http://localhost:{oauth_port}/oauth2callback"),
        );

        let (delay_min_ms, delay_max_ms) = delay_bounds(
            parse_u64_env("MAIL_AUTOREPLY_DELAY_MIN_MS", 45_000)?,
            parse_u64_env("MAIL_AUTOREPLY_DELAY_MAX_MS", 120_000)?,
        )?;

        Ok(Self {
            client_id: required_env("MAIL_AUTOREPLY_CLIENT_ID")?,
            client_secret: SecretString::new(
                required_env("MAIL_AUTOREPLY_CLIENT_SECRET")?.into(),
            ),
            refresh_token: optional_env("MAIL_AUTOREPLY_REFRESH_TOKEN")
                .map(|v| SecretString::new(v.into())),
            search_query: string_env("MAIL_AUTOREPLY_SEARCH_QUERY", DEFAULT_SEARCH_QUERY),
            reply_body: string_env("MAIL_AUTOREPLY_REPLY_BODY", DEFAULT_REPLY_BODY),
            label_name: string_env("MAIL_AUTOREPLY_LABEL_NAME", DEFAULT_LABEL_NAME),
            delay_min_ms,
            delay_max_ms,
            http_timeout_ms: parse_u64_env("MAIL_AUTOREPLY_HTTP_TIMEOUT_MS", 30_000)?,
            oauth_port,
            redirect_uri,
        })
    }

    /// Get the refresh token required by the running daemon
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if no refresh token is configured; the operator
    /// must run the `authorize` subcommand first.
    pub fn require_refresh_token(&self) -> AppResult<&SecretString> {
        self.refresh_token.as_ref().ok_or_else(|| {
            AppError::AuthFailed(
                "MAIL_AUTOREPLY_REFRESH_TOKEN is not set; run the 'authorize' subcommand first"
                    .to_owned(),
            )
        })
    }
}

/// Validate the polling delay bounds
///
/// Both bounds must be positive and `min` must not exceed `max`.
pub fn delay_bounds(min_ms: u64, max_ms: u64) -> AppResult<(u64, u64)> {
    if min_ms == 0 {
        return Err(AppError::invalid("polling delay lower bound must be positive"));
    }
    if min_ms > max_ms {
        return Err(AppError::invalid(format!(
            "polling delay lower bound {min_ms}ms exceeds upper bound {max_ms}ms"
        )));
    }
    Ok((min_ms, max_ms))
}

/// Read a required environment variable, returning error if missing or empty
fn required_env(key: &str) -> AppResult<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!(
            "missing required environment variable {key}"
        ))),
    }
}

/// Read an optional environment variable, treating empty values as unset
fn optional_env(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Read a string environment variable with default fallback
fn string_env(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_owned())
}

/// Parse a `u16` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u16`.
fn parse_u16_env(key: &str, default: u16) -> AppResult<u16> {
    match env::var(key) {
        Ok(v) => v.parse::<u16>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u16 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// Returns `default` if unset.
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env(key: &str, default: u64) -> AppResult<u64> {
    match env::var(key) {
        Ok(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        Err(VarError::NotPresent) => Ok(default),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

//! OAuth 2.0 token handling and the interactive authorization flow
//!
//! The daemon authenticates every provider call with a short-lived access
//! token minted from a long-lived refresh token. [`TokenManager`] caches the
//! current access token and refreshes it behind a 60-second expiry margin.
//!
//! The one-time `authorize` flow lives here too: it prints the provider's
//! consent URL, serves the redirect callback with `axum`, exchanges the
//! returned code, and hands the operator the refresh token to put in the
//! environment. The running daemon never opens this flow on its own.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BotConfig;
use crate::errors::{AppError, AppResult};

/// Provider's OAuth 2.0 consent endpoint
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Provider's OAuth 2.0 token endpoint
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Scope granting read/modify/send access to the mailbox
const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// A short-lived access token with its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// Bearer token value
    pub token: String,
    /// When the provider will stop accepting the token
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Build a token issued now with the given lifetime in seconds
    pub fn issued_now(token: String, expires_in: i64) -> Self {
        Self {
            token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        }
    }

    /// Check whether the token has expired, with a 60-second margin
    ///
    /// The margin keeps a token from expiring between the check and the
    /// request that uses it.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at - chrono::Duration::seconds(60)
    }
}

/// Mask a token for safe log output: first 4 characters, then `***`
///
/// Tokens of 4 characters or fewer are fully masked.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 4 {
        "***".to_owned()
    } else {
        format!("{}***", &token[..4])
    }
}

/// Decoded fields of a token endpoint response
#[derive(Debug)]
struct TokenGrant {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Mutable credential state guarded by the manager's lock
struct TokenState {
    access: Option<AccessToken>,
    refresh_token: SecretString,
}

/// Access token cache keyed to a single refresh credential
///
/// Owned by the provider client and shared by reference; there is no
/// process-wide credential singleton. The provider may rotate the refresh
/// token on refresh, in which case the rotated value is kept for the
/// process lifetime.
pub struct TokenManager {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: SecretString,
    state: Mutex<TokenState>,
}

impl TokenManager {
    /// Build a manager from the daemon configuration
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if no refresh token is configured and `Internal`
    /// if the HTTP client cannot be constructed.
    pub fn from_config(config: &BotConfig) -> AppResult<Self> {
        let refresh_token = config.require_refresh_token()?.clone();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            token_endpoint: TOKEN_ENDPOINT.to_owned(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            state: Mutex::new(TokenState {
                access: None,
                refresh_token,
            }),
        })
    }

    /// Point the manager at a different token endpoint (tests)
    #[cfg(test)]
    pub fn set_token_endpoint(&mut self, endpoint: &str) {
        self.token_endpoint = endpoint.to_owned();
    }

    /// Get a valid access token, refreshing if necessary
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if the provider rejects the refresh credential,
    /// `Timeout`/`Provider`/`Internal` for transport and response failures.
    pub async fn access_token(&self) -> AppResult<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.access.as_ref() {
            if !token.is_expired() {
                return Ok(token.token.clone());
            }
            debug!("access token expired, refreshing");
        }

        let resp = self
            .http
            .post(&self.token_endpoint)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret()),
                ("refresh_token", state.refresh_token.expose_secret()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AppError::from_transport("token refresh", e))?;
        let grant = parse_token_response(resp, "token refresh").await?;

        if let Some(rotated) = grant.refresh_token {
            state.refresh_token = SecretString::new(rotated.into());
        }
        let access = AccessToken::issued_now(grant.access_token, grant.expires_in);
        debug!(token = %mask_token(&access.token), "access token refreshed");
        let value = access.token.clone();
        state.access = Some(access);
        Ok(value)
    }
}

/// Decode a token endpoint response, mapping failures by status class
///
/// Client errors (`invalid_grant` and friends) are authorization failures;
/// server errors are provider failures.
async fn parse_token_response(resp: reqwest::Response, context: &str) -> AppResult<TokenGrant> {
    let status = resp.status();
    let body: serde_json::Value = resp
        .json()
        .await
        .map_err(|e| AppError::from_transport(context, e))?;

    if !status.is_success() {
        let detail = body
            .get("error_description")
            .and_then(|v| v.as_str())
            .or_else(|| body.get("error").and_then(|v| v.as_str()))
            .unwrap_or("unknown error");
        return Err(if status.is_client_error() {
            AppError::AuthFailed(format!("{context} rejected ({status}): {detail}"))
        } else {
            AppError::Provider(format!("{context} failed ({status}): {detail}"))
        });
    }

    let access_token = body
        .get("access_token")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::Internal(format!("{context} response missing access_token")))?
        .to_owned();
    let expires_in = body.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
    let refresh_token = body
        .get("refresh_token")
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    Ok(TokenGrant {
        access_token,
        refresh_token,
        expires_in,
    })
}

/// Build the consent URL the operator opens in a browser
///
/// Requests offline access so the grant includes a refresh token, and forces
/// the consent screen so re-authorization also re-issues one.
pub fn consent_url(config: &BotConfig, state: &str) -> String {
    format!(
        "{AUTH_ENDPOINT}?response_type=code&client_id={}&redirect_uri={}&scope={}&access_type=offline&prompt=consent&state={}",
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(GMAIL_MODIFY_SCOPE),
        urlencoding::encode(state),
    )
}

/// Shared state of the one-shot callback server
pub struct CallbackState {
    /// `state` parameter the redirect must echo back
    expected_state: String,
    /// Channel delivering the authorization code; taken on first success
    code_tx: StdMutex<Option<oneshot::Sender<String>>>,
}

/// Query parameters of the provider redirect
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Handler for `GET /oauth2callback`
async fn oauth_callback(
    State(ctx): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, &'static str) {
    if let Some(err) = query.error {
        warn!(error = %err, "authorization denied at the consent screen");
        return (StatusCode::BAD_REQUEST, "Authorization was denied.");
    }
    if query.state.as_deref() != Some(ctx.expected_state.as_str()) {
        warn!("authorization callback carried an unexpected state parameter");
        return (StatusCode::BAD_REQUEST, "Authorization state mismatch.");
    }
    let Some(code) = query.code else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code.");
    };

    let tx = ctx.code_tx.lock().ok().and_then(|mut guard| guard.take());
    let delivered = match tx {
        Some(tx) => tx.send(code).is_ok(),
        None => false,
    };
    if delivered {
        (
            StatusCode::OK,
            "Authentication successful! You can close this page now.",
        )
    } else {
        (StatusCode::OK, "Authorization already completed.")
    }
}

/// Build the callback router for the given shared state
pub fn callback_router(ctx: Arc<CallbackState>) -> Router {
    Router::new()
        .route("/oauth2callback", get(oauth_callback))
        .with_state(ctx)
}

/// Run the interactive authorization flow to completion
///
/// Prints the consent URL, waits for the redirect on the configured port,
/// exchanges the code, and prints the refresh token for the operator to set
/// in the environment. One-shot: the callback server is torn down after the
/// first code arrives.
///
/// # Errors
///
/// Returns `Internal` if the callback port cannot be bound or the server
/// dies before a code arrives, and `AuthFailed` if the exchange is rejected
/// or yields no refresh token.
pub async fn run_authorization(config: &BotConfig) -> AppResult<()> {
    let state = Uuid::new_v4().to_string();
    let (tx, rx) = oneshot::channel();
    let ctx = Arc::new(CallbackState {
        expected_state: state.clone(),
        code_tx: StdMutex::new(Some(tx)),
    });

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.oauth_port))
        .await
        .map_err(|e| {
            AppError::Internal(format!(
                "cannot bind authorization callback port {}: {e}",
                config.oauth_port
            ))
        })?;
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, callback_router(ctx)).await {
            error!(error = %err, "authorization callback server failed");
        }
    });

    println!("Open this URL in a browser to authorize mailbox access:");
    println!("{}", consent_url(config, &state));

    let code = rx.await.map_err(|_| {
        AppError::Internal("authorization callback closed before a code arrived".to_owned())
    })?;
    server.abort();
    info!("authorization code received");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()
        .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
    let grant = exchange_code(&http, TOKEN_ENDPOINT, config, &code).await?;

    println!("Authorization successful.");
    println!("Access token: {}", mask_token(&grant.access_token));
    match grant.refresh_token {
        Some(refresh) => {
            println!("Set MAIL_AUTOREPLY_REFRESH_TOKEN={refresh} and start the daemon.");
            Ok(())
        }
        None => Err(AppError::AuthFailed(
            "provider returned no refresh token; revoke the app's access and authorize again"
                .to_owned(),
        )),
    }
}

/// Exchange an authorization code for tokens
async fn exchange_code(
    http: &reqwest::Client,
    endpoint: &str,
    config: &BotConfig,
    code: &str,
) -> AppResult<TokenGrant> {
    let resp = http
        .post(endpoint)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", config.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| AppError::from_transport("authorization code exchange", e))?;
    parse_token_response(resp, "authorization code exchange").await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use tokio::sync::oneshot;
    use tower::ServiceExt;

    use super::{AccessToken, CallbackState, callback_router, consent_url, mask_token};
    use crate::config::BotConfig;
    use secrecy::SecretString;

    fn test_config() -> BotConfig {
        BotConfig {
            client_id: "client-123.apps.example".to_owned(),
            client_secret: SecretString::new("secret".into()),
            refresh_token: None,
            search_query: "is:unread -from:me".to_owned(),
            reply_body: "Auto-reply: Thanks for your email!".to_owned(),
            label_name: "Auto-Replied".to_owned(),
            delay_min_ms: 45_000,
            delay_max_ms: 120_000,
            http_timeout_ms: 30_000,
            oauth_port: 4000,
            redirect_uri: "http://localhost:4000/oauth2callback".to_owned(),
        }
    }

    fn callback_ctx(expected_state: &str) -> (Arc<CallbackState>, oneshot::Receiver<String>) {
        let (tx, rx) = oneshot::channel();
        let ctx = Arc::new(CallbackState {
            expected_state: expected_state.to_owned(),
            code_tx: StdMutex::new(Some(tx)),
        });
        (ctx, rx)
    }

    #[test]
    fn access_token_expiry_honors_margin() {
        let fresh = AccessToken {
            token: "ok".to_owned(),
            expires_at: Utc::now() + chrono::Duration::seconds(120),
        };
        assert!(!fresh.is_expired());

        // Within the 60-second margin counts as expired.
        let almost = AccessToken {
            token: "almost".to_owned(),
            expires_at: Utc::now() + chrono::Duration::seconds(30),
        };
        assert!(almost.is_expired());

        let past = AccessToken {
            token: "old".to_owned(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
        };
        assert!(past.is_expired());
    }

    #[test]
    fn mask_token_hides_all_but_prefix() {
        assert_eq!(mask_token("ya29.abcdef"), "ya29***");
        assert_eq!(mask_token("abcd"), "***");
        assert_eq!(mask_token(""), "***");
    }

    #[test]
    fn consent_url_encodes_all_parameters() {
        let url = consent_url(&test_config(), "state-42");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-123.apps.example"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4000%2Foauth2callback"));
        assert!(url.contains("scope=https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fgmail.modify"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("state=state-42"));
    }

    #[tokio::test]
    async fn callback_delivers_code_for_matching_state() {
        let (ctx, rx) = callback_ctx("expected");
        let router = callback_router(ctx);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/oauth2callback?code=auth-code-1&state=expected")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.await.expect("code delivered"), "auth-code-1");
    }

    #[tokio::test]
    async fn callback_rejects_state_mismatch() {
        let (ctx, mut rx) = callback_ctx("expected");
        let router = callback_router(ctx);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/oauth2callback?code=auth-code-1&state=forged")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn callback_rejects_missing_code() {
        let (ctx, mut rx) = callback_ctx("expected");
        let router = callback_router(ctx);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/oauth2callback?state=expected")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("router responds");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }
}

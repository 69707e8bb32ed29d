//! Gmail provider client
//!
//! Defines the [`MailProvider`] trait the reply loop is written against and
//! implements it over the Gmail v1 REST API with `reqwest`. Every call
//! obtains a bearer token from the [`TokenManager`], issues a single
//! request, and maps non-success responses into [`AppError`]. The provider
//! owns all authentication state; callers never see tokens.

use std::time::Duration;

use tracing::debug;

use crate::config::BotConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{
    CreateLabelRequest, Label, LabelList, MessageList, MessageRef, ModifyMessageRequest, SendAck,
    SendMessageRequest, Thread,
};
use crate::oauth::TokenManager;

/// Gmail API base URL for the authorized user's mailbox
const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

/// Mailbox operations the reply loop depends on
///
/// The daemon is written against this trait so tests can substitute a fake
/// provider; [`GmailClient`] is the production implementation.
pub trait MailProvider {
    /// List messages matching a provider search query
    fn list_messages(
        &self,
        query: &str,
    ) -> impl Future<Output = AppResult<Vec<MessageRef>>> + Send;

    /// Fetch a thread's message history with labels and headers
    fn get_thread(&self, thread_id: &str) -> impl Future<Output = AppResult<Thread>> + Send;

    /// Send an encoded reply into an existing thread
    fn send_reply(
        &self,
        thread_id: &str,
        raw: &str,
    ) -> impl Future<Output = AppResult<SendAck>> + Send;

    /// List all labels in the account
    fn list_labels(&self) -> impl Future<Output = AppResult<Vec<Label>>> + Send;

    /// Create a new user label
    fn create_label(&self, name: &str) -> impl Future<Output = AppResult<Label>> + Send;

    /// Add labels to a message
    fn add_labels(
        &self,
        message_id: &str,
        label_ids: &[String],
    ) -> impl Future<Output = AppResult<()>> + Send;
}

/// Gmail REST client
///
/// Holds the HTTP client, the token manager, and the API base URL. The base
/// URL is overridable so tests can point the client at a local server.
pub struct GmailClient {
    http: reqwest::Client,
    tokens: TokenManager,
    base_url: String,
}

impl GmailClient {
    /// Build a client from the daemon configuration
    ///
    /// # Errors
    ///
    /// Returns `AuthFailed` if no refresh token is configured and `Internal`
    /// if the HTTP client cannot be constructed.
    pub fn from_config(config: &BotConfig) -> AppResult<Self> {
        let tokens = TokenManager::from_config(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            tokens,
            base_url: GMAIL_API_BASE.to_owned(),
        })
    }

    /// Override the API base URL (tests)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Check a response status, draining the body into the error on failure
    ///
    /// 401/403 map to `AuthFailed`; any other non-success status maps to
    /// `Provider`.
    async fn checked(context: &str, resp: reqwest::Response) -> AppResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            Err(AppError::AuthFailed(format!(
                "{context} rejected ({status}): {body}"
            )))
        } else {
            Err(AppError::Provider(format!(
                "{context} failed ({status}): {body}"
            )))
        }
    }
}

/// Validate a provider-assigned resource identifier before it enters a URL
///
/// Identifiers are opaque but never contain path separators; rejecting them
/// here keeps a malformed id from turning into a different API route.
fn validate_resource_id(kind: &str, id: &str) -> AppResult<()> {
    if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
        return Err(AppError::invalid(format!("invalid {kind} id: {id:?}")));
    }
    Ok(())
}

impl MailProvider for GmailClient {
    async fn list_messages(&self, query: &str) -> AppResult<Vec<MessageRef>> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| AppError::from_transport("list messages", e))?;
        let list: MessageList = Self::checked("list messages", resp)
            .await?
            .json()
            .await
            .map_err(|e| AppError::from_transport("list messages", e))?;
        let refs = list.into_refs();
        debug!(count = refs.len(), "listed candidate messages");
        Ok(refs)
    }

    async fn get_thread(&self, thread_id: &str) -> AppResult<Thread> {
        validate_resource_id("thread", thread_id)?;
        let token = self.tokens.access_token().await?;
        let url = format!("{}/threads/{}", self.base_url, thread_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .query(&[("format", "metadata")])
            .send()
            .await
            .map_err(|e| AppError::from_transport("get thread", e))?;
        Self::checked("get thread", resp)
            .await?
            .json()
            .await
            .map_err(|e| AppError::from_transport("get thread", e))
    }

    async fn send_reply(&self, thread_id: &str, raw: &str) -> AppResult<SendAck> {
        validate_resource_id("thread", thread_id)?;
        let token = self.tokens.access_token().await?;
        let url = format!("{}/messages/send", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&SendMessageRequest {
                raw: raw.to_owned(),
                thread_id: thread_id.to_owned(),
            })
            .send()
            .await
            .map_err(|e| AppError::from_transport("send reply", e))?;
        let ack: SendAck = Self::checked("send reply", resp)
            .await?
            .json()
            .await
            .map_err(|e| AppError::from_transport("send reply", e))?;
        debug!(message_id = %ack.id, thread_id, "reply sent");
        Ok(ack)
    }

    async fn list_labels(&self) -> AppResult<Vec<Label>> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/labels", self.base_url);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AppError::from_transport("list labels", e))?;
        let list: LabelList = Self::checked("list labels", resp)
            .await?
            .json()
            .await
            .map_err(|e| AppError::from_transport("list labels", e))?;
        Ok(list.labels)
    }

    async fn create_label(&self, name: &str) -> AppResult<Label> {
        let token = self.tokens.access_token().await?;
        let url = format!("{}/labels", self.base_url);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&CreateLabelRequest::visible(name))
            .send()
            .await
            .map_err(|e| AppError::from_transport("create label", e))?;
        let label: Label = Self::checked("create label", resp)
            .await?
            .json()
            .await
            .map_err(|e| AppError::from_transport("create label", e))?;
        debug!(label_id = %label.id, name, "label created");
        Ok(label)
    }

    async fn add_labels(&self, message_id: &str, label_ids: &[String]) -> AppResult<()> {
        validate_resource_id("message", message_id)?;
        let token = self.tokens.access_token().await?;
        let url = format!("{}/messages/{}/modify", self.base_url, message_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&ModifyMessageRequest {
                add_label_ids: label_ids.to_vec(),
            })
            .send()
            .await
            .map_err(|e| AppError::from_transport("modify message labels", e))?;
        Self::checked("modify message labels", resp).await?;
        Ok(())
    }
}

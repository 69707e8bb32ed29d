//! Gmail REST wire types
//!
//! Serde representations of the subset of the Gmail v1 API this daemon
//! touches. Field names follow the provider's camelCase JSON; list responses
//! omit their array field entirely when empty, so those fields default.

use serde::{Deserialize, Serialize};

/// Reference to a message, as returned by `messages.list`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    /// Provider-assigned message identifier
    pub id: String,
    /// Identifier of the thread the message belongs to
    pub thread_id: String,
}

/// Response shape of `messages.list`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    /// Matching messages; absent when the query matches nothing
    #[serde(default)]
    pub messages: Option<Vec<MessageRef>>,
    /// Provider's estimate of the total result size
    #[serde(default)]
    #[allow(dead_code)]
    pub result_size_estimate: Option<u32>,
}

impl MessageList {
    /// Matching message references, empty when the field was absent
    pub fn into_refs(self) -> Vec<MessageRef> {
        self.messages.unwrap_or_default()
    }
}

/// A single RFC 822 header of a message payload
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Payload section of a thread message
///
/// Only the headers are requested (`format=metadata`); bodies never cross
/// the wire.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub headers: Vec<Header>,
}

/// A message within a fetched thread
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    /// Provider-assigned message identifier
    #[serde(default)]
    pub id: String,
    /// Label ids attached to the message (`SENT`, `UNREAD`, user labels, ...)
    #[serde(default)]
    pub label_ids: Vec<String>,
    /// Header payload, when the fetch format includes it
    #[serde(default)]
    pub payload: Option<Payload>,
}

impl ThreadMessage {
    /// Look up a header value by name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| {
            p.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        })
    }
}

/// Response shape of `threads.get`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Thread {
    /// Messages of the thread in provider order; absent for empty threads
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
}

/// A mailbox label
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Label {
    /// Provider-assigned label identifier
    pub id: String,
    /// Human-visible label name
    pub name: String,
}

/// Response shape of `labels.list`
#[derive(Debug, Default, Deserialize)]
pub struct LabelList {
    #[serde(default)]
    pub labels: Vec<Label>,
}

/// Request body for `labels.create`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLabelRequest {
    pub name: String,
    /// Whether the label shows in the label list (`labelShow`)
    pub label_list_visibility: String,
    /// Whether the label shows in the message list (`show`)
    pub message_list_visibility: String,
}

impl CreateLabelRequest {
    /// Build a request for a label visible in both the label and message lists
    pub fn visible(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            label_list_visibility: "labelShow".to_owned(),
            message_list_visibility: "show".to_owned(),
        }
    }
}

/// Request body for `messages.send`
///
/// `raw` carries the URL-safe base64 encoding of the message bytes;
/// `thread_id` makes the provider file the reply into the existing thread.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub raw: String,
    pub thread_id: String,
}

/// Acknowledgement of `messages.send`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    /// Identifier of the newly created message
    pub id: String,
    /// Thread the message was filed into
    #[serde(default)]
    #[allow(dead_code)]
    pub thread_id: Option<String>,
}

/// Request body for `messages.modify`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyMessageRequest {
    pub add_label_ids: Vec<String>,
}

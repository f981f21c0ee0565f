//! Request and response bodies of the WAHA REST API.
//!
//! Responses carry far more fields than we use; unknown fields are ignored.

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreateSessionRequest<'a> {
    pub name: &'a str,
    pub start: bool,
    pub config: SessionConfig<'a>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SessionConfig<'a> {
    pub webhooks: Vec<WebhookConfig<'a>>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct WebhookConfig<'a> {
    pub url: &'a str,
    pub events: &'a [&'a str],
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendTextRequest<'a> {
    pub session: &'a str,
    pub chat_id: &'a str,
    pub text: &'a str,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Session name and raw status (`STOPPED`, `STARTING`, `SCAN_QR_CODE`,
/// `WORKING`, `FAILED`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub status: String,
}

/// QR code image used to pair a phone with the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrCode {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub from_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(deserialize_with = "message_id")]
    pub id: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub ack: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    #[serde(deserialize_with = "message_id")]
    pub id: String,
}

/// Message ids arrive either as a plain string or, from some engines, as an
/// object carrying the string under `_serialized`.
fn message_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Plain(String),
        Structured {
            #[serde(rename = "_serialized")]
            serialized: String,
        },
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Plain(id) => id,
        RawId::Structured { serialized } => serialized,
    })
}

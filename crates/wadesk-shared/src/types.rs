use serde::{Deserialize, Serialize};

/// Role a user holds inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// Owners and admins may invite people and change organization settings.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a message was sent by the organization or received from a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outgoing => "outgoing",
            Self::Incoming => "incoming",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "outgoing" => Some(Self::Outgoing),
            "incoming" => Some(Self::Incoming),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Audio,
    Video,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    /// Map a gateway message type onto ours. WAHA calls plain text `chat`
    /// and voice notes `ptt`; anything unrecognized is stored as text.
    pub fn from_gateway(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("image") | Some("sticker") => Self::Image,
            Some("ptt") | Some("audio") | Some("voice") => Self::Audio,
            Some("video") => Self::Video,
            Some("document") => Self::Document,
            _ => Self::Text,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

/// Normalized connectivity state of a gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Starting,
    QrPending,
    Connected,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Starting => "starting",
            Self::QrPending => "qr_pending",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(Self::Disconnected),
            "starting" => Some(Self::Starting),
            "qr_pending" => Some(Self::QrPending),
            "connected" => Some(Self::Connected),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Normalize a raw WAHA status (`STOPPED`, `STARTING`, `SCAN_QR_CODE`,
    /// `WORKING`, `FAILED`). Unknown values count as disconnected.
    pub fn from_gateway(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "WORKING" => Self::Connected,
            "SCAN_QR_CODE" => Self::QrPending,
            "STARTING" => Self::Starting,
            "FAILED" => Self::Failed,
            _ => Self::Disconnected,
        }
    }
}

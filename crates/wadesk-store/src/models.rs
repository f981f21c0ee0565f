//! Domain model structs persisted in the tenant database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! layer. Secrets (the gateway API key) are never serialized.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wadesk_shared::{Direction, MessageType, Role, SessionState};

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

/// A tenant. Every other row belongs to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    /// Globally unique, URL-safe, immutable once assigned.
    pub slug: String,
    pub gateway_base_url: Option<String>,
    #[serde(skip_serializing, default)]
    pub gateway_api_key: Option<String>,
    /// Gateway session name; also the webhook join key.
    pub gateway_session_name: String,
    pub subscription_status: String,
    pub created_at: DateTime<Utc>,
}

impl Organization {
    /// The gateway integration is usable once a base URL is set.
    pub fn gateway_configured(&self) -> bool {
        self.gateway_base_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }
}

/// Input for provisioning a new organization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<String>,
    /// Defaults to `"default"`.
    pub gateway_session_name: Option<String>,
}

/// Gateway credentials as set by an owner or admin. `session_name: None`
/// and `api_key: None` keep the stored values; an empty `api_key` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub session_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Membership / Invitation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Subject assigned by the identity provider.
    pub user_id: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invitation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    pub status: InvitationStatus,
    pub invited_by: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invitation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Contact / Message
// ---------------------------------------------------------------------------

/// A counterpart known to an organization through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Gateway contact id, e.g. `491701234567@c.us`.
    pub external_id: String,
    pub display_name: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Uuid,
    /// Gateway message id; the de-duplication key.
    pub external_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub direction: Direction,
    /// Event time reported by the gateway.
    pub timestamp: DateTime<Utc>,
    pub ack: Option<i64>,
    pub ingested_at: DateTime<Utc>,
}

/// Result of applying one message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new message row was written and analytics advanced.
    Inserted { message_id: Uuid, contact_created: bool },
    /// The external id was already stored; nothing changed.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Analytics
// ---------------------------------------------------------------------------

/// Running counters for one (organization, UTC day).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyAnalytics {
    pub organization_id: Uuid,
    pub day: NaiveDate,
    pub total: i64,
    pub sent: i64,
    pub received: i64,
    pub unique_contacts: i64,
    pub responses: i64,
    pub response_time_total_secs: i64,
    pub updated_at: DateTime<Utc>,
}

impl DailyAnalytics {
    pub fn average_response_secs(&self) -> Option<f64> {
        (self.responses > 0).then(|| self.response_time_total_secs as f64 / self.responses as f64)
    }
}

/// What a reconciliation pass found and wrote for one day.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileReport {
    pub day: NaiveDate,
    pub drifted: bool,
    pub before: Option<DailyAnalytics>,
    pub after: DailyAnalytics,
}

// ---------------------------------------------------------------------------
// Gateway session / dead letters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewaySession {
    pub organization_id: Uuid,
    pub session_name: String,
    /// Raw status string as reported by the gateway.
    pub status: String,
    pub state: SessionState,
    pub updated_at: DateTime<Utc>,
}

/// A webhook event that could not be persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: Uuid,
    pub session: String,
    pub event: String,
    pub payload: String,
    pub error: String,
    pub replayed: bool,
    pub created_at: DateTime<Utc>,
}

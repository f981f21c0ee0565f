use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use wadesk_gateway::GatewayError;
use wadesk_shared::{EventError, IdentityError, InviteError};
use wadesk_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Authentication required")]
    Unauthenticated,

    #[error("No active organization membership")]
    NoMembership { pending_invitation: bool },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("WhatsApp integration is not set up for this organization")]
    GatewayNotConfigured,

    #[error("WhatsApp gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("WhatsApp gateway rejected the request ({status})")]
    GatewayRejected { status: u16, body: String },

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Webhook storage failure under the `reject` policy.
    #[error("Event could not be stored, retry later")]
    StorageUnavailable,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Unauthenticated => "unauthenticated",
            ServerError::NoMembership {
                pending_invitation: true,
            } => "pending_invitation",
            ServerError::NoMembership { .. } => "no_membership",
            ServerError::Forbidden(_) => "forbidden",
            ServerError::GatewayNotConfigured => "gateway_not_configured",
            ServerError::GatewayUnavailable(_) => "gateway_unavailable",
            ServerError::GatewayRejected { .. } => "gateway_rejected",
            ServerError::MalformedEvent(_) => "malformed_event",
            ServerError::StorageUnavailable => "storage_unavailable",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::NotFound(_) => "not_found",
            ServerError::Conflict(_) => "conflict",
            ServerError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::NoMembership { .. } | ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::GatewayNotConfigured | ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::GatewayUnavailable(_) | ServerError::StorageUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::GatewayRejected { .. } => StatusCode::BAD_GATEWAY,
            ServerError::MalformedEvent(_) | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = match &self {
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "Internal server error".to_string()
            }
            ServerError::GatewayRejected { status, body } => {
                tracing::warn!(status, body = %body, "gateway rejected request");
                self.to_string()
            }
            _ => self.to_string(),
        };

        let body = serde_json::json!({
            "error": message,
            "code": self.code(),
        });

        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::Conflict(what) => ServerError::Conflict(what),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<GatewayError> for ServerError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(detail) => ServerError::GatewayUnavailable(detail),
            GatewayError::Rejected { status, body } => ServerError::GatewayRejected { status, body },
            GatewayError::Decode(detail) => {
                ServerError::GatewayUnavailable(format!("unexpected response: {detail}"))
            }
            GatewayError::InvalidConfig(detail) => {
                tracing::warn!(error = %detail, "stored gateway settings are unusable");
                ServerError::GatewayNotConfigured
            }
        }
    }
}

impl From<IdentityError> for ServerError {
    fn from(err: IdentityError) -> Self {
        tracing::debug!(error = %err, "identity token rejected");
        ServerError::Unauthenticated
    }
}

impl From<EventError> for ServerError {
    fn from(err: EventError) -> Self {
        ServerError::MalformedEvent(err.to_string())
    }
}

impl From<InviteError> for ServerError {
    fn from(err: InviteError) -> Self {
        ServerError::BadRequest(err.to_string())
    }
}

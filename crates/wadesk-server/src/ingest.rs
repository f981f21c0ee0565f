//! Webhook ingestion pipeline.
//!
//! `Received -> Validated -> Classified -> Applied -> Acknowledged`, or
//! `Received -> Rejected` for malformed bodies. Storage failures follow the
//! configured [`FailurePolicy`].

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use wadesk_shared::protocol::{EventKind, WebhookEvent};
use wadesk_store::{GatewaySession, IngestOutcome};

use crate::api::AppState;
use crate::auth::verify_webhook_secret;
use crate::config::FailurePolicy;
use crate::db::SharedDatabase;
use crate::error::ServerError;

/// Dead letters handled per replay call.
const REPLAY_BATCH: u32 = 500;

/// What applying one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Message(IngestOutcome),
    Ack { updated: bool },
    SessionStatus(GatewaySession),
    /// No organization owns the session; nothing written.
    Orphaned,
    /// Unknown event kind; nothing written.
    Ignored,
}

/// Apply a validated event to tenant storage.
///
/// `received_at` is when the gateway delivered the event; session status
/// reports are ordered by it.
pub async fn apply_event(
    db: &SharedDatabase,
    event: WebhookEvent,
    received_at: DateTime<Utc>,
) -> Result<Applied, ServerError> {
    if let EventKind::Unknown(name) = &event.kind {
        debug!(event = %name, session = %event.session, "ignoring unhandled event kind");
        return Ok(Applied::Ignored);
    }

    let session = event.session.clone();
    let applied = db
        .call(move |db| {
            let Some(org) = db.find_organization_by_session(&event.session)? else {
                return Ok((None, Applied::Orphaned));
            };
            let applied = match &event.kind {
                EventKind::Message(chat) => Applied::Message(db.ingest_message(org.id, chat)?),
                EventKind::MessageAck(ack) => Applied::Ack {
                    updated: db.set_message_ack(org.id, &ack.id, ack.ack)?,
                },
                EventKind::SessionStatus(status) => Applied::SessionStatus(db.upsert_gateway_session(
                    org.id,
                    &event.session,
                    &status.status,
                    received_at,
                )?),
                EventKind::Unknown(_) => Applied::Ignored,
            };
            Ok((Some(org.id), applied))
        })
        .await?;

    match &applied {
        (None, _) => warn!(session = %session, "event for unknown session dropped"),
        (Some(org), Applied::Message(IngestOutcome::Duplicate)) => {
            debug!(org = %org, session = %session, "duplicate message ignored")
        }
        (Some(org), Applied::Message(IngestOutcome::Inserted { message_id, .. })) => {
            debug!(org = %org, session = %session, message = %message_id, "message stored")
        }
        (Some(org), Applied::Ack { updated }) => {
            debug!(org = %org, session = %session, updated, "message ack applied")
        }
        (Some(org), Applied::SessionStatus(s)) => {
            info!(org = %org, session = %session, status = %s.status, "session status updated")
        }
        _ => {}
    }

    Ok(applied.1)
}

#[derive(Debug, Serialize)]
pub struct Ack {
    success: bool,
}

/// `POST /webhooks/waha`
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Ack>, ServerError> {
    let received_at = Utc::now();
    verify_webhook_secret(&headers, &state.config)?;

    let event = WebhookEvent::from_slice(&body).map_err(|e| {
        debug!(error = %e, "malformed webhook rejected");
        ServerError::from(e)
    })?;

    let session = event.session.clone();
    let kind = event.kind.name().to_string();
    let external_id = external_id(&event);

    if let Err(e) = apply_event(&state.db, event, received_at).await {
        error!(
            error = %e,
            session = %session,
            event = %kind,
            external_id = external_id.as_deref().unwrap_or("-"),
            "failed to persist webhook event"
        );

        match state.config.failure_policy {
            FailurePolicy::Acknowledge => {}
            FailurePolicy::DeadLetter => {
                let payload = String::from_utf8_lossy(&body).into_owned();
                let reason = e.to_string();
                let stored = state
                    .db
                    .call(move |db| db.insert_dead_letter(&session, &kind, &payload, &reason))
                    .await;
                if let Err(e) = stored {
                    error!(error = %e, "failed to write dead letter, event lost");
                }
            }
            FailurePolicy::Reject => return Err(ServerError::StorageUnavailable),
        }
    }

    Ok(Json(Ack { success: true }))
}

fn external_id(event: &WebhookEvent) -> Option<String> {
    match &event.kind {
        EventKind::Message(chat) => Some(chat.external_id.clone()),
        EventKind::MessageAck(ack) => Some(ack.id.clone()),
        _ => None,
    }
}

#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub failed: usize,
    pub invalid: usize,
}

/// Re-run pending dead letters through the pipeline, each at the time it
/// was first received. Successes and payloads that can never parse are
/// marked replayed; failures stay queued.
pub async fn replay_dead_letters(db: &SharedDatabase) -> Result<ReplayReport, ServerError> {
    let letters = db.call(|db| db.pending_dead_letters(REPLAY_BATCH)).await?;
    let mut report = ReplayReport::default();

    for letter in letters {
        let id = letter.id;
        match WebhookEvent::from_slice(letter.payload.as_bytes()) {
            Ok(event) => match apply_event(db, event, letter.created_at).await {
                Ok(_) => report.replayed += 1,
                Err(e) => {
                    warn!(dead_letter = %id, error = %e, "dead letter replay failed");
                    report.failed += 1;
                    continue;
                }
            },
            Err(e) => {
                warn!(dead_letter = %id, error = %e, "dead letter payload is malformed");
                report.invalid += 1;
            }
        }
        db.call(move |db| db.mark_dead_letter_replayed(id)).await?;
    }

    info!(
        replayed = report.replayed,
        failed = report.failed,
        invalid = report.invalid,
        "dead letter replay finished"
    );
    Ok(report)
}

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use wadesk_gateway::{ChatMessage, ChatSummary, GatewayError, SentMessage};
use wadesk_shared::constants::{DEFAULT_CHAT_PAGE_SIZE, MAX_CHAT_PAGE_SIZE};
use wadesk_shared::invite::hash_presented_token;
use wadesk_shared::Role;
use wadesk_store::{
    parse_day, AcceptOutcome, DailyAnalytics, GatewaySession, GatewaySettings, Invitation,
    InvitationCreated, Membership, NewOrganization, Organization, ReconcileReport,
};

use crate::auth::{verify_admin_token, Identity};
use crate::config::ServerConfig;
use crate::db::SharedDatabase;
use crate::directory::{require_role, Resolved, MANAGERS};
use crate::error::ServerError;
use crate::gateway::client_for_organization;
use crate::ingest::{handle_webhook, replay_dead_letters, ReplayReport};

/// Longest range `GET /api/analytics/daily` serves in one call.
const MAX_ANALYTICS_SPAN_DAYS: i64 = 366;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/waha", post(handle_webhook))
        .route("/api/me/organization", get(me_organization))
        .route("/api/organization/gateway", put(update_gateway))
        .route("/api/whatsapp/session", post(create_session).get(get_session))
        .route("/api/whatsapp/qr", get(qr_code))
        .route("/api/whatsapp/chats", get(chats_overview))
        .route("/api/whatsapp/chats/:chat_id/messages", get(chat_messages))
        .route("/api/whatsapp/messages", post(send_message))
        .route("/api/analytics/daily", get(daily_analytics))
        .route("/api/analytics/reconcile", post(reconcile_analytics))
        .route("/api/invitations", get(list_invitations).post(create_invitation))
        .route("/api/invitations/accept", post(accept_invitation))
        .route("/api/invitations/:id", delete(revoke_invitation))
        .route("/api/members", get(list_members))
        .route("/api/members/:user_id", delete(remove_member))
        .route("/admin/organizations", post(admin_create_organization))
        .route("/admin/dead-letters/replay", post(admin_replay_dead_letters))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Organization ───

#[derive(Serialize)]
struct MeResponse {
    #[serde(flatten)]
    resolved: Resolved,
    gateway_configured: bool,
    session: Option<GatewaySession>,
}

async fn me_organization(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<MeResponse>, ServerError> {
    let org_id = resolved.organization.id;
    let session_name = resolved.organization.gateway_session_name.clone();
    let session = state
        .db
        .call(move |db| db.get_gateway_session(org_id, &session_name))
        .await?;

    Ok(Json(MeResponse {
        gateway_configured: resolved.organization.gateway_configured(),
        resolved,
        session,
    }))
}

async fn update_gateway(
    State(state): State<AppState>,
    resolved: Resolved,
    Json(settings): Json<GatewaySettings>,
) -> Result<Json<Organization>, ServerError> {
    require_role(&resolved, MANAGERS)?;

    let org_id = resolved.organization.id;
    let organization = state
        .db
        .call(move |db| db.update_gateway_settings(org_id, &settings))
        .await?;

    info!(
        org = %org_id,
        user = %resolved.identity.user_id,
        session = %organization.gateway_session_name,
        "gateway settings updated"
    );
    Ok(Json(organization))
}

// ─── WhatsApp gateway ───

#[derive(Serialize)]
struct SessionResponse {
    name: String,
    status: String,
    state: wadesk_shared::SessionState,
}

impl From<GatewaySession> for SessionResponse {
    fn from(s: GatewaySession) -> Self {
        Self {
            name: s.session_name,
            status: s.status,
            state: s.state,
        }
    }
}

async fn record_session_status(
    state: &AppState,
    organization_id: Uuid,
    name: String,
    status: String,
) -> Result<GatewaySession, ServerError> {
    state
        .db
        .call(move |db| db.upsert_gateway_session(organization_id, &name, &status, Utc::now()))
        .await
}

async fn create_session(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<SessionResponse>, ServerError> {
    require_role(&resolved, MANAGERS)?;

    let org_id = resolved.organization.id;
    let client = client_for_organization(&state, org_id).await?;
    let webhook_url = state.config.webhook_url();

    let info = match client.start_session(&webhook_url).await {
        Ok(info) => info,
        // The gateway refuses to create a session that already exists.
        Err(GatewayError::Rejected { status: 409 | 422, .. }) => client.session().await?,
        Err(e) => return Err(e.into()),
    };

    info!(org = %org_id, session = %info.name, status = %info.status, "gateway session started");
    let session = record_session_status(&state, org_id, info.name, info.status).await?;
    Ok(Json(session.into()))
}

async fn get_session(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<SessionResponse>, ServerError> {
    let org_id = resolved.organization.id;
    let info = client_for_organization(&state, org_id).await?.session().await?;
    let session = record_session_status(&state, org_id, info.name, info.status).await?;
    Ok(Json(session.into()))
}

async fn qr_code(State(state): State<AppState>, resolved: Resolved) -> Result<Response, ServerError> {
    let qr = client_for_organization(&state, resolved.organization.id)
        .await?
        .qr_code()
        .await?;

    let content_type = HeaderValue::from_str(&qr.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static("image/png"));
    Ok(([(header::CONTENT_TYPE, content_type)], qr.data).into_response())
}

async fn chats_overview(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    let chats = client_for_organization(&state, resolved.organization.id)
        .await?
        .chats_overview()
        .await?;
    Ok(Json(chats))
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

impl PageQuery {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_CHAT_PAGE_SIZE)
            .clamp(1, MAX_CHAT_PAGE_SIZE)
    }
}

async fn chat_messages(
    State(state): State<AppState>,
    resolved: Resolved,
    Path(chat_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<ChatMessage>>, ServerError> {
    let messages = client_for_organization(&state, resolved.organization.id)
        .await?
        .chat_messages(&chat_id, page.limit(), page.offset.unwrap_or(0))
        .await?;
    Ok(Json(messages))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest {
    chat_id: String,
    text: String,
}

async fn send_message(
    State(state): State<AppState>,
    resolved: Resolved,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<SentMessage>, ServerError> {
    if req.chat_id.trim().is_empty() {
        return Err(ServerError::BadRequest("chatId must not be empty".into()));
    }
    if req.text.trim().is_empty() {
        return Err(ServerError::BadRequest("text must not be empty".into()));
    }

    let org_id = resolved.organization.id;
    let sent = client_for_organization(&state, org_id)
        .await?
        .send_text(&req.chat_id, &req.text)
        .await?;

    info!(org = %org_id, user = %resolved.identity.user_id, message = %sent.id, "message sent");
    Ok(Json(sent))
}

// ─── Analytics ───

#[derive(Debug, Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

fn day_param(value: Option<&str>, name: &str) -> Result<Option<NaiveDate>, ServerError> {
    value
        .map(|v| {
            parse_day(v).ok_or_else(|| ServerError::BadRequest(format!("`{name}` must be YYYY-MM-DD")))
        })
        .transpose()
}

/// Resolve `from`/`to`, defaulting to the 30 days ending today (UTC).
fn analytics_range(query: &RangeQuery, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ServerError> {
    let to = day_param(query.to.as_deref(), "to")?.unwrap_or(today);
    let from = day_param(query.from.as_deref(), "from")?.unwrap_or(to - Duration::days(29));

    if from > to {
        return Err(ServerError::BadRequest("`from` must not be after `to`".into()));
    }
    if (to - from).num_days() >= MAX_ANALYTICS_SPAN_DAYS {
        return Err(ServerError::BadRequest(format!(
            "range is limited to {MAX_ANALYTICS_SPAN_DAYS} days"
        )));
    }
    Ok((from, to))
}

async fn daily_analytics(
    State(state): State<AppState>,
    resolved: Resolved,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<DailyAnalytics>>, ServerError> {
    let (from, to) = analytics_range(&query, Utc::now().date_naive())?;
    let org_id = resolved.organization.id;
    let rows = state
        .db
        .call(move |db| db.daily_analytics(org_id, from, to))
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Default, Deserialize)]
struct ReconcileRequest {
    day: Option<String>,
}

#[derive(Serialize)]
struct ReconcileResponse {
    days: usize,
    drifted: usize,
    reports: Vec<ReconcileReport>,
}

async fn reconcile_analytics(
    State(state): State<AppState>,
    resolved: Resolved,
    body: Option<Json<ReconcileRequest>>,
) -> Result<Json<ReconcileResponse>, ServerError> {
    require_role(&resolved, MANAGERS)?;

    let req = body.map(|Json(r)| r).unwrap_or_default();
    let day = day_param(req.day.as_deref(), "day")?;
    let org_id = resolved.organization.id;

    let reports = state
        .db
        .call(move |db| match day {
            Some(day) => Ok(vec![db.reconcile_day(org_id, day)?]),
            None => db.reconcile_organization(org_id),
        })
        .await?;

    let drifted = reports.iter().filter(|r| r.drifted).count();
    info!(org = %org_id, days = reports.len(), drifted, "analytics reconciled");

    Ok(Json(ReconcileResponse {
        days: reports.len(),
        drifted,
        reports,
    }))
}

// ─── Invitations ───

async fn list_invitations(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<Vec<Invitation>>, ServerError> {
    require_role(&resolved, MANAGERS)?;
    let org_id = resolved.organization.id;
    let invitations = state
        .db
        .call(move |db| db.list_pending_invitations(org_id))
        .await?;
    Ok(Json(invitations))
}

#[derive(Debug, Deserialize)]
struct CreateInvitationRequest {
    email: String,
    #[serde(default = "default_invite_role")]
    role: Role,
}

fn default_invite_role() -> Role {
    Role::Member
}

#[derive(Serialize)]
struct InvitationResponse {
    invitation: Invitation,
    /// Present only when the invitation was just created.
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

async fn create_invitation(
    State(state): State<AppState>,
    resolved: Resolved,
    Json(req): Json<CreateInvitationRequest>,
) -> Result<(StatusCode, Json<InvitationResponse>), ServerError> {
    require_role(&resolved, MANAGERS)?;
    if req.role == Role::Owner && resolved.role() != Role::Owner {
        return Err(ServerError::Forbidden("only owners may invite owners".into()));
    }

    let org_id = resolved.organization.id;
    let invited_by = resolved.identity.user_id.clone();
    let ttl = state.config.invitation_ttl();
    let created = state
        .db
        .call(move |db| db.create_invitation(org_id, &req.email, req.role, &invited_by, ttl))
        .await?;

    Ok(match created {
        InvitationCreated::Created { invitation, token } => (
            StatusCode::CREATED,
            Json(InvitationResponse {
                invitation,
                token: Some(token),
            }),
        ),
        InvitationCreated::Existing(invitation) => (
            StatusCode::OK,
            Json(InvitationResponse {
                invitation,
                token: None,
            }),
        ),
    })
}

async fn revoke_invitation(
    State(state): State<AppState>,
    resolved: Resolved,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    require_role(&resolved, MANAGERS)?;
    let org_id = resolved.organization.id;
    state
        .db
        .call(move |db| db.revoke_invitation(org_id, id))
        .await?;

    info!(org = %org_id, invitation = %id, "invitation revoked");
    Ok(Json(serde_json::json!({ "revoked": true })))
}

#[derive(Debug, Deserialize)]
struct AcceptInvitationRequest {
    token: String,
}

async fn accept_invitation(
    State(state): State<AppState>,
    Identity(identity): Identity,
    Json(req): Json<AcceptInvitationRequest>,
) -> Result<Json<Membership>, ServerError> {
    let token_hash = hash_presented_token(&req.token)?;
    let user_id = identity.user_id.clone();
    let email = identity.normalized_email();

    let outcome = state
        .db
        .call(move |db| db.accept_invitation(&token_hash, &user_id, &email, Utc::now()))
        .await?;

    match outcome {
        AcceptOutcome::Accepted(membership) => Ok(Json(membership)),
        AcceptOutcome::Expired => Err(ServerError::BadRequest("invitation has expired".into())),
        AcceptOutcome::EmailMismatch => Err(ServerError::Forbidden(
            "invitation was issued to a different email".into(),
        )),
        AcceptOutcome::NotFound => Err(ServerError::NotFound("invitation not found".into())),
    }
}

// ─── Members ───

async fn list_members(
    State(state): State<AppState>,
    resolved: Resolved,
) -> Result<Json<Vec<Membership>>, ServerError> {
    let org_id = resolved.organization.id;
    let members = state.db.call(move |db| db.list_members(org_id)).await?;
    Ok(Json(members))
}

async fn remove_member(
    State(state): State<AppState>,
    resolved: Resolved,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    require_role(&resolved, MANAGERS)?;

    let org_id = resolved.organization.id;
    let caller_role = resolved.role();
    let target = user_id.clone();
    let removed = state
        .db
        .call(move |db| {
            if let Some(membership) = db.get_active_membership(org_id, &target)? {
                if membership.role == Role::Owner && caller_role != Role::Owner {
                    return Ok(false);
                }
            }
            db.deactivate_membership(org_id, &target)?;
            Ok(true)
        })
        .await?;
    if !removed {
        return Err(ServerError::Forbidden("only owners may remove owners".into()));
    }

    info!(org = %org_id, user = %user_id, by = %resolved.identity.user_id, "member removed");
    Ok(Json(serde_json::json!({ "removed": true })))
}

// ─── Admin ───

#[derive(Debug, Deserialize)]
struct AdminCreateOrganizationRequest {
    #[serde(flatten)]
    organization: NewOrganization,
    owner_user_id: String,
}

#[derive(Serialize)]
struct AdminCreateOrganizationResponse {
    organization: Organization,
    owner: Membership,
}

async fn admin_create_organization(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<AdminCreateOrganizationRequest>,
) -> Result<(StatusCode, Json<AdminCreateOrganizationResponse>), ServerError> {
    verify_admin_token(&headers, &state.config)?;

    if req.owner_user_id.trim().is_empty() {
        return Err(ServerError::BadRequest("owner_user_id must not be empty".into()));
    }

    let (organization, owner) = state
        .db
        .call(move |db| db.create_organization_with_owner(&req.organization, req.owner_user_id.trim()))
        .await?;

    info!(
        org = %organization.id,
        slug = %organization.slug,
        session = %organization.gateway_session_name,
        "Admin provisioned organization"
    );
    Ok((
        StatusCode::CREATED,
        Json(AdminCreateOrganizationResponse { organization, owner }),
    ))
}

async fn admin_replay_dead_letters(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<ReplayReport>, ServerError> {
    verify_admin_token(&headers, &state.config)?;
    let report = replay_dead_letters(&state.db).await?;
    Ok(Json(report))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

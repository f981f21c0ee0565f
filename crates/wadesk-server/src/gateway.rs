//! Gateway client factory.
//!
//! Every call chain re-reads the organization row and builds a fresh
//! [`GatewayClient`], so rotated credentials apply immediately and nothing
//! outlives the request.

use std::time::Duration;

use uuid::Uuid;

use wadesk_gateway::GatewayClient;
use wadesk_store::Organization;

use crate::api::AppState;
use crate::error::ServerError;

/// Build a client for the organization's gateway session.
pub async fn client_for_organization(state: &AppState, organization_id: Uuid) -> Result<GatewayClient, ServerError> {
    let organization = state
        .db
        .call(move |db| db.get_organization(organization_id))
        .await?;
    client_for(&organization, state.config.gateway_timeout)
}

/// Build a client from an already loaded organization row.
pub fn client_for(organization: &Organization, timeout: Duration) -> Result<GatewayClient, ServerError> {
    let Some(base_url) = organization
        .gateway_base_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    else {
        return Err(ServerError::GatewayNotConfigured);
    };

    let client = GatewayClient::new(
        base_url,
        organization.gateway_api_key.as_deref(),
        &organization.gateway_session_name,
        timeout,
    )?;
    Ok(client)
}

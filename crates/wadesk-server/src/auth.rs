//! Request authentication: identity-provider bearer tokens for the
//! interactive API, a static admin token for provisioning, and the optional
//! webhook shared secret.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use wadesk_shared::identity::{verify_token, VerifiedIdentity};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// The caller, as vouched for by the identity provider. A user id supplied
/// any other way is never trusted.
#[derive(Debug, Clone)]
pub struct Identity(pub VerifiedIdentity);

#[axum::async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(ServerError::Unauthenticated)?;
        let identity = verify_token(token, &state.config.identity_public_key)?;
        Ok(Identity(identity))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Check the `/admin/*` bearer token.
pub fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer_token(headers).unwrap_or("");
    if !constant_time_eq(token, expected) {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

/// Check `X-Webhook-Secret` when a secret is configured.
pub fn verify_webhook_secret(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.webhook_secret else {
        return Ok(());
    };

    let presented = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(presented, expected) {
        return Err(ServerError::Unauthenticated);
    }
    Ok(())
}

fn constant_time_eq(presented: &str, expected: &str) -> bool {
    let presented = presented.as_bytes();
    let expected = expected.as_bytes();
    presented.len() == expected.len() && presented.ct_eq(expected).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &'static str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn admin_token_disabled_when_unset() {
        let config = ServerConfig::default();
        assert!(matches!(
            verify_admin_token(&headers("authorization", "Bearer x"), &config),
            Err(ServerError::Forbidden(_))
        ));
    }

    #[test]
    fn admin_token_must_match_exactly() {
        let config = ServerConfig {
            admin_token: Some("s3cret".into()),
            ..Default::default()
        };
        assert!(verify_admin_token(&headers("authorization", "Bearer s3cret"), &config).is_ok());
        assert!(verify_admin_token(&headers("authorization", "Bearer s3cre"), &config).is_err());
        assert!(verify_admin_token(&headers("authorization", "s3cret"), &config).is_err());
        assert!(verify_admin_token(&HeaderMap::new(), &config).is_err());
    }

    #[test]
    fn webhook_secret_optional() {
        let open = ServerConfig::default();
        assert!(verify_webhook_secret(&HeaderMap::new(), &open).is_ok());

        let locked = ServerConfig {
            webhook_secret: Some("hook-secret".into()),
            ..Default::default()
        };
        assert!(verify_webhook_secret(&headers(WEBHOOK_SECRET_HEADER, "hook-secret"), &locked).is_ok());
        assert!(matches!(
            verify_webhook_secret(&headers(WEBHOOK_SECRET_HEADER, "wrong"), &locked),
            Err(ServerError::Unauthenticated)
        ));
    }
}

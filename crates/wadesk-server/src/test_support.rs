//! In-process harness for router tests.

use std::sync::{Arc, OnceLock};

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde_json::Value;
use tower::ServiceExt;

use wadesk_shared::identity::{issue_token, IdentityClaims};
use wadesk_store::{Database, NewOrganization, Organization};

use crate::api::{build_router, AppState};
use crate::config::ServerConfig;
use crate::db::SharedDatabase;

pub const ADMIN_TOKEN: &str = "test-admin-token";

fn provider_key() -> &'static SigningKey {
    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| SigningKey::generate(&mut OsRng))
}

/// Fresh in-memory state trusting the test identity provider.
pub fn test_state() -> AppState {
    let config = ServerConfig {
        public_base_url: "http://wadesk.test".into(),
        identity_public_key: provider_key().verifying_key().to_bytes(),
        admin_token: Some(ADMIN_TOKEN.into()),
        ..Default::default()
    };
    AppState {
        db: SharedDatabase::new(Database::open_in_memory().unwrap()),
        config: Arc::new(config),
    }
}

/// A bearer token for `user_id`, valid for an hour.
pub fn token_for(user_id: &str, email: &str) -> String {
    let claims = IdentityClaims {
        sub: user_id.into(),
        email: email.into(),
        exp: Utc::now().timestamp() + 3600,
    };
    issue_token(&claims, provider_key())
}

/// Create an organization bound to `session` with `owner` as its owner.
pub async fn seed_org(state: &AppState, slug: &str, session: &str, owner: &str) -> Organization {
    let new = NewOrganization {
        name: slug.to_uppercase(),
        slug: slug.into(),
        gateway_session_name: Some(session.into()),
        ..Default::default()
    };
    let owner = owner.to_string();
    state
        .db
        .call(move |db| db.create_organization_with_owner(&new, &owner))
        .await
        .unwrap()
        .0
}

pub struct TestApp {
    pub state: AppState,
}

impl TestApp {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Send a request; `bearer` becomes the `Authorization` header.
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let auth = bearer.map(|t| format!("Bearer {t}"));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|a| vec![("authorization", a)])
            .unwrap_or_default();
        self.request_with_headers(method, uri, &headers, body).await
    }

    pub async fn call_raw(
        &self,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let auth = bearer.map(|t| format!("Bearer {t}"));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|a| vec![("authorization", a)])
            .unwrap_or_default();
        self.send(method, uri, &headers, body).await
    }

    pub async fn request_with_headers(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = self.send(method, uri, headers, body).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, HeaderMap, Bytes) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = build_router(self.state.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes)
    }
}

/// POST a JSON body without credentials (the webhook path).
pub async fn post_json(app: &TestApp, uri: &str, body: Value) -> (StatusCode, Value) {
    app.call("POST", uri, None, Some(body)).await
}

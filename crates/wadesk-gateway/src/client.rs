//! HTTP client for one organization's WAHA gateway.
//!
//! Provides [`GatewayClient`] which handles URL construction, the
//! `X-Api-Key` header, the request timeout and the mapping of gateway
//! answers onto [`GatewayError`]. Nothing is retried here.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use wadesk_shared::constants::WEBHOOK_EVENTS;

use crate::error::GatewayError;
use crate::types::{
    ChatMessage, ChatSummary, CreateSessionRequest, QrCode, SendTextRequest, SentMessage,
    SessionConfig, SessionInfo, WebhookConfig,
};

const DEFAULT_QR_MIME: &str = "image/png";

/// Client bound to one gateway, one API key and one session.
///
/// Built per call chain from the organization row; credentials are never
/// cached beyond the instance.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Url,
    session: String,
}

impl GatewayClient {
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        session: &str,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| GatewayError::InvalidConfig(format!("invalid base URL: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidConfig(format!(
                "base URL must be http(s): {base_url}"
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
            let mut value = HeaderValue::from_str(key)
                .map_err(|e| GatewayError::InvalidConfig(format!("invalid API key header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert("x-api-key", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            session: session.to_string(),
        })
    }

    /// The session this client is bound to.
    pub fn session_name(&self) -> &str {
        &self.session
    }

    // ------------------------------------------------------------------
    // Raw operations
    // ------------------------------------------------------------------

    /// `POST /api/sessions`, subscribing `webhook_url` to message, ack and
    /// status events.
    pub async fn create_session(&self, name: &str, webhook_url: &str) -> Result<SessionInfo, GatewayError> {
        let body = CreateSessionRequest {
            name,
            start: true,
            config: SessionConfig {
                webhooks: vec![WebhookConfig {
                    url: webhook_url,
                    events: &WEBHOOK_EVENTS,
                }],
            },
        };
        let url = self.url(&["api", "sessions"])?;
        self.json(self.http.post(url).json(&body)).await
    }

    /// `GET /api/sessions/{name}`
    pub async fn get_session(&self, name: &str) -> Result<SessionInfo, GatewayError> {
        let url = self.url(&["api", "sessions", name])?;
        self.json(self.http.get(url)).await
    }

    /// `GET /api/{name}/auth/qr?format=image`
    pub async fn get_qr_code(&self, name: &str) -> Result<QrCode, GatewayError> {
        let mut url = self.url(&["api", name, "auth", "qr"])?;
        url.query_pairs_mut().append_pair("format", "image");

        let response = self
            .send(self.http.get(url).header(ACCEPT, DEFAULT_QR_MIME))
            .await?;
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_QR_MIME)
            .to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("failed to read QR image: {e}")))?;

        Ok(QrCode {
            mime_type,
            data: data.to_vec(),
        })
    }

    /// `GET /api/{name}/chats/overview`
    pub async fn get_chats_overview(&self, name: &str) -> Result<Vec<ChatSummary>, GatewayError> {
        let url = self.url(&["api", name, "chats", "overview"])?;
        self.json(self.http.get(url)).await
    }

    /// `GET /api/{name}/chats/{chat_id}/messages`, without media download.
    pub async fn get_chat_messages(
        &self,
        name: &str,
        chat_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ChatMessage>, GatewayError> {
        let mut url = self.url(&["api", name, "chats", chat_id, "messages"])?;
        url.query_pairs_mut()
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("downloadMedia", "false");
        self.json(self.http.get(url)).await
    }

    /// `POST /api/sendText`
    pub async fn send_message(&self, name: &str, chat_id: &str, text: &str) -> Result<SentMessage, GatewayError> {
        let body = SendTextRequest {
            session: name,
            chat_id,
            text,
        };
        let url = self.url(&["api", "sendText"])?;
        self.json(self.http.post(url).json(&body)).await
    }

    // ------------------------------------------------------------------
    // Bound to the organization's own session
    // ------------------------------------------------------------------

    pub async fn start_session(&self, webhook_url: &str) -> Result<SessionInfo, GatewayError> {
        self.create_session(&self.session, webhook_url).await
    }

    pub async fn session(&self) -> Result<SessionInfo, GatewayError> {
        self.get_session(&self.session).await
    }

    pub async fn qr_code(&self) -> Result<QrCode, GatewayError> {
        self.get_qr_code(&self.session).await
    }

    pub async fn chats_overview(&self) -> Result<Vec<ChatSummary>, GatewayError> {
        self.get_chats_overview(&self.session).await
    }

    pub async fn chat_messages(&self, chat_id: &str, limit: u32, offset: u32) -> Result<Vec<ChatMessage>, GatewayError> {
        self.get_chat_messages(&self.session, chat_id, limit, offset).await
    }

    pub async fn send_text(&self, chat_id: &str, text: &str) -> Result<SentMessage, GatewayError> {
        self.send_message(&self.session, chat_id, text).await
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    /// Append percent-encoded path segments to the base URL.
    fn url(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidConfig(format!("base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        debug!(status = %status, url = %response.url().path(), "gateway response received");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(format!("failed to read response body: {e}")))?;
        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

/// Map a non-success status onto the error taxonomy.
fn classify(status: StatusCode, body: String) -> GatewayError {
    if status == StatusCode::NOT_FOUND || status.is_server_error() {
        GatewayError::Unavailable(format!("gateway returned {status}"))
    } else {
        GatewayError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> GatewayClient {
        GatewayClient::new(base_url, Some("test-api-key"), "org-42", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn get_session_sends_api_key() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/sessions/org-42"))
            .and(header("x-api-key", "test-api-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "name": "org-42", "status": "WORKING" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let info = test_client(&server.uri()).session().await.unwrap();
        assert_eq!(info.status, "WORKING");
    }

    #[tokio::test]
    async fn create_session_registers_webhook_events() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/sessions"))
            .and(body_json(json!({
                "name": "org-42",
                "start": true,
                "config": {
                    "webhooks": [{
                        "url": "https://app.example.com/webhooks/waha",
                        "events": ["message", "message.any", "message.ack", "session.status"]
                    }]
                }
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "name": "org-42", "status": "STARTING" })),
            )
            .mount(&server)
            .await;

        let info = test_client(&server.uri())
            .start_session("https://app.example.com/webhooks/waha")
            .await
            .unwrap();
        assert_eq!(info.name, "org-42");
        assert_eq!(info.status, "STARTING");
    }

    #[tokio::test]
    async fn qr_code_passes_bytes_and_mime_through() {
        let server = MockServer::start().await;
        let png = vec![0x89, b'P', b'N', b'G', 0, 1, 2];

        Mock::given(method("GET"))
            .and(path("/api/org-42/auth/qr"))
            .and(query_param("format", "image"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png.clone()),
            )
            .mount(&server)
            .await;

        let qr = test_client(&server.uri()).qr_code().await.unwrap();
        assert_eq!(qr.mime_type, "image/png");
        assert_eq!(qr.data, png);
    }

    #[tokio::test]
    async fn chat_messages_use_paging_and_skip_media() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/org-42/chats/491701234567@c.us/messages"))
            .and(query_param("limit", "20"))
            .and(query_param("offset", "40"))
            .and(query_param("downloadMedia", "false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": "wamid.1", "body": "Hallo", "timestamp": 1700000000, "fromMe": false },
                { "id": "wamid.2", "body": "Hi", "timestamp": 1700000060, "fromMe": true, "ack": 3 }
            ])))
            .mount(&server)
            .await;

        let messages = test_client(&server.uri())
            .chat_messages("491701234567@c.us", 20, 40)
            .await
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].from_me);
        assert_eq!(messages[1].ack, Some(3));
    }

    #[tokio::test]
    async fn send_text_posts_session_and_chat() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/sendText"))
            .and(body_json(json!({ "session": "org-42", "chatId": "123@c.us", "text": "Hallo" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "true_123@c.us_XYZ" })))
            .mount(&server)
            .await;

        let sent = test_client(&server.uri()).send_text("123@c.us", "Hallo").await.unwrap();
        assert_eq!(sent.id, "true_123@c.us_XYZ");
    }

    #[tokio::test]
    async fn not_found_and_server_errors_are_unavailable_without_retry() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/sessions/org-42"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/org-42/chats/overview"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        assert!(matches!(client.session().await, Err(GatewayError::Unavailable(_))));
        assert!(matches!(client.chats_overview().await, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn client_errors_are_rejected_with_body() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/sendText"))
            .respond_with(ResponseTemplate::new(422).set_body_string("chatId is invalid"))
            .mount(&server)
            .await;

        let err = test_client(&server.uri()).send_text("nope", "x").await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Rejected {
                status: 422,
                body: "chatId is invalid".into()
            }
        );
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn undecodable_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/sessions/org-42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
            .mount(&server)
            .await;

        assert!(matches!(
            test_client(&server.uri()).session().await,
            Err(GatewayError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn timeout_is_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/sessions/org-42"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "name": "org-42", "status": "WORKING" }))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client =
            GatewayClient::new(&server.uri(), None, "org-42", Duration::from_millis(100)).unwrap();
        assert!(matches!(client.session().await, Err(GatewayError::Unavailable(_))));
    }

    #[tokio::test]
    async fn base_url_with_prefix_and_trailing_slash() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/waha/api/sessions/org-42"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "name": "org-42", "status": "STOPPED" })),
            )
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/waha/", server.uri()));
        assert_eq!(client.session().await.unwrap().status, "STOPPED");
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        for url in ["", "not a url", "ftp://waha.local", "mailto:ops@example.com"] {
            assert!(
                matches!(
                    GatewayClient::new(url, None, "s", Duration::from_secs(1)),
                    Err(GatewayError::InvalidConfig(_))
                ),
                "{url}"
            );
        }
    }
}

/// Gateway session name used when an organization does not pick one
pub const DEFAULT_SESSION_NAME: &str = "default";

/// Path the gateway posts webhook events to
pub const WEBHOOK_PATH: &str = "/webhooks/waha";

/// Events the gateway is asked to deliver when a session is created
pub const WEBHOOK_EVENTS: [&str; 4] = ["message", "message.any", "message.ack", "session.status"];

/// Invitation token size in bytes (256 bits)
pub const INVITE_TOKEN_SIZE: usize = 32;

/// Default invitation lifetime in hours (7 days)
pub const DEFAULT_INVITATION_TTL_HOURS: i64 = 168;

/// Default timeout for outbound gateway calls, in seconds
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 15;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Page size bounds for chat message listing
pub const DEFAULT_CHAT_PAGE_SIZE: u32 = 50;
pub const MAX_CHAT_PAGE_SIZE: u32 = 200;

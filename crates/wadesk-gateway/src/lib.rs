//! # wadesk-gateway
//!
//! Typed client for the WAHA WhatsApp HTTP API.
//!
//! A [`GatewayClient`] is bound to one organization's base URL, API key and
//! session name. It never retries: callers get a [`GatewayError`] that tells
//! them whether retrying could help.

pub mod client;
pub mod error;
pub mod types;

pub use client::GatewayClient;
pub use error::GatewayError;
pub use types::{ChatMessage, ChatSummary, LastMessage, QrCode, SentMessage, SessionInfo};

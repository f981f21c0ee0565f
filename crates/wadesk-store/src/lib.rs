//! # wadesk-store
//!
//! Tenant-scoped persistence for wadesk, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model.
//! Every row except dead letters belongs to exactly one organization, and
//! every query filters on it.

pub mod analytics;
pub mod contacts;
pub mod database;
pub mod dead_letters;
pub mod ingest;
pub mod invitations;
pub mod memberships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod organizations;
pub mod sessions;

mod error;
mod rows;

pub use analytics::parse_day;
pub use database::Database;
pub use error::StoreError;
pub use invitations::{AcceptOutcome, InvitationCreated};
pub use models::*;

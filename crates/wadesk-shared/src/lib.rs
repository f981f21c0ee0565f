//! # wadesk-shared
//!
//! Types shared by every wadesk crate: tenant enums, the WAHA webhook
//! protocol, identity-provider tokens and invitation tokens.

pub mod constants;
pub mod error;
pub mod identity;
pub mod invite;
pub mod protocol;
pub mod types;

pub use error::{EventError, IdentityError, InviteError};
pub use types::{Direction, MessageType, Role, SessionState};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::constants::INVITE_TOKEN_SIZE;
use crate::error::InviteError;

/// A freshly generated invitation token.
///
/// Only the BLAKE3 hash is persisted; the plaintext is handed to the inviter
/// once and never stored.
#[derive(Debug, Clone)]
pub struct InviteToken {
    plaintext: String,
}

impl InviteToken {
    /// Generate a new 256-bit random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; INVITE_TOKEN_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self {
            plaintext: hex::encode(bytes),
        }
    }

    /// The value to give to the invitee.
    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    pub fn hash(&self) -> String {
        hash_token(&self.plaintext)
    }
}

/// Hash a presented token for lookup. Rejects anything that is not the
/// expected hex encoding so junk never reaches the database.
pub fn hash_presented_token(presented: &str) -> Result<String, InviteError> {
    let presented = presented.trim();
    if presented.len() != INVITE_TOKEN_SIZE * 2 || hex::decode(presented).is_err() {
        return Err(InviteError::InvalidFormat);
    }
    Ok(hash_token(&presented.to_ascii_lowercase()))
}

fn hash_token(plaintext: &str) -> String {
    blake3::hash(plaintext.as_bytes()).to_hex().to_string()
}

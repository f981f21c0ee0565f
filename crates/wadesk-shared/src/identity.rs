//! Identity tokens issued by the external identity provider.
//!
//! wadesk never authenticates users itself. The provider signs a small JSON
//! claim set with its Ed25519 key and the client presents it as a bearer
//! token: `base64url(claims) "." base64url(signature)`. We only verify.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Claims carried inside an identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Stable user id (subject) assigned by the identity provider.
    pub sub: String,
    pub email: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// A caller whose token has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedIdentity {
    pub user_id: String,
    pub email: String,
}

impl VerifiedIdentity {
    /// Emails are compared case-insensitively everywhere.
    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }
}

/// Verify `token` against the provider's public key.
pub fn verify_token(token: &str, provider_pubkey: &[u8; 32]) -> Result<VerifiedIdentity, IdentityError> {
    verify_token_at(token, provider_pubkey, Utc::now())
}

pub fn verify_token_at(
    token: &str,
    provider_pubkey: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<VerifiedIdentity, IdentityError> {
    let (claims_b64, sig_b64) = token.trim().split_once('.').ok_or(IdentityError::Malformed)?;

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| IdentityError::Malformed)?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| IdentityError::Malformed)?;

    let verifying_key =
        VerifyingKey::from_bytes(provider_pubkey).map_err(|_| IdentityError::InvalidKey)?;
    let signature =
        Signature::from_slice(&sig_bytes).map_err(|_| IdentityError::InvalidSignature)?;
    // Strict verification also rejects small-order keys such as the all-zero
    // development default.
    verifying_key
        .verify_strict(&claims_bytes, &signature)
        .map_err(|_| IdentityError::InvalidSignature)?;

    let claims: IdentityClaims =
        serde_json::from_slice(&claims_bytes).map_err(|_| IdentityError::Malformed)?;

    if claims.exp <= now.timestamp() {
        return Err(IdentityError::Expired);
    }
    if claims.sub.trim().is_empty() {
        return Err(IdentityError::Malformed);
    }

    Ok(VerifiedIdentity {
        user_id: claims.sub,
        email: claims.email,
    })
}

/// Sign a claim set. Used by the identity provider side (and tests).
pub fn issue_token(claims: &IdentityClaims, provider_key: &SigningKey) -> String {
    // Serializing a struct of strings and integers cannot fail.
    let claims_bytes = serde_json::to_vec(claims).unwrap_or_default();
    let signature = provider_key.sign(&claims_bytes);
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(&claims_bytes),
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::rngs::OsRng;

    fn claims(exp: DateTime<Utc>) -> IdentityClaims {
        IdentityClaims {
            sub: "user-1".into(),
            email: "Ada@Example.com".into(),
            exp: exp.timestamp(),
        }
    }

    #[test]
    fn test_identity_token_valid() {
        let provider = SigningKey::generate(&mut OsRng);
        let pubkey = provider.verifying_key().to_bytes();

        let token = issue_token(&claims(Utc::now() + Duration::hours(1)), &provider);
        let identity = verify_token(&token, &pubkey).unwrap();

        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.normalized_email(), "ada@example.com");
    }

    #[test]
    fn test_identity_token_expired() {
        let provider = SigningKey::generate(&mut OsRng);
        let pubkey = provider.verifying_key().to_bytes();

        let token = issue_token(&claims(Utc::now() - Duration::minutes(1)), &provider);
        assert_eq!(verify_token(&token, &pubkey), Err(IdentityError::Expired));
    }

    #[test]
    fn test_identity_token_wrong_provider_key() {
        let provider = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);

        let token = issue_token(&claims(Utc::now() + Duration::hours(1)), &provider);
        assert_eq!(
            verify_token(&token, &other.verifying_key().to_bytes()),
            Err(IdentityError::InvalidSignature)
        );
    }

    #[test]
    fn test_identity_token_tampered_claims() {
        let provider = SigningKey::generate(&mut OsRng);
        let pubkey = provider.verifying_key().to_bytes();

        let token = issue_token(&claims(Utc::now() + Duration::hours(1)), &provider);
        let (_, sig) = token.split_once('.').unwrap();
        let mut forged = claims(Utc::now() + Duration::hours(1));
        forged.sub = "someone-else".into();
        let forged_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());

        assert_eq!(
            verify_token(&format!("{forged_b64}.{sig}"), &pubkey),
            Err(IdentityError::InvalidSignature)
        );
    }

    #[test]
    fn test_identity_token_garbage() {
        let pubkey = SigningKey::generate(&mut OsRng).verifying_key().to_bytes();
        assert_eq!(verify_token("nodot", &pubkey), Err(IdentityError::Malformed));
        assert_eq!(verify_token("!!.??", &pubkey), Err(IdentityError::Malformed));
    }
}

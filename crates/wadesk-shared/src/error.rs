use thiserror::Error;

/// Why an inbound webhook body was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("missing or invalid field `{0}`")]
    MissingField(&'static str),

    #[error("invalid `{kind}` payload: {reason}")]
    InvalidPayload { kind: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Malformed identity token")]
    Malformed,

    #[error("Invalid identity token signature")]
    InvalidSignature,

    #[error("Identity token expired")]
    Expired,

    #[error("Invalid identity provider key")]
    InvalidKey,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("Invalid invitation token format")]
    InvalidFormat,
}

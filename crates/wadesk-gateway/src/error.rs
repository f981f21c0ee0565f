use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Connection failure, timeout, unknown session (404) or a 5xx answer.
    /// Transient from the caller's point of view.
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// Any other 4xx answer.
    #[error("Gateway rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// 2xx answer with a body we could not decode.
    #[error("Unexpected gateway response: {0}")]
    Decode(String),

    /// The client could not be built from the stored settings.
    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

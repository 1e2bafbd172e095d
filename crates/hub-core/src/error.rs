use serde_json::Value;
use thiserror::Error;

/// Errors produced by the hubgate protocol layer.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid envelope: {0}")]
    Validation(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("unroutable response: {0}")]
    UnroutableResponse(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("address not found: {0}")]
    NotFound(String),

    #[error("address already registered: {0}")]
    AddressInUse(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for HubError {
    fn from(e: serde_json::Error) -> Self {
        HubError::Codec(e.to_string())
    }
}

pub type HubResult<T> = Result<T, HubError>;

/// Outcome of a fabric request that did not produce a response.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FabricError {
    /// No response arrived within the request deadline.
    #[error("TIMEOUT")]
    Timeout,

    /// The destination address is not registered on the fabric.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// The responder answered with an error payload.
    #[error("rejected: {0}")]
    Rejected(Value),

    /// The responder went away before answering.
    #[error("DISCONNECTED")]
    Disconnected,
}

impl FabricError {
    /// Wire representation used in the `err` field of a `res` envelope.
    pub fn to_payload(&self) -> Value {
        match self {
            FabricError::Rejected(payload) => payload.clone(),
            FabricError::Timeout => Value::String("TIMEOUT".into()),
            FabricError::NotFound(address) => serde_json::json!({
                "code": "NOT_FOUND",
                "address": address,
            }),
            FabricError::Disconnected => Value::String("DISCONNECTED".into()),
        }
    }
}

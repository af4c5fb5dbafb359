use thiserror::Error;

/// Errors raised while building or running the hub.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("JWT secret is not configured; refusing to start in production")]
    MissingSecret,

    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("hub is already running")]
    AlreadyStarted,
}

/// Why a connection attempt was turned away at the auth gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Authentication required")]
    MissingCredential,

    #[error("Invalid token")]
    InvalidCredential,
}

/// Errors surfaced by the reconnecting client to its caller.
///
/// Transport failures are never reported here; the agent logs and retries them.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("invalid hub url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("client has been shut down")]
    Closed,
}

/// A client frame the hub could not act on. The connection stays open.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message format")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Binary messages are not supported")]
    Binary,
}

//! Error types for the bridge.
//!
//! Each concern gets its own enum so callers can match on what actually went
//! wrong. `BridgeError` collects them for APIs that span several concerns.

use thiserror::Error;

/// Failure to turn transport text into a typed message (or back).
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("no encoded payload found in injection script")]
    MissingPayload,
}

/// Returned by a message handler that could not process a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Outbound delivery could not be attempted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport target is not bound")]
    Unavailable,

    #[error("transport channel closed")]
    Closed,

    #[error("failed to encode outbound message: {0}")]
    Encode(String),
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Encode(err.to_string())
    }
}

/// The secure credential store could not be read or written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("secure store failure: {0}")]
    Store(String),

    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),
}

/// The opaque login/refresh provider failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("authentication failed: {0}")]
    Failed(String),

    #[error("authentication cancelled")]
    Cancelled,

    #[error("no session to refresh")]
    NoSession,
}

/// Umbrella error for operations spanning several concerns.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

//! Typed message registry.
//!
//! Two closed sets of message kinds, one per direction. On the wire every
//! message is `{"kind": "...", "payload": {...}}`; serde's adjacent tagging
//! gives us that shape and rejects kinds outside the set.
//!
//! Constructors never fail. Payload shape is guaranteed by the types, and
//! runtime validation only happens at the decode boundary (see [`crate::codec`]).

use std::fmt;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::session::SessionSnapshot;

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    HostToSurface,
    SurfaceToHost,
}

impl Direction {
    /// Label used in logs and wire traces.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::HostToSurface => "HOST->SURFACE",
            Direction::SurfaceToHost => "SURFACE->HOST",
        }
    }
}

/// Common behaviour of both message enums, so the hub and transports can be
/// written once for both sides.
pub trait BridgeMessage:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static
{
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    const DIRECTION: Direction;

    fn kind(&self) -> Self::Kind;
}

/// Payload for kinds that carry no data. Serializes as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyPayload {}

// ============================================================================
// Host -> Surface
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAckPayload {
    pub correlation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    SessionToken(SessionSnapshot),
    SessionError(SessionErrorPayload),
    SessionCleared(EmptyPayload),
    CommandAck(CommandAckPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostMessageKind {
    SessionToken,
    SessionError,
    SessionCleared,
    CommandAck,
}

impl HostMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostMessageKind::SessionToken => "SESSION_TOKEN",
            HostMessageKind::SessionError => "SESSION_ERROR",
            HostMessageKind::SessionCleared => "SESSION_CLEARED",
            HostMessageKind::CommandAck => "COMMAND_ACK",
        }
    }
}

impl fmt::Display for HostMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl HostMessage {
    pub fn session_token(snapshot: SessionSnapshot) -> Self {
        HostMessage::SessionToken(snapshot)
    }

    pub fn session_error(error: impl Into<String>, provider_id: Option<String>) -> Self {
        HostMessage::SessionError(SessionErrorPayload {
            error: error.into(),
            provider_id,
        })
    }

    pub fn session_cleared() -> Self {
        HostMessage::SessionCleared(EmptyPayload {})
    }

    pub fn command_ack(correlation_id: impl Into<String>) -> Self {
        HostMessage::CommandAck(CommandAckPayload {
            correlation_id: correlation_id.into(),
        })
    }
}

impl BridgeMessage for HostMessage {
    type Kind = HostMessageKind;

    const DIRECTION: Direction = Direction::HostToSurface;

    fn kind(&self) -> HostMessageKind {
        match self {
            HostMessage::SessionToken(_) => HostMessageKind::SessionToken,
            HostMessage::SessionError(_) => HostMessageKind::SessionError,
            HostMessage::SessionCleared(_) => HostMessageKind::SessionCleared,
            HostMessage::CommandAck(_) => HostMessageKind::CommandAck,
        }
    }
}

// ============================================================================
// Surface -> Host
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLoginPayload {
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Payload of the argument-less commands. Empty unless the command is tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfaceMessage {
    RequestLogin(RequestLoginPayload),
    RequestLogout(CommandPayload),
    RequestTokenRefresh(CommandPayload),
    SurfaceReady(EmptyPayload),
    SessionSyncAck(EmptyPayload),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceMessageKind {
    RequestLogin,
    RequestLogout,
    RequestTokenRefresh,
    SurfaceReady,
    SessionSyncAck,
}

impl SurfaceMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceMessageKind::RequestLogin => "REQUEST_LOGIN",
            SurfaceMessageKind::RequestLogout => "REQUEST_LOGOUT",
            SurfaceMessageKind::RequestTokenRefresh => "REQUEST_TOKEN_REFRESH",
            SurfaceMessageKind::SurfaceReady => "SURFACE_READY",
            SurfaceMessageKind::SessionSyncAck => "SESSION_SYNC_ACK",
        }
    }
}

impl fmt::Display for SurfaceMessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SurfaceMessage {
    pub fn request_login(provider_id: impl Into<String>) -> Self {
        SurfaceMessage::RequestLogin(RequestLoginPayload {
            provider_id: provider_id.into(),
            correlation_id: None,
        })
    }

    pub fn request_logout() -> Self {
        SurfaceMessage::RequestLogout(CommandPayload::default())
    }

    pub fn request_token_refresh() -> Self {
        SurfaceMessage::RequestTokenRefresh(CommandPayload::default())
    }

    pub fn surface_ready() -> Self {
        SurfaceMessage::SurfaceReady(EmptyPayload {})
    }

    pub fn session_sync_ack() -> Self {
        SurfaceMessage::SessionSyncAck(EmptyPayload {})
    }

    /// Tag a command with a correlation id. Non-command kinds are returned as-is.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        let id = Some(id.into());
        match &mut self {
            SurfaceMessage::RequestLogin(payload) => payload.correlation_id = id,
            SurfaceMessage::RequestLogout(payload)
            | SurfaceMessage::RequestTokenRefresh(payload) => payload.correlation_id = id,
            SurfaceMessage::SurfaceReady(_) | SurfaceMessage::SessionSyncAck(_) => {}
        }
        self
    }

    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            SurfaceMessage::RequestLogin(payload) => payload.correlation_id.as_deref(),
            SurfaceMessage::RequestLogout(payload)
            | SurfaceMessage::RequestTokenRefresh(payload) => payload.correlation_id.as_deref(),
            SurfaceMessage::SurfaceReady(_) | SurfaceMessage::SessionSyncAck(_) => None,
        }
    }

    /// Commands are the kinds that ask the host to do something.
    pub fn is_command(&self) -> bool {
        matches!(
            self,
            SurfaceMessage::RequestLogin(_)
                | SurfaceMessage::RequestLogout(_)
                | SurfaceMessage::RequestTokenRefresh(_)
        )
    }
}

impl BridgeMessage for SurfaceMessage {
    type Kind = SurfaceMessageKind;

    const DIRECTION: Direction = Direction::SurfaceToHost;

    fn kind(&self) -> SurfaceMessageKind {
        match self {
            SurfaceMessage::RequestLogin(_) => SurfaceMessageKind::RequestLogin,
            SurfaceMessage::RequestLogout(_) => SurfaceMessageKind::RequestLogout,
            SurfaceMessage::RequestTokenRefresh(_) => SurfaceMessageKind::RequestTokenRefresh,
            SurfaceMessage::SurfaceReady(_) => SurfaceMessageKind::SurfaceReady,
            SurfaceMessage::SessionSyncAck(_) => SurfaceMessageKind::SessionSyncAck,
        }
    }
}

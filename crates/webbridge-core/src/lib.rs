//! # webbridge-core
//!
//! Message bridge between a native host and an embedded web surface.
//!
//! The host owns the session; the surface only keeps a copy. Host messages
//! reach the surface through script injection, surface messages reach the
//! host through a single postMessage channel. Neither primitive has any
//! delivery guarantee, so the protocol layer acknowledges what matters:
//! session pushes with `SESSION_SYNC_ACK`, commands with `COMMAND_ACK`.
//!
//! ## Key Concepts
//!
//! - **Hub**: per-side registry of typed message handlers with its own
//!   outbound transport
//! - **Handshake**: host-side state machine pushing the current session when
//!   the surface reports ready and degrading if it is never acknowledged
//! - **Outbox**: surface-side at-least-once delivery for commands
//! - **Credential store**: the host's source of truth for the session

pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod handshake;
pub mod host;
pub mod hub;
pub mod loopback;
pub mod messages;
pub mod outbox;
pub mod retry;
pub mod session;
pub mod surface;
pub mod trace;
pub mod transport;

// Re-export commonly used types
pub use config::{HandshakeConfig, OutboxConfig};
pub use credentials::{AuthProvider, CredentialStore, SecureCredentialStore, SecureStore};
pub use error::{BridgeError, CodecError, HandlerError, TransportError};
pub use handshake::{HandshakeState, SessionHandshake};
pub use host::HostBridge;
pub use hub::{HostHub, MessageHub, Subscription, SurfaceHub};
pub use loopback::{Loopback, LoopbackOptions};
pub use messages::{BridgeMessage, HostMessage, HostMessageKind, SurfaceMessage, SurfaceMessageKind};
pub use retry::RetryPolicy;
pub use session::{SessionSnapshot, SurfaceSession};
pub use surface::SurfaceBridge;

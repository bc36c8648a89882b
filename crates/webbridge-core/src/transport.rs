//! One-way delivery primitives, one per direction.
//!
//! Host -> surface goes through script evaluation on the rendering surface;
//! surface -> host goes through a single postMessage-style channel. Both are
//! fire-and-forget: a successful `deliver` only means the message was handed
//! to the primitive. Reliability is the protocol layer's job.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::codec;
use crate::error::TransportError;
use crate::messages::{BridgeMessage, HostMessage, SurfaceMessage};

/// Outbound primitive for one direction.
pub trait Transport<M: BridgeMessage>: Send + Sync {
    fn deliver(&self, message: &M) -> Result<(), TransportError>;
}

/// The host's handle on the rendering surface.
pub trait SurfaceHandle: Send + Sync {
    /// Evaluate `source` in the surface. Silently does nothing if no page is
    /// attached yet.
    fn evaluate_script(&self, source: &str);
}

impl<T: SurfaceHandle + ?Sized> SurfaceHandle for Arc<T> {
    fn evaluate_script(&self, source: &str) {
        (**self).evaluate_script(source)
    }
}

/// The surface's single outbound channel to the host.
pub trait PostMessageChannel: Send + Sync {
    fn post_message(&self, data: String) -> Result<(), TransportError>;
}

impl<T: PostMessageChannel + ?Sized> PostMessageChannel for Arc<T> {
    fn post_message(&self, data: String) -> Result<(), TransportError> {
        (**self).post_message(data)
    }
}

// ============================================================================
// Host -> Surface
// ============================================================================

/// Delivers host messages by injecting a decoding script into the surface.
pub struct ScriptInjectionTransport<H> {
    surface: H,
}

impl<H: SurfaceHandle> ScriptInjectionTransport<H> {
    pub fn new(surface: H) -> Self {
        Self { surface }
    }
}

impl<H: SurfaceHandle> Transport<HostMessage> for ScriptInjectionTransport<H> {
    fn deliver(&self, message: &HostMessage) -> Result<(), TransportError> {
        let script = codec::injection_script(message)?;
        self.surface.evaluate_script(&script);
        Ok(())
    }
}

// ============================================================================
// Surface -> Host
// ============================================================================

/// Delivers surface messages as raw JSON text over a postMessage channel.
pub struct PostMessageTransport<C> {
    channel: C,
}

impl<C: PostMessageChannel> PostMessageTransport<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }
}

impl<C: PostMessageChannel> Transport<SurfaceMessage> for PostMessageTransport<C> {
    fn deliver(&self, message: &SurfaceMessage) -> Result<(), TransportError> {
        let json = codec::encode(message)?;
        self.channel.post_message(json)
    }
}

// ============================================================================
// Loopback primitives
// ============================================================================

/// In-process stand-in for a rendering surface.
///
/// Each [`attach`](Self::attach) models a page load and returns the receiver
/// the page's message listener reads from. Scripts evaluated while detached
/// are dropped, as they would be on a real surface that has not loaded yet.
#[derive(Default)]
pub struct ChannelSurface {
    page: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl ChannelSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fresh page, replacing any previous one.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut page) = self.page.lock() {
            *page = Some(tx);
        }
        rx
    }

    /// Unload the current page.
    pub fn detach(&self) {
        if let Ok(mut page) = self.page.lock() {
            *page = None;
        }
    }

    pub fn is_attached(&self) -> bool {
        self.page.lock().map(|page| page.is_some()).unwrap_or(false)
    }
}

impl SurfaceHandle for ChannelSurface {
    fn evaluate_script(&self, source: &str) {
        let sender = match self.page.lock() {
            Ok(page) => page.clone(),
            Err(_) => None,
        };
        let Some(sender) = sender else {
            log::debug!("surface not attached, dropping injected script");
            return;
        };
        match codec::extract_injected_payload(source) {
            Ok(data) => {
                if sender.send(data).is_err() {
                    log::debug!("surface page closed, dropping injected script");
                }
            }
            Err(e) => log::warn!("loopback surface could not run script: {}", e),
        }
    }
}

/// postMessage channel backed by an unbounded mpsc sender.
#[derive(Clone)]
pub struct ChannelPostMessage {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelPostMessage {
    pub fn new(sender: mpsc::UnboundedSender<String>) -> Self {
        Self { sender }
    }

    /// A connected channel and the host-side receiver.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl PostMessageChannel for ChannelPostMessage {
    fn post_message(&self, data: String) -> Result<(), TransportError> {
        self.sender.send(data).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSnapshot;

    mod script_injection {
        use super::*;

        #[test]
        fn delivers_json_to_attached_surface() {
            let surface = Arc::new(ChannelSurface::new());
            let mut page = surface.attach();
            let transport = ScriptInjectionTransport::new(Arc::clone(&surface));

            let msg = HostMessage::session_token(SessionSnapshot::new("abc", "u1", 1, "google"));
            transport.deliver(&msg).unwrap();

            let data = page.try_recv().unwrap();
            let decoded: HostMessage = codec::decode(&data).unwrap();
            assert_eq!(decoded, msg);
        }

        #[test]
        fn drops_silently_before_attach() {
            let surface = Arc::new(ChannelSurface::new());
            let transport = ScriptInjectionTransport::new(Arc::clone(&surface));

            assert!(transport.deliver(&HostMessage::session_cleared()).is_ok());

            let mut page = surface.attach();
            assert!(page.try_recv().is_err());
        }

        #[test]
        fn reload_routes_to_new_page() {
            let surface = Arc::new(ChannelSurface::new());
            let mut old_page = surface.attach();
            let mut new_page = surface.attach();
            let transport = ScriptInjectionTransport::new(Arc::clone(&surface));

            transport.deliver(&HostMessage::session_cleared()).unwrap();

            assert!(old_page.try_recv().is_err());
            assert!(new_page.try_recv().is_ok());
        }

        #[test]
        fn detach_stops_delivery() {
            let surface = Arc::new(ChannelSurface::new());
            let mut page = surface.attach();
            surface.detach();
            assert!(!surface.is_attached());

            let transport = ScriptInjectionTransport::new(Arc::clone(&surface));
            transport.deliver(&HostMessage::session_cleared()).unwrap();
            assert!(page.try_recv().is_err());
        }
    }

    mod post_message {
        use super::*;

        #[test]
        fn delivers_raw_json() {
            let (channel, mut rx) = ChannelPostMessage::pair();
            let transport = PostMessageTransport::new(channel);

            transport.deliver(&SurfaceMessage::surface_ready()).unwrap();

            assert_eq!(
                rx.try_recv().unwrap(),
                r#"{"kind":"SURFACE_READY","payload":{}}"#
            );
        }

        #[test]
        fn one_message_per_call() {
            let (channel, mut rx) = ChannelPostMessage::pair();
            let transport = PostMessageTransport::new(channel);

            transport.deliver(&SurfaceMessage::surface_ready()).unwrap();
            transport.deliver(&SurfaceMessage::session_sync_ack()).unwrap();

            assert!(rx.try_recv().unwrap().contains("SURFACE_READY"));
            assert!(rx.try_recv().unwrap().contains("SESSION_SYNC_ACK"));
            assert!(rx.try_recv().is_err());
        }

        #[test]
        fn closed_channel_reports_error() {
            let (channel, rx) = ChannelPostMessage::pair();
            drop(rx);
            let transport = PostMessageTransport::new(channel);

            let result = transport.deliver(&SurfaceMessage::surface_ready());
            assert_eq!(result, Err(TransportError::Closed));
        }
    }
}

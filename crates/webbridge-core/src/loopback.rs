//! In-process host and surface wired back to back.
//!
//! Stands in for a real native host and web view: host messages go through
//! the same script-injection transport (into a [`ChannelSurface`]) and
//! surface messages through the same postMessage transport (into a
//! [`ChannelPostMessage`]) a real embedding would use. Each page load builds
//! a fresh surface bridge, the way a reload discards all page state.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::{HandshakeConfig, OutboxConfig};
use crate::credentials::{AuthProvider, CredentialStore};
use crate::host::HostBridge;
use crate::hub::{HostHub, MessageHub, SurfaceHub};
use crate::messages::BridgeMessage;
use crate::surface::SurfaceBridge;
use crate::trace;
use crate::transport::{
    ChannelPostMessage, ChannelSurface, PostMessageTransport, ScriptInjectionTransport,
};

#[derive(Debug, Clone, Default)]
pub struct LoopbackOptions {
    pub handshake: HandshakeConfig,
    pub outbox: OutboxConfig,
    /// Write `host.log` and `surface.log` wire traces here.
    pub trace_dir: Option<PathBuf>,
}

struct Page {
    bridge: Arc<SurfaceBridge>,
    pump: JoinHandle<()>,
}

pub struct Loopback {
    host: Arc<HostBridge>,
    surface: Arc<ChannelSurface>,
    channel: ChannelPostMessage,
    options: LoopbackOptions,
    runtime: Handle,
    host_pump: JoinHandle<()>,
    page: Mutex<Option<Page>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Feed raw inbound text into `hub` until the sender side closes.
fn spawn_pump<In, Out>(
    runtime: &Handle,
    hub: Arc<MessageHub<In, Out>>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()>
where
    In: BridgeMessage,
    Out: BridgeMessage,
{
    runtime.spawn(async move {
        while let Some(data) = inbound.recv().await {
            hub.dispatch(&data);
        }
        log::debug!("{} pump stopped", hub.name());
    })
}

impl Loopback {
    /// Build and start the host side. No page is loaded yet.
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        auth: Arc<dyn AuthProvider>,
        options: LoopbackOptions,
        runtime: Handle,
    ) -> Self {
        let surface = Arc::new(ChannelSurface::new());
        let (channel, host_inbound) = ChannelPostMessage::pair();

        let host_hub = Arc::new(
            HostHub::new("host")
                .with_trace(trace::open_trace_file(options.trace_dir.as_deref(), "host")),
        );
        host_hub.initialize(Arc::new(ScriptInjectionTransport::new(Arc::clone(&surface))));

        let host = HostBridge::new(
            Arc::clone(&host_hub),
            credentials,
            auth,
            options.handshake.clone(),
            runtime.clone(),
        );
        host.start();
        let host_pump = spawn_pump(&runtime, host_hub, host_inbound);

        Self {
            host,
            surface,
            channel,
            options,
            runtime,
            host_pump,
            page: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &Arc<HostBridge> {
        &self.host
    }

    /// The bridge of the currently loaded page.
    pub fn surface(&self) -> Option<Arc<SurfaceBridge>> {
        lock(&self.page).as_ref().map(|page| Arc::clone(&page.bridge))
    }

    /// Load a fresh page, discarding the previous one, and announce ready.
    pub fn load_page(&self) -> Arc<SurfaceBridge> {
        self.unload_page();

        let hub = Arc::new(
            SurfaceHub::new("surface")
                .with_trace(trace::open_trace_file(self.options.trace_dir.as_deref(), "surface")),
        );
        hub.initialize(Arc::new(PostMessageTransport::new(self.channel.clone())));

        let bridge = SurfaceBridge::new(
            Arc::clone(&hub),
            self.options.outbox.clone(),
            self.runtime.clone(),
        );
        bridge.start();

        let pump = spawn_pump(&self.runtime, hub, self.surface.attach());
        *lock(&self.page) = Some(Page {
            bridge: Arc::clone(&bridge),
            pump,
        });

        bridge.announce_ready();
        bridge
    }

    /// Drop the current page. Host messages sent meanwhile are lost.
    pub fn unload_page(&self) {
        self.surface.detach();
        if let Some(page) = lock(&self.page).take() {
            page.bridge.shutdown();
            page.pump.abort();
        }
    }

    pub fn shutdown(&self) {
        self.unload_page();
        self.host.shutdown();
        self.host_pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MemorySecureStore, SecureCredentialStore, StaticAuthProvider};
    use crate::handshake::HandshakeState;
    use std::time::Duration;
    use tempfile::tempdir;

    fn loopback(options: LoopbackOptions) -> Loopback {
        Loopback::new(
            Arc::new(SecureCredentialStore::new(MemorySecureStore::new())),
            Arc::new(StaticAuthProvider::new("u1", chrono::Duration::hours(1))),
            options,
            Handle::current(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn page_load_replaces_surface() {
        let lb = loopback(LoopbackOptions::default());
        assert!(lb.surface().is_none());

        let first = lb.load_page();
        let second = lb.load_page();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!first.hub().is_bound());
        assert!(second.hub().is_bound());
    }

    #[tokio::test(start_paused = true)]
    async fn login_round_trip() {
        let lb = loopback(LoopbackOptions::default());
        let page = lb.load_page();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(lb.host().state(), HandshakeState::NoSessionNeeded);

        page.request_login("google");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            page.current_session().map(|s| s.provider_id),
            Some("google".to_string())
        );
        assert!(page.outbox().pending().is_empty());
        assert_eq!(lb.host().state(), HandshakeState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_trace_files() {
        let dir = tempdir().unwrap();
        let lb = loopback(LoopbackOptions {
            trace_dir: Some(dir.path().to_path_buf()),
            ..LoopbackOptions::default()
        });
        lb.load_page();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let host_log = std::fs::read_to_string(dir.path().join("host.log")).unwrap();
        assert!(host_log.contains("SURFACE->HOST"));
        assert!(host_log.contains("SURFACE_READY"));
        let surface_log = std::fs::read_to_string(dir.path().join("surface.log")).unwrap();
        assert!(surface_log.contains("SURFACE_READY"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unbinds_both_sides() {
        let lb = loopback(LoopbackOptions::default());
        let page = lb.load_page();

        lb.shutdown();

        assert!(lb.surface().is_none());
        assert!(!page.hub().is_bound());
        assert!(!lb.host().hub().is_bound());
    }
}

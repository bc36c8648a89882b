//! Host side of the bridge.
//!
//! Wires the host hub to the credential store, the auth provider and the
//! session handshake. Inbound commands are acknowledged by correlation id and
//! executed at most once; session changes in the credential store are pushed
//! to the surface as they happen.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::HandshakeConfig;
use crate::credentials::{AuthProvider, CredentialStore};
use crate::error::{AuthError, BridgeError, HandlerError};
use crate::handshake::{HandshakeState, SessionHandshake};
use crate::hub::{HostHub, Subscription};
use crate::messages::{HostMessage, SurfaceMessage, SurfaceMessageKind};
use crate::session::SessionSnapshot;

/// How many recent command ids are remembered for de-duplication.
const RECENT_COMMAND_CAPACITY: usize = 256;

/// Bounded set of recently seen correlation ids, oldest evicted first.
struct RecentCommands {
    order: VecDeque<String>,
    seen: HashSet<String>,
    capacity: usize,
}

impl RecentCommands {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`. Returns false if it was already seen.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

pub struct HostBridge {
    hub: Arc<HostHub>,
    handshake: Arc<SessionHandshake>,
    credentials: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthProvider>,
    runtime: Handle,
    subscriptions: Mutex<Vec<Subscription>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    recent_commands: Mutex<RecentCommands>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl HostBridge {
    pub fn new(
        hub: Arc<HostHub>,
        credentials: Arc<dyn CredentialStore>,
        auth: Arc<dyn AuthProvider>,
        config: HandshakeConfig,
        runtime: Handle,
    ) -> Arc<Self> {
        let handshake = SessionHandshake::new(&hub, config, runtime.clone());
        Arc::new(Self {
            hub,
            handshake,
            credentials,
            auth,
            runtime,
            subscriptions: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            recent_commands: Mutex::new(RecentCommands::new(RECENT_COMMAND_CAPACITY)),
        })
    }

    pub fn hub(&self) -> &Arc<HostHub> {
        &self.hub
    }

    pub fn handshake(&self) -> &Arc<SessionHandshake> {
        &self.handshake
    }

    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    pub fn is_syncing(&self) -> bool {
        self.handshake.state().is_syncing()
    }

    /// Register inbound handlers and start following credential changes.
    ///
    /// Calling `start` twice replaces the previous registrations.
    pub fn start(self: &Arc<Self>) {
        self.stop_handlers();

        let weak = Arc::downgrade(self);
        let mut subscriptions = Vec::new();

        subscriptions.push(self.hub.on(SurfaceMessageKind::SurfaceReady, {
            let weak = weak.clone();
            move |_: &SurfaceMessage| {
                let bridge = upgrade(&weak)?;
                log::info!("surface ready");
                bridge
                    .handshake
                    .surface_ready(Arc::clone(&bridge.credentials));
                Ok(())
            }
        }));

        subscriptions.push(self.hub.on(SurfaceMessageKind::SessionSyncAck, {
            let weak = weak.clone();
            move |_: &SurfaceMessage| {
                upgrade(&weak)?.handshake.ack_received();
                Ok(())
            }
        }));

        for kind in [
            SurfaceMessageKind::RequestLogin,
            SurfaceMessageKind::RequestLogout,
            SurfaceMessageKind::RequestTokenRefresh,
        ] {
            let weak = weak.clone();
            subscriptions.push(self.hub.on(kind, move |message| {
                let bridge = upgrade(&weak)?;
                bridge.handle_command(message);
                Ok(())
            }));
        }

        *lock(&self.subscriptions) = subscriptions;

        let listener = self.runtime.spawn(follow_session_changes(
            weak,
            self.credentials.subscribe(),
        ));
        if let Some(previous) = lock(&self.listener).replace(listener) {
            previous.abort();
        }
    }

    fn stop_handlers(&self) {
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
    }

    /// Ack and run a command, unless this correlation id already ran.
    fn handle_command(self: &Arc<Self>, message: &SurfaceMessage) {
        if let Some(id) = message.correlation_id() {
            self.hub.send(&HostMessage::command_ack(id));
            if !lock(&self.recent_commands).insert(id) {
                log::debug!("ignoring redelivered command {}", id);
                return;
            }
        }

        let this = Arc::clone(self);
        match message {
            SurfaceMessage::RequestLogin(payload) => {
                let provider_id = payload.provider_id.clone();
                self.runtime.spawn(async move { this.login(provider_id).await });
            }
            SurfaceMessage::RequestLogout(_) => {
                self.runtime.spawn(async move {
                    if let Err(e) = this.logout().await {
                        log::error!("logout failed: {}", e);
                    }
                });
            }
            SurfaceMessage::RequestTokenRefresh(_) => {
                self.runtime.spawn(async move { this.refresh().await });
            }
            SurfaceMessage::SurfaceReady(_) | SurfaceMessage::SessionSyncAck(_) => {}
        }
    }

    /// Run a login flow and store the result. The push follows from the
    /// credential store's change notification.
    pub async fn login(&self, provider_id: String) {
        log::info!("login requested for {}", provider_id);
        let result = match self.auth.login(&provider_id).await {
            Ok(snapshot) => self
                .credentials
                .save_session(&snapshot)
                .await
                .map_err(BridgeError::from),
            Err(e) => Err(BridgeError::from(e)),
        };
        if let Err(e) = result {
            log::warn!("login with {} failed: {}", provider_id, e);
            self.hub
                .send(&HostMessage::session_error(e.to_string(), Some(provider_id)));
        }
    }

    /// Refresh the current session and store the result.
    pub async fn refresh(&self) {
        let current = match self.credentials.get_session().await {
            Ok(Some(current)) => current,
            Ok(None) => {
                log::warn!("token refresh requested without a session");
                self.hub
                    .send(&HostMessage::session_error(AuthError::NoSession.to_string(), None));
                return;
            }
            Err(e) => {
                log::warn!("failed to read session for refresh: {}", e);
                self.hub.send(&HostMessage::session_error(e.to_string(), None));
                return;
            }
        };

        let provider_id = current.provider_id.clone();
        let result = match self.auth.refresh(&current).await {
            Ok(snapshot) => self
                .credentials
                .save_session(&snapshot)
                .await
                .map_err(BridgeError::from),
            Err(e) => Err(BridgeError::from(e)),
        };
        if let Err(e) = result {
            log::warn!("token refresh failed: {}", e);
            self.hub
                .send(&HostMessage::session_error(e.to_string(), Some(provider_id)));
        }
    }

    /// Push a session obtained outside the bridge's own login flow.
    pub fn session_established(&self, snapshot: SessionSnapshot) {
        self.handshake.session_established(snapshot);
    }

    /// Clear the surface first, then sign out of the credential store.
    pub async fn logout(&self) -> Result<(), BridgeError> {
        log::info!("logging out");
        self.handshake.session_cleared();
        self.credentials.sign_out().await?;
        Ok(())
    }

    /// Unregister handlers, stop following the store and release the hub.
    pub fn shutdown(&self) {
        self.stop_handlers();
        if let Some(listener) = lock(&self.listener).take() {
            listener.abort();
        }
        self.hub.destroy();
        log::debug!("host bridge shut down");
    }
}

fn upgrade(weak: &Weak<HostBridge>) -> Result<Arc<HostBridge>, HandlerError> {
    weak.upgrade()
        .ok_or_else(|| HandlerError::new("host bridge dropped"))
}

async fn follow_session_changes(
    weak: Weak<HostBridge>,
    mut changes: tokio::sync::broadcast::Receiver<Option<SessionSnapshot>>,
) {
    loop {
        let change = match changes.recv().await {
            Ok(change) => change,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("missed {} session changes", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let Some(bridge) = weak.upgrade() else {
            break;
        };

        match change {
            Some(snapshot) => bridge.handshake.session_established(snapshot),
            // A logout through the bridge already told the surface.
            None => match bridge.handshake.state() {
                HandshakeState::SessionPushed
                | HandshakeState::Synced
                | HandshakeState::Degraded => bridge.handshake.session_cleared(),
                HandshakeState::AwaitingReady | HandshakeState::NoSessionNeeded => {}
            },
        }
    }
    log::debug!("stopped following session changes");
}

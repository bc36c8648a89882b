//! Surface side of the bridge.
//!
//! Keeps the surface's local session copy in step with whatever the host
//! last sent, and routes user intents back to the host as commands.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::OutboxConfig;
use crate::error::HandlerError;
use crate::hub::{Subscription, SurfaceHub};
use crate::messages::{HostMessage, HostMessageKind, SurfaceMessage};
use crate::outbox::CommandOutbox;
use crate::session::{SessionSnapshot, SurfaceSession};

pub struct SurfaceBridge {
    hub: Arc<SurfaceHub>,
    outbox: Arc<CommandOutbox>,
    session: watch::Sender<SurfaceSession>,
    subscriptions: Mutex<Vec<Subscription>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn upgrade(weak: &Weak<SurfaceBridge>) -> Result<Arc<SurfaceBridge>, HandlerError> {
    weak.upgrade()
        .ok_or_else(|| HandlerError::new("surface bridge dropped"))
}

impl SurfaceBridge {
    pub fn new(hub: Arc<SurfaceHub>, config: OutboxConfig, runtime: Handle) -> Arc<Self> {
        let outbox = CommandOutbox::new(&hub, config, runtime);
        let (session, _) = watch::channel(SurfaceSession::new());
        Arc::new(Self {
            hub,
            outbox,
            session,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    pub fn hub(&self) -> &Arc<SurfaceHub> {
        &self.hub
    }

    pub fn outbox(&self) -> &Arc<CommandOutbox> {
        &self.outbox
    }

    /// Copy of the local session state.
    pub fn session(&self) -> SurfaceSession {
        self.session.borrow().clone()
    }

    pub fn current_session(&self) -> Option<SessionSnapshot> {
        self.session.borrow().current().cloned()
    }

    /// Follow local session changes.
    pub fn subscribe(&self) -> watch::Receiver<SurfaceSession> {
        self.session.subscribe()
    }

    /// Register inbound handlers. Calling `start` twice replaces the previous
    /// registrations.
    pub fn start(self: &Arc<Self>) {
        self.stop_handlers();

        let weak = Arc::downgrade(self);
        let mut subscriptions = Vec::with_capacity(4);

        subscriptions.push(self.hub.on(HostMessageKind::SessionToken, {
            let weak = weak.clone();
            move |message: &HostMessage| {
                let HostMessage::SessionToken(snapshot) = message else {
                    return Ok(());
                };
                let bridge = upgrade(&weak)?;
                log::info!("received session for {}", snapshot.subject_id);
                let snapshot = snapshot.clone();
                bridge.session.send_modify(|session| session.apply(snapshot));
                bridge.hub.send(&SurfaceMessage::session_sync_ack());
                Ok(())
            }
        }));

        subscriptions.push(self.hub.on(HostMessageKind::SessionCleared, {
            let weak = weak.clone();
            move |_: &HostMessage| {
                let bridge = upgrade(&weak)?;
                log::info!("session cleared by host");
                bridge.session.send_modify(|session| session.clear());
                Ok(())
            }
        }));

        subscriptions.push(self.hub.on(HostMessageKind::SessionError, {
            let weak = weak.clone();
            move |message: &HostMessage| {
                let HostMessage::SessionError(payload) = message else {
                    return Ok(());
                };
                let bridge = upgrade(&weak)?;
                log::warn!(
                    "host reported session error ({}): {}",
                    payload.provider_id.as_deref().unwrap_or("no provider"),
                    payload.error
                );
                let error = payload.error.clone();
                bridge
                    .session
                    .send_modify(|session| session.record_error(error));
                Ok(())
            }
        }));

        subscriptions.push(self.hub.on(HostMessageKind::CommandAck, {
            move |message: &HostMessage| {
                let HostMessage::CommandAck(payload) = message else {
                    return Ok(());
                };
                upgrade(&weak)?.outbox.acknowledge(&payload.correlation_id);
                Ok(())
            }
        }));

        *lock(&self.subscriptions) = subscriptions;
    }

    fn stop_handlers(&self) {
        for subscription in lock(&self.subscriptions).drain(..) {
            subscription.unsubscribe();
        }
    }

    /// Tell the host this page is listening. Call once per page load.
    pub fn announce_ready(&self) -> bool {
        self.hub.send(&SurfaceMessage::surface_ready())
    }

    /// Ask the host to log in; returns the command's correlation id.
    pub fn request_login(&self, provider_id: impl Into<String>) -> Option<String> {
        self.outbox
            .submit(SurfaceMessage::request_login(provider_id))
    }

    pub fn request_logout(&self) -> Option<String> {
        self.outbox.submit(SurfaceMessage::request_logout())
    }

    pub fn request_token_refresh(&self) -> Option<String> {
        self.outbox.submit(SurfaceMessage::request_token_refresh())
    }

    /// Unregister handlers, drop pending commands and release the hub.
    pub fn shutdown(&self) {
        self.stop_handlers();
        self.outbox.cancel_all();
        self.hub.destroy();
    }
}

//! Host-side session handshake.
//!
//! ```text
//!                 ready, session            ack + settle
//!  AwaitingReady ────────────────► SessionPushed ──────────► Synced
//!        │                            │    ▲                   │
//!        │ ready, no session          │    └── login/refresh ──┘
//!        │ (or read failed)           │ no ack after the retry budget
//!        ▼                            ▼
//!  NoSessionNeeded                 Degraded
//! ```
//!
//! A login, refresh, clear or reset starts a new generation. Delayed work
//! remembers the generation it was started for and does nothing once a newer
//! one exists, so a stale timer can never push an old session or mark a
//! superseded handshake as synced. A surface ready joins the current
//! generation instead, so readies in quick succession each get their own push.
//! Delayed sends also give up when the hub is gone or no longer bound to a
//! surface.
//!
//! An ack confirms the latest push of the current generation. It is accepted
//! in `SessionPushed` and also in `Degraded`, where it means a slow surface
//! did apply the session after all.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::config::HandshakeConfig;
use crate::credentials::CredentialStore;
use crate::hub::HostHub;
use crate::messages::{BridgeMessage, HostMessage};
use crate::session::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    AwaitingReady,
    SessionPushed,
    Synced,
    NoSessionNeeded,
    /// A pushed session was never acknowledged. Treated as not syncing so the
    /// UI never blocks on it.
    Degraded,
}

impl HandshakeState {
    /// Whether a "syncing" indicator should be shown.
    pub fn is_syncing(&self) -> bool {
        matches!(self, HandshakeState::SessionPushed)
    }
}

struct Attempt {
    generation: u64,
    /// Whether an ack arrived since the latest push.
    acked: bool,
}

pub struct SessionHandshake {
    config: HandshakeConfig,
    hub: Weak<HostHub>,
    runtime: Handle,
    attempt: Mutex<Attempt>,
    state: watch::Sender<HandshakeState>,
}

impl SessionHandshake {
    pub fn new(hub: &Arc<HostHub>, config: HandshakeConfig, runtime: Handle) -> Arc<Self> {
        let (state, _) = watch::channel(HandshakeState::AwaitingReady);
        Arc::new(Self {
            config,
            hub: Arc::downgrade(hub),
            runtime,
            attempt: Mutex::new(Attempt {
                generation: 0,
                acked: false,
            }),
            state,
        })
    }

    pub fn state(&self) -> HandshakeState {
        *self.state.borrow()
    }

    /// Follow state changes, e.g. to drive a loading indicator.
    pub fn watch(&self) -> watch::Receiver<HandshakeState> {
        self.state.subscribe()
    }

    /// Resolve once the state is `want`, immediately if it already is.
    pub async fn wait_for_state(&self, want: HandshakeState) {
        let mut states = self.state.subscribe();
        // `self` holds the sender, so the channel cannot close while we wait.
        let _ = states.wait_for(|state| *state == want).await;
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Current generation; bumps on every login, refresh, clear or reset.
    pub fn generation(&self) -> u64 {
        self.lock_attempt().generation
    }

    fn lock_attempt(&self) -> MutexGuard<'_, Attempt> {
        self.attempt
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: HandshakeState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("handshake {:?} -> {:?}", previous, state);
        }
    }

    /// Start a new generation and return it.
    fn begin(&self) -> u64 {
        let mut attempt = self.lock_attempt();
        attempt.generation += 1;
        attempt.acked = false;
        attempt.generation
    }

    /// Move to `state` only if `generation` is still current.
    fn set_state_if_current(&self, generation: u64, state: HandshakeState) -> bool {
        let attempt = self.lock_attempt();
        if attempt.generation != generation {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Send through the hub if it still exists and is bound.
    fn send(&self, message: &HostMessage) -> bool {
        match self.hub.upgrade() {
            Some(hub) if hub.is_bound() => hub.send(message),
            _ => {
                log::debug!("handshake target released, dropping {}", message.kind());
                false
            }
        }
    }

    /// The surface announced it is ready (first load or reload).
    ///
    /// Reads the current session and, if there is one, pushes it after the
    /// configured push delay. Every ready starts its own push; no
    /// de-duplication is attempted, and a later ready never cancels an
    /// earlier one. Only a clear, a new login or a reset does.
    pub fn surface_ready(self: &Arc<Self>, credentials: Arc<dyn CredentialStore>) {
        let generation = self.generation();
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            let session = match credentials.get_session().await {
                Ok(session) => session,
                Err(e) => {
                    log::warn!("failed to read session for surface ready: {}", e);
                    None
                }
            };

            match session {
                Some(snapshot) => {
                    if this.set_state_if_current(generation, HandshakeState::SessionPushed) {
                        let delay = this.config.push_delay;
                        this.push_until_acked(generation, snapshot, delay).await;
                    }
                }
                None => {
                    if this.set_state_if_current(generation, HandshakeState::NoSessionNeeded) {
                        log::info!("surface ready, no session to push");
                    }
                }
            }
        });
    }

    /// A new session exists on the host (login, refresh). Pushes immediately.
    pub fn session_established(self: &Arc<Self>, snapshot: SessionSnapshot) {
        let generation = self.begin();
        self.set_state(HandshakeState::SessionPushed);
        let this = Arc::clone(self);
        self.runtime.spawn(async move {
            this.push_until_acked(generation, snapshot, Duration::ZERO)
                .await;
        });
    }

    /// The host's session is gone. Tells the surface immediately.
    pub fn session_cleared(&self) {
        self.begin();
        self.set_state(HandshakeState::NoSessionNeeded);
        self.send(&HostMessage::session_cleared());
    }

    /// The surface acknowledged a pushed session.
    pub fn ack_received(self: &Arc<Self>) {
        let generation = {
            let mut attempt = self.lock_attempt();
            let state = self.state();
            if !matches!(state, HandshakeState::SessionPushed | HandshakeState::Degraded) {
                log::debug!("ignoring sync ack in state {:?}", state);
                return;
            }
            if attempt.acked {
                log::debug!("ignoring duplicate sync ack");
                return;
            }
            if state == HandshakeState::Degraded {
                log::info!("late sync ack, surface applied the session after all");
            }
            attempt.acked = true;
            attempt.generation
        };

        let this = Arc::clone(self);
        let settle = self.config.settle_delay;
        self.runtime.spawn(async move {
            if !settle.is_zero() {
                tokio::time::sleep(settle).await;
            }
            // A push sent during the settle delay waits for its own ack.
            let attempt = this.lock_attempt();
            if attempt.generation == generation && attempt.acked {
                this.set_state(HandshakeState::Synced);
                log::info!("surface session synced");
            }
        });
    }

    /// Forget the current handshake, e.g. when the surface starts loading a
    /// new page and has not announced itself yet.
    pub fn reset(&self) {
        self.begin();
        self.set_state(HandshakeState::AwaitingReady);
    }

    async fn push_until_acked(&self, generation: u64, snapshot: SessionSnapshot, delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let message = HostMessage::session_token(snapshot);
        for attempt in 0..self.config.max_push_attempts {
            {
                let mut current = self.lock_attempt();
                if current.generation != generation || (attempt > 0 && current.acked) {
                    return;
                }
                current.acked = false;
            }
            if attempt > 0 {
                log::info!("no sync ack yet, re-pushing session (attempt {})", attempt + 1);
            }
            if !self.send(&message) {
                return;
            }
            tokio::time::sleep(self.config.ack_retry.delay_for_attempt(attempt)).await;
        }

        let attempt = self.lock_attempt();
        if attempt.generation == generation && !attempt.acked {
            log::warn!(
                "surface never acknowledged session after {} pushes",
                self.config.max_push_attempts
            );
            self.set_state(HandshakeState::Degraded);
        }
    }
}

//! At-least-once delivery for surface commands.
//!
//! Every command gets a fresh correlation id and is re-sent with capped
//! exponential backoff until the host answers with `COMMAND_ACK` or the
//! attempt budget runs out. The host de-duplicates by correlation id, so a
//! resend never runs a command twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::runtime::Handle;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::hub::SurfaceHub;
use crate::messages::{BridgeMessage, SurfaceMessage};

pub struct CommandOutbox {
    hub: Weak<SurfaceHub>,
    config: OutboxConfig,
    runtime: Handle,
    pending: Mutex<HashMap<String, SurfaceMessage>>,
}

impl CommandOutbox {
    pub fn new(hub: &Arc<SurfaceHub>, config: OutboxConfig, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            hub: Arc::downgrade(hub),
            config,
            runtime,
            pending: Mutex::new(HashMap::new()),
        })
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<String, SurfaceMessage>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `command` and keep re-sending until acknowledged.
    ///
    /// Returns the correlation id. Non-command messages have nothing to
    /// acknowledge them; they are sent once and `None` is returned.
    pub fn submit(self: &Arc<Self>, command: SurfaceMessage) -> Option<String> {
        if !command.is_command() {
            self.send(&command);
            return None;
        }

        let correlation_id = Uuid::new_v4().to_string();
        let command = command.with_correlation_id(correlation_id.clone());
        self.lock_pending()
            .insert(correlation_id.clone(), command.clone());

        let this = Arc::clone(self);
        let id = correlation_id.clone();
        self.runtime.spawn(async move {
            this.deliver_until_acked(id, command).await;
        });

        Some(correlation_id)
    }

    /// Resolve a pending command. Returns false for unknown or already
    /// resolved ids.
    pub fn acknowledge(&self, correlation_id: &str) -> bool {
        let resolved = self.lock_pending().remove(correlation_id).is_some();
        if resolved {
            log::debug!("command {} acknowledged", correlation_id);
        } else {
            log::debug!("ignoring ack for unknown command {}", correlation_id);
        }
        resolved
    }

    pub fn is_pending(&self, correlation_id: &str) -> bool {
        self.lock_pending().contains_key(correlation_id)
    }

    /// Correlation ids still waiting for an ack.
    pub fn pending(&self) -> Vec<String> {
        self.lock_pending().keys().cloned().collect()
    }

    /// Stop retrying everything.
    pub fn cancel_all(&self) {
        let dropped = {
            let mut pending = self.lock_pending();
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        if dropped > 0 {
            log::debug!("cancelled {} pending commands", dropped);
        }
    }

    fn send(&self, message: &SurfaceMessage) -> bool {
        match self.hub.upgrade() {
            Some(hub) => hub.send(message),
            None => {
                log::debug!("surface hub released, dropping {}", message.kind());
                false
            }
        }
    }

    async fn deliver_until_acked(&self, correlation_id: String, command: SurfaceMessage) {
        for attempt in 0..self.config.max_attempts {
            if !self.is_pending(&correlation_id) {
                return;
            }
            if attempt > 0 {
                log::info!(
                    "resending {} {} (attempt {})",
                    command.kind(),
                    correlation_id,
                    attempt + 1
                );
            }
            self.send(&command);
            tokio::time::sleep(self.config.retry.delay_for_attempt(attempt)).await;
        }

        if self.lock_pending().remove(&correlation_id).is_some() {
            log::warn!(
                "giving up on {} {} after {} attempts",
                command.kind(),
                correlation_id,
                self.config.max_attempts
            );
        }
    }
}

//! Per-side message hub.
//!
//! The same hub runs on both sides of the bridge with the message types
//! swapped: the host hub receives [`SurfaceMessage`]s and sends
//! [`HostMessage`]s, the surface hub the reverse.
//!
//! Dispatch is synchronous. For one inbound message every handler registered
//! for its kind runs in registration order, then every global handler. Each
//! handler runs in its own failure boundary: an `Err` or a panic is logged and
//! the remaining handlers still run. Nothing raised by a handler or by a
//! malformed payload escapes `dispatch`.
//!
//! The handler list is snapshotted before invocation and no lock is held while
//! handlers run, so a handler may subscribe or unsubscribe (itself included).
//! Such changes apply from the next dispatch on.
//!
//! [`SurfaceMessage`]: crate::messages::SurfaceMessage
//! [`HostMessage`]: crate::messages::HostMessage

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::codec;
use crate::error::HandlerError;
use crate::messages::{BridgeMessage, HostMessage, SurfaceMessage};
use crate::trace::{self, TraceHandle};
use crate::transport::Transport;

/// A registered message callback.
pub type Handler<M> = Arc<dyn Fn(&M) -> Result<(), HandlerError> + Send + Sync>;

/// Hub running inside the host: receives surface messages, sends host messages.
pub type HostHub = MessageHub<SurfaceMessage, HostMessage>;

/// Hub running inside the surface: receives host messages, sends surface messages.
pub type SurfaceHub = MessageHub<HostMessage, SurfaceMessage>;

struct Registry<M: BridgeMessage> {
    next_id: u64,
    by_kind: HashMap<M::Kind, Vec<(u64, Handler<M>)>>,
    global: Vec<(u64, Handler<M>)>,
}

impl<M: BridgeMessage> Registry<M> {
    fn new() -> Self {
        Self {
            next_id: 0,
            by_kind: HashMap::new(),
            global: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn remove(&mut self, id: u64) {
        for handlers in self.by_kind.values_mut() {
            handlers.retain(|(handler_id, _)| *handler_id != id);
        }
        self.by_kind.retain(|_, handlers| !handlers.is_empty());
        self.global.retain(|(handler_id, _)| *handler_id != id);
    }

    fn count(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum::<usize>() + self.global.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`MessageHub::on`] and [`MessageHub::on_all`].
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it. Unsubscribing is
/// idempotent and keeps working after the hub is gone.
#[derive(Clone)]
pub struct Subscription {
    remove: Arc<dyn Fn() + Send + Sync>,
}

impl Subscription {
    fn new<M: BridgeMessage>(registry: Weak<Mutex<Registry<M>>>, id: u64) -> Self {
        Self {
            remove: Arc::new(move || {
                if let Some(registry) = registry.upgrade() {
                    lock(&registry).remove(id);
                }
            }),
        }
    }

    pub fn unsubscribe(&self) {
        (self.remove)()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Pub/sub dispatcher for one side of the bridge.
pub struct MessageHub<In: BridgeMessage, Out: BridgeMessage> {
    name: &'static str,
    registry: Arc<Mutex<Registry<In>>>,
    transport: Mutex<Option<Arc<dyn Transport<Out>>>>,
    trace: TraceHandle,
}

impl<In: BridgeMessage, Out: BridgeMessage> MessageHub<In, Out> {
    /// Create an unbound hub. `name` prefixes its log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            registry: Arc::new(Mutex::new(Registry::new())),
            transport: Mutex::new(None),
            trace: trace::disabled(),
        }
    }

    /// Record all traffic through this hub to `trace`.
    pub fn with_trace(mut self, trace: TraceHandle) -> Self {
        self.trace = trace;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bind the outbound transport, replacing any previous one.
    pub fn initialize(&self, transport: Arc<dyn Transport<Out>>) {
        *lock(&self.transport) = Some(transport);
        log::debug!("{} hub bound to transport", self.name);
    }

    pub fn is_bound(&self) -> bool {
        lock(&self.transport).is_some()
    }

    /// Register `handler` for one message kind.
    pub fn on<F>(&self, kind: In::Kind, handler: F) -> Subscription
    where
        F: Fn(&In) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler<In> = Arc::new(handler);
        let mut registry = lock(&self.registry);
        let id = registry.allocate_id();
        registry.by_kind.entry(kind).or_default().push((id, handler));
        Subscription::new(Arc::downgrade(&self.registry), id)
    }

    /// Register `handler` for every successfully decoded message.
    pub fn on_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&In) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: Handler<In> = Arc::new(handler);
        let mut registry = lock(&self.registry);
        let id = registry.allocate_id();
        registry.global.push((id, handler));
        Subscription::new(Arc::downgrade(&self.registry), id)
    }

    /// Decode a raw transport payload and dispatch it.
    ///
    /// Returns how many handlers completed without error. Undecodable payloads
    /// are logged and dispatch nothing.
    pub fn dispatch(&self, raw: &str) -> usize {
        trace::trace_line(&self.trace, In::DIRECTION.label(), raw);
        match codec::decode::<In>(raw) {
            Ok(message) => self.emit(&message),
            Err(e) => {
                log::debug!("{} hub ignored undecodable message: {}", self.name, e);
                0
            }
        }
    }

    /// Dispatch an already-typed inbound message.
    pub fn emit(&self, message: &In) -> usize {
        let kind = message.kind();
        let (kind_handlers, global_handlers) = {
            let registry = lock(&self.registry);
            let kind_handlers: Vec<Handler<In>> = registry
                .by_kind
                .get(&kind)
                .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default();
            let global_handlers: Vec<Handler<In>> =
                registry.global.iter().map(|(_, h)| Arc::clone(h)).collect();
            (kind_handlers, global_handlers)
        };

        if kind_handlers.is_empty() && global_handlers.is_empty() {
            log::debug!("{} hub has no handlers for {}", self.name, kind);
            return 0;
        }

        let mut completed = 0;
        for handler in &kind_handlers {
            if self.invoke(handler, message, "handler") {
                completed += 1;
            }
        }
        for handler in &global_handlers {
            if self.invoke(handler, message, "global handler") {
                completed += 1;
            }
        }
        completed
    }

    fn invoke(&self, handler: &Handler<In>, message: &In, role: &str) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                log::error!("{} hub {} error for {}: {}", self.name, role, message.kind(), e);
                false
            }
            Err(payload) => {
                log::error!(
                    "{} hub {} panicked for {}: {}",
                    self.name,
                    role,
                    message.kind(),
                    panic_message(payload.as_ref())
                );
                false
            }
        }
    }

    /// Send through the bound transport.
    ///
    /// Returns `false` without raising when no transport is bound or delivery
    /// could not be attempted.
    pub fn send(&self, message: &Out) -> bool {
        let transport = lock(&self.transport).clone();
        let Some(transport) = transport else {
            log::warn!(
                "{} hub has no transport bound, dropping {}",
                self.name,
                message.kind()
            );
            return false;
        };

        if let Ok(json) = codec::encode(message) {
            trace::trace_line(&self.trace, Out::DIRECTION.label(), &json);
        }

        match transport.deliver(message) {
            Ok(()) => {
                log::debug!("{} hub sent {}", self.name, message.kind());
                true
            }
            Err(e) => {
                log::warn!("{} hub failed to send {}: {}", self.name, message.kind(), e);
                false
            }
        }
    }

    /// Number of registered handlers, global ones included.
    pub fn handler_count(&self) -> usize {
        lock(&self.registry).count()
    }

    /// Remove every registration. The transport stays bound.
    pub fn clear(&self) {
        let mut registry = lock(&self.registry);
        registry.by_kind.clear();
        registry.global.clear();
    }

    /// Remove every registration and release the transport. Later sends are
    /// no-ops.
    pub fn destroy(&self) {
        self.clear();
        *lock(&self.transport) = None;
        log::debug!("{} hub destroyed", self.name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

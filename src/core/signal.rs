//! Typed publish/subscribe channel ("event bus").
//!
//! A [`Signal`] is a process-lifetime event tag whose identity is unique:
//! two signals with the same name are still different signals. Signals are
//! declared per emitting type through a [`SignalSet`], built once in a static
//! and extended by derived types.
//!
//! Every emitting object embeds an [`Emitter`]. Subscribers are held weakly
//! by default, so a callback stops receiving events as soon as its owner
//! drops the last `Arc`; stale entries are pruned lazily on the next emit.
//! Free functions and closures that have no owner can be held strongly.
//!
//! ```rust,ignore
//! use std::sync::LazyLock;
//! use prometheus_orchestrator::core::{Emitter, Payload, Signal, SignalSet};
//!
//! static PING: LazyLock<Signal> = LazyLock::new(|| Signal::typed::<u32>("ping"));
//! static SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| SignalSet::declare(&[&*PING]));
//!
//! let emitter = Emitter::new("pinger", &SIGNALS);
//! emitter.subscribe_strong(&PING, |ev| println!("{:?}", ev.value::<u32>()))?;
//! emitter.emit(&PING, Payload::new(7_u32))?;
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, error};
use uuid::Uuid;

use crate::core::error::BusError;

static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(1);

/// Value carried by an event. Cheap to clone.
#[derive(Clone, Default)]
pub struct Payload(Option<(Arc<dyn Any + Send + Sync>, &'static str)>);

impl Payload {
    /// An empty payload.
    #[must_use]
    pub const fn none() -> Self {
        Self(None)
    }

    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some((Arc::new(value), std::any::type_name::<T>())))
    }

    /// Wrap a shared value without copying it.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some((value, std::any::type_name::<T>())))
    }

    /// True if no value is carried.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Borrow the value if it has type `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|(v, _)| v.downcast_ref::<T>())
    }

    /// Name of the carried type, if any.
    #[must_use]
    pub fn type_name(&self) -> Option<&'static str> {
        self.0.as_ref().map(|(_, n)| *n)
    }

    fn value_type_id(&self) -> Option<TypeId> {
        self.0.as_ref().map(|(v, _)| Any::type_id(&**v))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.type_name() {
            Some(name) => write!(f, "Payload({name})"),
            None => f.write_str("Payload(none)"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Accepts {
    Nothing,
    Anything,
    Type(TypeId, &'static str),
}

/// An identity-unique event tag, optionally constrained by payload type and
/// a predicate.
pub struct Signal {
    id: u64,
    name: &'static str,
    accepts: Accepts,
    check: Option<fn(&Payload) -> bool>,
}

impl Signal {
    fn with_accepts(name: &'static str, accepts: Accepts) -> Self {
        Self {
            id: NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed),
            name,
            accepts,
            check: None,
        }
    }

    /// A signal that carries no payload.
    #[must_use]
    pub fn unit(name: &'static str) -> Self {
        Self::with_accepts(name, Accepts::Nothing)
    }

    /// A signal that accepts any payload (or none).
    #[must_use]
    pub fn any(name: &'static str) -> Self {
        Self::with_accepts(name, Accepts::Anything)
    }

    /// A signal whose payload must be a `T`.
    #[must_use]
    pub fn typed<T: Any>(name: &'static str) -> Self {
        Self::with_accepts(
            name,
            Accepts::Type(TypeId::of::<T>(), std::any::type_name::<T>()),
        )
    }

    /// Add a value predicate.
    #[must_use]
    pub fn with_check(mut self, check: fn(&Payload) -> bool) -> Self {
        self.check = Some(check);
        self
    }

    /// Signal name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Process-unique identity.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Validate a payload against this signal's constraints.
    ///
    /// # Errors
    ///
    /// Returns the matching [`BusError`] payload variant on mismatch.
    pub fn check_value(&self, payload: &Payload) -> Result<(), BusError> {
        match self.accepts {
            Accepts::Nothing if !payload.is_none() => {
                return Err(BusError::UnexpectedPayload(self.name))
            }
            Accepts::Type(expected, type_name) if payload.value_type_id() != Some(expected) => {
                return Err(BusError::PayloadType {
                    signal: self.name,
                    expected: type_name,
                })
            }
            _ => {}
        }
        if let Some(check) = self.check {
            if !check(payload) {
                return Err(BusError::PayloadRejected(self.name));
            }
        }
        Ok(())
    }
}

impl PartialEq for Signal {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Signal {}

impl Hash for Signal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({}#{})", self.name, self.id)
    }
}

/// The signals a type may emit, including the ones it inherits.
#[derive(Debug, Clone, Default)]
pub struct SignalSet {
    signals: Vec<&'static Signal>,
}

impl SignalSet {
    /// Build a root set.
    ///
    /// # Errors
    ///
    /// [`BusError::SignalRedeclared`] if two different signals share a name.
    pub fn new(own: &[&'static Signal]) -> Result<Self, BusError> {
        Self::extend(&Self::default(), own)
    }

    /// Build a derived set: everything in `parent` plus `own`.
    ///
    /// # Errors
    ///
    /// [`BusError::SignalRedeclared`] if `own` reuses a name with a different
    /// identity.
    pub fn extend(parent: &Self, own: &[&'static Signal]) -> Result<Self, BusError> {
        let mut signals = parent.signals.clone();
        for signal in own {
            match signals.iter().find(|s| s.name == signal.name) {
                Some(existing) if existing.id == signal.id => {}
                Some(_) => return Err(BusError::SignalRedeclared(signal.name)),
                None => signals.push(signal),
            }
        }
        Ok(Self { signals })
    }

    /// Static declaration helper for root sets. A bad declaration is a
    /// programming error and panics during static initialization.
    #[must_use]
    pub fn declare(own: &[&'static Signal]) -> Self {
        Self::new(own).unwrap_or_else(|e| panic!("invalid signal declaration: {e}"))
    }

    /// Static declaration helper for derived sets, see [`Self::declare`].
    #[must_use]
    pub fn inherit(parent: &Self, own: &[&'static Signal]) -> Self {
        Self::extend(parent, own).unwrap_or_else(|e| panic!("invalid signal declaration: {e}"))
    }

    /// Membership by identity.
    #[must_use]
    pub fn contains(&self, signal: &Signal) -> bool {
        self.signals.iter().any(|s| s.id == signal.id)
    }

    /// Lookup by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&'static Signal> {
        self.signals.iter().copied().find(|s| s.name == name)
    }

    /// Declared signals in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &'static Signal> + '_ {
        self.signals.iter().copied()
    }

    /// Number of declared signals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// True if nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

/// Identity of an emitting object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    kind: &'static str,
    id: Uuid,
}

impl SourceId {
    /// A fresh identity for an object of the given kind.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            id: Uuid::new_v4(),
        }
    }

    /// Kind label (type of the emitter's owner).
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.kind
    }

    /// Unique id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id.simple())
    }
}

/// A delivered event: (source, signal, value).
#[derive(Debug, Clone)]
pub struct Event {
    /// Emitting object.
    pub source: SourceId,
    /// Emitted signal.
    pub signal: &'static Signal,
    /// Carried value.
    pub payload: Payload,
}

impl Event {
    /// Borrow the payload as `T`.
    #[must_use]
    pub fn value<T: Any>(&self) -> Option<&T> {
        self.payload.get::<T>()
    }

    /// True if this event carries `signal`.
    #[must_use]
    pub fn is(&self, signal: &Signal) -> bool {
        self.signal == signal
    }
}

/// Receiver of events.
pub trait Callback: Send + Sync {
    /// Handle one event. Runs on the emitting thread.
    fn on_event(&self, event: &Event);
}

impl<F> Callback for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event);
    }
}

/// Handle returned by subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

enum Holder {
    Weak(Weak<dyn Callback>),
    Strong(Arc<dyn Callback>),
}

struct Subscriber {
    id: u64,
    holder: Holder,
}

impl Subscriber {
    fn live(&self) -> Option<Arc<dyn Callback>> {
        match &self.holder {
            Holder::Weak(w) => w.upgrade(),
            Holder::Strong(s) => Some(Arc::clone(s)),
        }
    }

    fn is_alive(&self) -> bool {
        match &self.holder {
            Holder::Weak(w) => w.strong_count() > 0,
            Holder::Strong(_) => true,
        }
    }
}

/// Per-object publish/subscribe channel.
pub struct Emitter {
    source: SourceId,
    signals: &'static SignalSet,
    subscribers: RwLock<HashMap<u64, Vec<Subscriber>>>,
    next_subscription: AtomicU64,
}

impl Emitter {
    /// Create an emitter for an object of `kind` that may emit `signals`.
    #[must_use]
    pub fn new(kind: &'static str, signals: &'static SignalSet) -> Self {
        Self {
            source: SourceId::new(kind),
            signals,
            subscribers: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Identity of this emitter.
    #[must_use]
    pub const fn source_id(&self) -> &SourceId {
        &self.source
    }

    /// Signals this emitter may send.
    #[must_use]
    pub const fn signals(&self) -> &'static SignalSet {
        self.signals
    }

    fn ensure_declared(&self, signal: &Signal) -> Result<(), BusError> {
        if self.signals.contains(signal) {
            Ok(())
        } else {
            Err(BusError::UnknownSignal(signal.name))
        }
    }

    /// Validate `payload` and deliver it to every live subscriber of `signal`.
    ///
    /// Callbacks are invoked outside of any internal lock, so they may
    /// subscribe, unsubscribe or emit themselves.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] for undeclared signals, or a payload
    /// validation error.
    pub fn emit(&self, signal: &'static Signal, payload: Payload) -> Result<(), BusError> {
        self.ensure_declared(signal)?;
        signal.check_value(&payload)?;

        let (callbacks, stale) = {
            let subscribers = self.subscribers.read();
            subscribers.get(&signal.id).map_or((Vec::new(), false), |subs| {
                let live: Vec<_> = subs.iter().filter_map(Subscriber::live).collect();
                let stale = live.len() != subs.len();
                (live, stale)
            })
        };

        if stale {
            let mut subscribers = self.subscribers.write();
            if let Some(subs) = subscribers.get_mut(&signal.id) {
                subs.retain(Subscriber::is_alive);
            }
            debug!(source = %self.source, signal = signal.name, "pruned expired subscribers");
        }

        if callbacks.is_empty() {
            return Ok(());
        }

        let event = Event {
            source: self.source.clone(),
            signal,
            payload,
        };
        for callback in callbacks {
            callback.on_event(&event);
        }
        Ok(())
    }

    fn add(&self, signal: &'static Signal, holder: Holder) -> Result<SubscriptionId, BusError> {
        self.ensure_declared(signal)?;
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .entry(signal.id)
            .or_default()
            .push(Subscriber { id, holder });
        Ok(SubscriptionId(id))
    }

    /// Subscribe without extending the callback's lifetime.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] for undeclared signals.
    pub fn subscribe<C>(
        &self,
        signal: &'static Signal,
        callback: &Arc<C>,
    ) -> Result<SubscriptionId, BusError>
    where
        C: Callback + 'static,
    {
        let strong: Arc<dyn Callback> = Arc::clone(callback) as Arc<dyn Callback>;
        self.add(signal, Holder::Weak(Arc::downgrade(&strong)))
    }

    /// Subscribe a free function or closure, keeping it alive until
    /// unsubscribed.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] for undeclared signals.
    pub fn subscribe_strong<C>(
        &self,
        signal: &'static Signal,
        callback: C,
    ) -> Result<SubscriptionId, BusError>
    where
        C: Callback + 'static,
    {
        self.add(signal, Holder::Strong(Arc::new(callback)))
    }

    /// Remove a subscription.
    ///
    /// # Errors
    ///
    /// [`BusError::NoSuchSubscription`] if the id is not subscribed to `signal`.
    pub fn unsubscribe(
        &self,
        signal: &'static Signal,
        subscription: SubscriptionId,
    ) -> Result<(), BusError> {
        let mut subscribers = self.subscribers.write();
        let subs = subscribers.get_mut(&signal.id);
        let position = subs
            .as_ref()
            .and_then(|s| s.iter().position(|x| x.id == subscription.0));
        match (subs, position) {
            (Some(subs), Some(pos)) => {
                subs.remove(pos);
                Ok(())
            }
            _ => Err(BusError::NoSuchSubscription {
                signal: signal.name,
                id: subscription.0,
            }),
        }
    }

    /// Re-emit every `signal` on `target` as `target_signal`, synchronously.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] if either side does not declare its signal.
    pub fn proxy(
        &self,
        signal: &'static Signal,
        target: Arc<Self>,
        target_signal: &'static Signal,
    ) -> Result<SubscriptionId, BusError> {
        target.ensure_declared(target_signal)?;
        self.subscribe_strong(signal, move |event: &Event| {
            if let Err(e) = target.emit(target_signal, event.payload.clone()) {
                error!(
                    signal = target_signal.name,
                    error = %e,
                    "failed to proxy event"
                );
            }
        })
    }

    /// Number of live subscribers of `signal`.
    #[must_use]
    pub fn subscriber_count(&self, signal: &Signal) -> usize {
        self.subscribers
            .read()
            .get(&signal.id)
            .map_or(0, |subs| subs.iter().filter(|s| s.is_alive()).count())
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("source", &self.source)
            .field("signals", &self.signals.len())
            .finish_non_exhaustive()
    }
}

/// An object that emits events through an [`Emitter`].
pub trait SignalSource: Send + Sync {
    /// The object's emitter.
    fn emitter(&self) -> &Emitter;
}

//! Listener registration and synchronous event dispatch
//!
//! Listeners run while the model lock is held. A thread-local marker records
//! which models are currently dispatching on this thread so that a callback
//! touching the same model fails with [`Error::ReentrantAccess`](crate::Error)
//! instead of deadlocking.

use std::cell::RefCell;
use std::sync::Arc;

use serde::Serialize;

use crate::core::types::Revision;
use crate::storage::Element;

/// Kind of change delivered to listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// An element's value was set (on add and on every update)
    ElementChanged,
    /// An element was added to the schema
    SchemaAdded,
    /// An element was removed from the schema
    SchemaRemoved,
    /// An element's schema metadata changed
    SchemaModified,
}

impl EventKind {
    /// Whether this is a schema-level event
    pub fn is_schema(&self) -> bool {
        !matches!(self, EventKind::ElementChanged)
    }
}

/// Change event borrowed from the store during dispatch
#[derive(Debug, Clone, Copy)]
pub enum ModelEvent<'a> {
    /// Value of the element changed
    ElementChanged(&'a Element),
    /// Element was added
    SchemaAdded(&'a Element),
    /// Element was removed; this is its final state
    SchemaRemoved(&'a Element),
    /// Element annotation changed
    SchemaModified(&'a Element),
}

impl<'a> ModelEvent<'a> {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            ModelEvent::ElementChanged(_) => EventKind::ElementChanged,
            ModelEvent::SchemaAdded(_) => EventKind::SchemaAdded,
            ModelEvent::SchemaRemoved(_) => EventKind::SchemaRemoved,
            ModelEvent::SchemaModified(_) => EventKind::SchemaModified,
        }
    }

    /// Element affected by this event
    pub fn element(&self) -> &'a Element {
        match self {
            ModelEvent::ElementChanged(e)
            | ModelEvent::SchemaAdded(e)
            | ModelEvent::SchemaRemoved(e)
            | ModelEvent::SchemaModified(e) => e,
        }
    }

    /// Detach the event from the store so it can outlive the dispatch
    pub fn to_owned_event(&self, revision: Revision) -> OwnedModelEvent {
        OwnedModelEvent {
            kind: self.kind(),
            revision,
            element: self.element().clone(),
        }
    }
}

/// Change event that owns a snapshot of the affected element
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedModelEvent {
    /// Kind of change
    pub kind: EventKind,
    /// Store revision of the mutation that produced the event
    pub revision: Revision,
    /// Element state at the time of the event
    pub element: Element,
}

/// Which event kinds a listener wants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    /// Element value changes
    pub state: bool,
    /// Schema additions, removals and modifications
    pub schema: bool,
}

impl Interest {
    /// Value changes only
    pub const STATE: Interest = Interest { state: true, schema: false };
    /// Schema changes only
    pub const SCHEMA: Interest = Interest { state: false, schema: true };
    /// Everything
    pub const ALL: Interest = Interest { state: true, schema: true };

    /// Whether events of `kind` should be delivered
    pub fn wants(&self, kind: EventKind) -> bool {
        if kind.is_schema() {
            self.schema
        } else {
            self.state
        }
    }
}

/// Observer of model changes
///
/// Callbacks run synchronously inside the mutation, with the model lock held.
/// They must not call back into the same model; use [`EventForwarder`] to
/// defer work until after the lock is released.
pub trait ModelListener: Send + Sync {
    /// Event kinds this listener receives
    fn interest(&self) -> Interest {
        Interest::ALL
    }

    /// Called once per matching event
    fn on_event(&self, event: &ModelEvent<'_>, revision: Revision);
}

/// Handle returned by listener registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Registered listeners of one model
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(ListenerId, Arc<dyn ModelListener>)>,
}

impl ListenerRegistry {
    pub(crate) fn register(&mut self, listener: Arc<dyn ModelListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, listener));
        id
    }

    pub(crate) fn unregister(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver `event` to every interested listener, marking `model_id` as dispatching
    pub(crate) fn dispatch(&self, model_id: u64, event: &ModelEvent<'_>, revision: Revision) {
        if self.listeners.is_empty() {
            return;
        }
        let kind = event.kind();
        let _scope = DispatchScope::enter(model_id);
        for (_, listener) in &self.listeners {
            if listener.interest().wants(kind) {
                listener.on_event(event, revision);
            }
        }
    }
}

thread_local! {
    static DISPATCHING: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

/// Marks a model as dispatching on this thread until dropped
struct DispatchScope {
    model_id: u64,
}

impl DispatchScope {
    fn enter(model_id: u64) -> Self {
        DISPATCHING.with(|d| d.borrow_mut().push(model_id));
        DispatchScope { model_id }
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|d| {
            let mut d = d.borrow_mut();
            if let Some(pos) = d.iter().rposition(|id| *id == self.model_id) {
                d.remove(pos);
            }
        });
    }
}

/// Whether this thread is inside a listener callback of model `model_id`
pub(crate) fn is_dispatching(model_id: u64) -> bool {
    DISPATCHING.with(|d| d.borrow().contains(&model_id))
}

/// Listener that forwards owned events over a channel
///
/// The receiving side runs outside the model lock and may mutate the model
/// freely, which is how deferred mutations are meant to be expressed.
pub struct EventForwarder {
    sender: flume::Sender<OwnedModelEvent>,
    interest: Interest,
}

impl EventForwarder {
    /// Create a forwarder and the receiver its events arrive on
    pub fn channel(interest: Interest) -> (Arc<Self>, flume::Receiver<OwnedModelEvent>) {
        let (sender, receiver) = flume::unbounded();
        (Arc::new(Self { sender, interest }), receiver)
    }
}

impl ModelListener for EventForwarder {
    fn interest(&self) -> Interest {
        self.interest
    }

    fn on_event(&self, event: &ModelEvent<'_>, revision: Revision) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.sender.send(event.to_owned_event(revision));
    }
}

//! Change notification
//!
//! Synchronous listener dispatch for committed mutations and the revision
//! watch used by long-poll consumers.

pub mod listener;
pub mod watch;

pub use listener::{
    EventForwarder, EventKind, Interest, ListenerId, ModelEvent, ModelListener, OwnedModelEvent,
};
pub use watch::{CancelToken, RevisionWatch, WaitOutcome};

//! Element store
//!
//! Owns every element of the model together with the revision counter, the
//! listener set and the guard that serialises access to all of them.

pub mod element;
pub mod store;

pub use element::{Constraint, Element, ElementSpec};
pub use store::{ExposedModel, ModelLock};

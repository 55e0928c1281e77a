//! Document codec
//!
//! Serialises the model into full or delta documents and applies inbound
//! documents back onto it as batches of updates.

pub mod processor;
pub mod types;

pub use types::{ApplyReport, ModelDocument, StateEntry};

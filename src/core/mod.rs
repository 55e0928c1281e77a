//! Core types and foundations
//!
//! Typed values, error handling, configuration and the state shared by the
//! transport handlers.

pub mod app_state;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used items
pub use app_state::AppState;
pub use config::{Config, UnknownKeyPolicy};
pub use error::{Error, Result};
pub use types::{ElementType, ElementValue, Matrix, Revision, Viewer, MATRIX_LEN};

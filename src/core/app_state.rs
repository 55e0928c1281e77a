//! Application state
//!
//! The state handed to every HTTP handler: the shared model and the loaded
//! configuration.

use std::sync::Arc;
use std::time::Instant;

use crate::core::config::Config;
use crate::storage::ExposedModel;

/// State shared by all request handlers
#[derive(Clone)]
pub struct AppState {
    /// The exposed model served to remote observers
    pub model: Arc<ExposedModel>,

    /// Application configuration
    pub config: Arc<Config>,

    /// When the process started serving
    pub started: Instant,
}

impl AppState {
    /// Bundle a model and its configuration
    pub fn new(model: Arc<ExposedModel>, config: Config) -> Self {
        Self {
            model,
            config: Arc::new(config),
            started: Instant::now(),
        }
    }
}

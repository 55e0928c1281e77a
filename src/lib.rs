//! Exposed Model - a shared, revision-tracked state store
//!
//! A single authoritative process exposes a set of typed, optionally
//! constrained values to remote observers. Every committed change bumps a
//! global revision, so an observer holding revision `R` can ask for exactly
//! the elements modified since then and push its own changes back as a
//! document of updates.
//!
//! ```
//! use exposed_model::ExposedModel;
//!
//! let model = ExposedModel::new();
//! model.add_constrained_element("timestep", 40, 2, 42)?;
//! let seen = model.current_revision();
//!
//! model.update_element("timestep", 41)?;
//! let delta = model.delta_document(seen)?;
//! assert!(std::str::from_utf8(&delta).unwrap().contains("timestep"));
//! # Ok::<(), exposed_model::Error>(())
//! ```
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod api;
pub mod delta;
pub mod notify;
pub mod schema;
pub mod storage;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{
    Config, ElementType, ElementValue, Error, Matrix, Result, Revision, UnknownKeyPolicy, Viewer,
};
pub use delta::{ApplyReport, ModelDocument};
pub use notify::{
    CancelToken, EventForwarder, EventKind, Interest, ModelEvent, ModelListener, WaitOutcome,
};
pub use schema::StateSchema;
pub use storage::{Constraint, Element, ElementSpec, ExposedModel, ModelLock};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &crate::core::config::LoggingConfig) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("Invalid log filter: {}", e)))?;

    let installed = match config.format.as_str() {
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .try_init(),
    };
    installed.map_err(|e| Error::config(format!("Failed to install logger: {}", e)))
}

/// Initialise logging and the metrics registry
pub fn init(config: &Config) -> Result<()> {
    init_logging(&config.logging)?;
    tracing::info!("Initializing {} v{}", NAME, VERSION);

    if config.metrics.enable_prometheus {
        system::metrics::init_registry();
    }
    Ok(())
}

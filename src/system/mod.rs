//! Process-level concerns shared by the model and the transport

pub mod metrics;

pub use metrics::{collect_metrics, init_registry, Metrics, Timer};

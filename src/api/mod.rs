//! # API Module
//!
//! HTTP transport for the exposed model.
//!
//! ## Endpoints Overview
//!
//! ### Model Synchronisation
//! - `GET /getExposedModel` - Full document
//! - `GET /getExposedModelUpdate?revision=R[&timeout_ms=T]` - Long-poll for the delta since `R`
//! - `POST /updateState` - Apply a document to the model
//!
//! ### System Essentials
//! - `GET /api/v1/health` - Health check
//! - `GET /api/v1/info` - Server info
//! - `GET /metrics` - Prometheus metrics

pub mod handlers;
pub mod server;

// Re-export commonly used items
pub use handlers::ApiError;
pub use server::{create_app, start_server};

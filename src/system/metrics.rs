//! Metrics collection for the exposed model
//!
//! Prometheus counters and gauges registered once per process in the default
//! registry and served by the HTTP layer on `/metrics`.

use crate::core::error::Result;
use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::time::Instant;

/// Centralized metrics for the model, the codec and long-poll delivery
pub struct Metrics {
    /// Committed mutations, labelled by kind (add, update, remove, annotate)
    pub mutations: IntCounterVec,
    /// Generated documents, labelled by family (full, delta)
    pub documents_generated: IntCounterVec,
    /// Inbound documents applied successfully
    pub documents_applied: IntCounter,
    /// Inbound documents rejected
    pub documents_rejected: IntCounter,
    /// Time spent applying inbound documents
    pub apply_duration: Histogram,
    /// Long-poll waits, labelled by outcome (advanced, timed_out, cancelled)
    pub long_poll: IntCounterVec,
    /// Most recently committed revision
    pub revision: IntGauge,
    /// Number of elements in the model
    pub elements: IntGauge,
}

impl Metrics {
    /// Create and register all metrics
    fn new() -> Result<Self> {
        Ok(Self {
            mutations: register_int_counter_vec!(
                "em_mutations_total",
                "Total number of committed model mutations",
                &["kind"]
            )?,
            documents_generated: register_int_counter_vec!(
                "em_documents_generated_total",
                "Total number of generated model documents",
                &["family"]
            )?,
            documents_applied: register_int_counter!(
                "em_documents_applied_total",
                "Total number of inbound documents applied"
            )?,
            documents_rejected: register_int_counter!(
                "em_documents_rejected_total",
                "Total number of inbound documents rejected"
            )?,
            apply_duration: register_histogram!(
                "em_apply_duration_seconds",
                "Duration of inbound document application in seconds",
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]
            )?,
            long_poll: register_int_counter_vec!(
                "em_long_poll_waits_total",
                "Total number of long-poll waits by outcome",
                &["outcome"]
            )?,
            revision: register_int_gauge!(
                "em_revision",
                "Most recently committed model revision"
            )?,
            elements: register_int_gauge!(
                "em_elements",
                "Number of elements in the model"
            )?,
        })
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Metrics {
        static INSTANCE: Lazy<Metrics> =
            Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
        &INSTANCE
    }
}

/// Timer for measuring operation duration with automatic histogram recording
pub struct Timer {
    start: Instant,
    histogram: Histogram,
}

impl Timer {
    /// Start a new timer
    pub fn start(histogram: &Histogram) -> Self {
        Self {
            start: Instant::now(),
            histogram: histogram.clone(),
        }
    }

    /// Record the elapsed time and consume the timer
    pub fn finish(self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Initialize the metrics registry by creating the global metrics instance
pub fn init_registry() {
    let _ = Metrics::global();
}

/// Collect and return all metrics as a Prometheus-formatted string
pub fn collect_metrics() -> Result<String> {
    let encoder = prometheus::TextEncoder::new();
    Ok(encoder.encode_to_string(&prometheus::gather())?)
}

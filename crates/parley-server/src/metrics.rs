//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const STREAMS_TOTAL: &str = "parley_streams_total";
    pub const STREAMS_ACTIVE: &str = "parley_streams_active";
    pub const EVENTS_STREAMED: &str = "parley_events_streamed_total";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const SESSIONS_TOTAL: &str = "parley_sessions_total";
    pub const TOKENS_ISSUED: &str = "parley_tokens_issued_total";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::STREAMS_TOTAL,
        "Total number of event streams opened since server start"
    );
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Current number of open event streams");
    metrics::describe_counter!(
        names::EVENTS_STREAMED,
        "Total number of events written to streams"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of chat messages sent");
    metrics::describe_counter!(names::SESSIONS_TOTAL, "Total number of sessions started");
    metrics::describe_counter!(names::TOKENS_ISSUED, "Total number of stream tokens issued");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of request errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an opened stream.
pub fn record_stream_opened(via: &'static str) {
    counter!(names::STREAMS_TOTAL, "via" => via).increment(1);
    gauge!(names::STREAMS_ACTIVE).increment(1.0);
}

/// Record a closed stream.
pub fn record_stream_closed() {
    gauge!(names::STREAMS_ACTIVE).decrement(1.0);
}

/// Record an event written to a stream.
pub fn record_event_streamed(kind: &'static str) {
    counter!(names::EVENTS_STREAMED, "kind" => kind).increment(1);
}

/// Bounded label for a client-supplied message type.
#[must_use]
pub fn message_kind_label(kind: Option<&str>) -> &'static str {
    match kind {
        None | Some("" | "plain") => "plain",
        Some(_) => "other",
    }
}

/// Record a sent message.
pub fn record_message(kind: &'static str) {
    counter!(names::MESSAGES_TOTAL, "type" => kind).increment(1);
}

/// Record a started session.
pub fn record_session() {
    counter!(names::SESSIONS_TOTAL).increment(1);
}

/// Record an issued stream token.
pub fn record_token() {
    counter!(names::TOKENS_ISSUED).increment(1);
}

/// Record an error.
pub fn record_error(kind: &'static str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Metrics guard that records the stream closing on drop.
pub struct StreamMetricsGuard;

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording an opened stream.
    #[must_use]
    pub fn new(via: &'static str) -> Self {
        record_stream_opened(via);
        Self
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        record_stream_closed();
    }
}

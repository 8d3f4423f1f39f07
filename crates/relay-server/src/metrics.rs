//! Metrics collection and export for the relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MESSAGES_PUBLISHED: &str = "relay_messages_published_total";
    pub const MESSAGES_DELIVERED: &str = "relay_messages_delivered_total";
    pub const CHANNELS_ACTIVE: &str = "relay_channels_active";
    pub const CHANNELS_CREATED: &str = "relay_channels_created_total";
    pub const CHANNELS_EVICTED: &str = "relay_channels_evicted_total";
    pub const POLLS_PARKED: &str = "relay_polls_parked";
    pub const POLL_TIMEOUTS: &str = "relay_poll_timeouts_total";
    pub const ERRORS_TOTAL: &str = "relay_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MESSAGES_PUBLISHED,
        "Total number of messages published since server start"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Total number of messages handed to subscribers"
    );
    metrics::describe_gauge!(names::CHANNELS_ACTIVE, "Current number of live channels");
    metrics::describe_counter!(names::CHANNELS_CREATED, "Total number of channels created");
    metrics::describe_counter!(
        names::CHANNELS_EVICTED,
        "Total number of channels deleted by garbage collection"
    );
    metrics::describe_gauge!(
        names::POLLS_PARKED,
        "Long-poll requests currently parked on a channel"
    );
    metrics::describe_counter!(
        names::POLL_TIMEOUTS,
        "Long-poll requests that timed out without a message"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a publish and how many parked subscribers it reached.
pub fn record_publish(delivered: usize) {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
    counter!(names::MESSAGES_DELIVERED).increment(delivered as u64);
}

/// Record a message served straight from a channel's history queue.
pub fn record_delivery() {
    counter!(names::MESSAGES_DELIVERED).increment(1);
}

/// Record a channel creation.
pub fn record_channel_created() {
    counter!(names::CHANNELS_CREATED).increment(1);
}

/// Record garbage-collected channels.
pub fn record_evictions(count: usize) {
    counter!(names::CHANNELS_EVICTED).increment(count as u64);
}

/// Record a long poll that expired without a message.
pub fn record_poll_timeout() {
    counter!(names::POLL_TIMEOUTS).increment(1);
}

/// Update the live channel count.
pub fn set_active_channels(count: usize) {
    gauge!(names::CHANNELS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Gauge guard for a parked long poll; decrements on drop.
pub struct ParkedPollGuard;

impl ParkedPollGuard {
    /// Create a new guard, marking one more parked poll.
    #[must_use]
    pub fn new() -> Self {
        gauge!(names::POLLS_PARKED).increment(1.0);
        Self
    }
}

impl Default for ParkedPollGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ParkedPollGuard {
    fn drop(&mut self) {
        gauge!(names::POLLS_PARKED).decrement(1.0);
    }
}

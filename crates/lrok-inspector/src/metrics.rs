//! Prometheus metrics for the inspector.
//!
//! Tracks captured traffic, forwarding failures and subscriber fan-out.
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    /// Exchanges recorded into a capture store
    pub static ref EXCHANGES_CAPTURED_TOTAL: IntCounter = register_int_counter!(
        "lrok_exchanges_captured_total",
        "Total number of request/response exchanges captured"
    )
    .unwrap();

    /// Requests that could not be relayed to the target
    pub static ref FORWARD_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lrok_forward_errors_total",
        "Total number of requests that failed to forward",
        &["kind"]  // kind: request_body|request_timeout|invalid_request|upstream|upstream_timeout|response_body
    )
    .unwrap();

    /// Upstream round trip duration
    pub static ref UPSTREAM_DURATION_MS: HistogramVec = register_histogram_vec!(
        "lrok_upstream_duration_ms",
        "Duration of upstream round trips in milliseconds",
        &["method"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap();

    /// Deliveries skipped because a subscriber channel was full
    pub static ref SUBSCRIBER_DROPS_TOTAL: IntCounter = register_int_counter!(
        "lrok_subscriber_drops_total",
        "Total number of exchanges dropped for slow subscribers"
    )
    .unwrap();

    /// Currently registered subscribers across all broadcasters
    pub static ref ACTIVE_SUBSCRIBERS: IntGauge = register_int_gauge!(
        "lrok_active_subscribers",
        "Number of live exchange subscribers"
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_capture() {
    EXCHANGES_CAPTURED_TOTAL.inc();
}

pub fn record_forward_error(kind: &str) {
    FORWARD_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn record_upstream_duration(method: &str, duration_ms: f64) {
    UPSTREAM_DURATION_MS
        .with_label_values(&[method])
        .observe(duration_ms);
}

pub fn record_subscriber_drops(count: usize) {
    if count > 0 {
        SUBSCRIBER_DROPS_TOTAL.inc_by(count as u64);
    }
}

pub fn subscriber_added() {
    ACTIVE_SUBSCRIBERS.inc();
}

pub fn subscriber_removed() {
    ACTIVE_SUBSCRIBERS.dec();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_metrics_after_recording() {
        record_capture();
        record_forward_error("upstream");
        record_upstream_duration("GET", 12.5);
        record_subscriber_drops(2);

        let output = collect_metrics();
        assert!(output.contains("lrok_exchanges_captured_total"));
        assert!(output.contains("lrok_forward_errors_total"));
        assert!(output.contains("kind=\"upstream\""));
        assert!(output.contains("lrok_upstream_duration_ms"));
        assert!(output.contains("lrok_subscriber_drops_total"));
    }
}

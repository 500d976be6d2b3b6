//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status class, route
//! - `proxy_request_duration_seconds` (histogram): latency distribution
//! - `proxy_cache_events_total` (counter): cache hits, misses, stores, discards
//! - `proxy_backend_active` (gauge): 1=active, 0=inactive, per backend
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these helpers unconditionally.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(address = %addr, "Metrics endpoint listening");
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install Prometheus recorder");
        }
    }
}

fn describe_metrics() {
    describe_counter!("proxy_requests_total", "Total number of proxied requests");
    describe_histogram!(
        "proxy_request_duration_seconds",
        "Duration of proxied requests in seconds"
    );
    describe_counter!("proxy_cache_events_total", "Cache lookups and writes by outcome");
    describe_gauge!("proxy_backend_active", "Whether a load-balanced backend is active");
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "unknown",
    }
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status_class(status),
        "route" => route.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a cache event (`hit`, `miss`, `revalidated`, `stale`, `stored`, `discarded`).
pub fn record_cache_event(event: &'static str) {
    counter!("proxy_cache_events_total", "event" => event).increment(1);
}

/// Record the outcome of a load-balanced call against `backend`.
pub fn record_backend_state(backend: &str, active: bool) {
    gauge!("proxy_backend_active", "backend" => backend.to_string())
        .set(if active { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(304), "3xx");
        assert_eq!(status_class(404), "4xx");
        assert_eq!(status_class(502), "5xx");
        assert_eq!(status_class(42), "unknown");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("GET", 200, "api", Instant::now());
        record_cache_event("hit");
        record_backend_state("http://127.0.0.1:1/", false);
    }
}

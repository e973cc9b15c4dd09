//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all InvoiceFlow metrics
pub const METRICS_PREFIX: &str = "invoiceflow";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 250ms
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.100,  // 100ms
    0.250,  // 250ms - P99 target
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for OCR extraction (provider round trips are slow)
pub const OCR_BUCKETS: &[f64] = &[
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
    60.00, // 60s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Workflow metrics
    describe_counter!(
        format!("{}_invoices_submitted_total", METRICS_PREFIX),
        Unit::Count,
        "Invoices created, by source"
    );

    describe_counter!(
        format!("{}_transitions_total", METRICS_PREFIX),
        Unit::Count,
        "Committed status transitions"
    );

    describe_counter!(
        format!("{}_transitions_rejected_total", METRICS_PREFIX),
        Unit::Count,
        "Transition requests refused, by reason"
    );

    describe_counter!(
        format!("{}_notification_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Transition notifications that could not be delivered"
    );

    // OCR metrics
    describe_counter!(
        format!("{}_ocr_ingestions_total", METRICS_PREFIX),
        Unit::Count,
        "OCR ingestion attempts, by outcome"
    );

    describe_histogram!(
        format!("{}_ocr_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "OCR extraction latency in seconds"
    );

    // Login metrics
    describe_counter!(
        format!("{}_login_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Login attempts, by outcome"
    );

    describe_counter!(
        format!("{}_login_lockouts_total", METRICS_PREFIX),
        Unit::Count,
        "Sources locked out after repeated failures"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

pub fn record_submission(source: &str) {
    counter!(
        format!("{}_invoices_submitted_total", METRICS_PREFIX),
        "source" => source.to_string()
    )
    .increment(1);
}

pub fn record_transition(from: &str, to: &str) {
    counter!(
        format!("{}_transitions_total", METRICS_PREFIX),
        "from" => from.to_string(),
        "to" => to.to_string()
    )
    .increment(1);
}

/// `reason` is one of forbidden, conflict, not_found
pub fn record_transition_rejected(reason: &str) {
    counter!(
        format!("{}_transitions_rejected_total", METRICS_PREFIX),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_notification_failure(notifier: &str) {
    counter!(
        format!("{}_notification_failures_total", METRICS_PREFIX),
        "notifier" => notifier.to_string()
    )
    .increment(1);
}

/// Helper to record OCR ingestion metrics
pub fn record_ocr(duration_secs: f64, provider: &str, outcome: &str) {
    counter!(
        format!("{}_ocr_ingestions_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_ocr_duration_seconds", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

pub fn record_login(outcome: &str) {
    counter!(
        format!("{}_login_attempts_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

pub fn record_lockout() {
    counter!(format!("{}_login_lockouts_total", METRICS_PREFIX)).increment(1);
}

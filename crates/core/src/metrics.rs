//! Prometheus metrics for harness runs.
//!
//! This module provides metrics for:
//! - Job polling (waits, poll iterations, terminal states)
//! - Remote services (core daemon, marketplace)
//! - Scenario outcomes

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Poller Metrics
// =============================================================================

/// Jobs awaited to a terminal state, by that state.
pub static JOBS_AWAITED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("corecheck_jobs_awaited_total", "Total jobs awaited to completion"),
        &["status"], // "successful", "failed", "cancelled"
    )
    .unwrap()
});

/// Time from first poll until a job was seen terminal.
pub static JOB_WAIT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "corecheck_job_wait_duration_seconds",
            "Duration spent waiting for a job to finish",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["status"],
    )
    .unwrap()
});

/// Individual job status fetches.
pub static JOB_POLLS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("corecheck_job_polls_total", "Total job status polls").unwrap()
});

/// Jobs abandoned because the poll timeout elapsed.
pub static JOB_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "corecheck_job_timeouts_total",
        "Total jobs that exceeded the poll timeout",
    )
    .unwrap()
});

// =============================================================================
// Remote Service Metrics
// =============================================================================

/// Remote request duration.
pub static REMOTE_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "corecheck_remote_request_duration_seconds",
            "Duration of remote service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// Remote requests total.
pub static REMOTE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("corecheck_remote_requests_total", "Total remote service requests"),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Scenario Metrics
// =============================================================================

/// Scenario runs by outcome.
pub static SCENARIOS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("corecheck_scenarios_total", "Total scenarios run"),
        &["scenario", "result"], // result: "pass", "fail"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one finished remote call.
pub fn record_request(service: &str, operation: &str, success: bool, elapsed_secs: f64) {
    let status = if success { "success" } else { "error" };
    REMOTE_REQUESTS
        .with_label_values(&[service, operation, status])
        .inc();
    REMOTE_REQUEST_DURATION
        .with_label_values(&[service, operation])
        .observe(elapsed_secs);
}

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_AWAITED.clone()),
        Box::new(JOB_WAIT_DURATION.clone()),
        Box::new(JOB_POLLS.clone()),
        Box::new(JOB_TIMEOUTS.clone()),
        // Remote services
        Box::new(REMOTE_REQUEST_DURATION.clone()),
        Box::new(REMOTE_REQUESTS.clone()),
        // Scenarios
        Box::new(SCENARIOS.clone()),
    ]
}

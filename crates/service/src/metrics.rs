use once_cell::sync::Lazy;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

// Prometheus metrics (default registry)
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trainhub_requests_total",
        "Total requests handled by the dispatcher",
        &["method", "code"]
    )
    .expect("register requests_total")
});

pub static JOBS_SUBMITTED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "trainhub_jobs_submitted_total",
        "Total training jobs submitted",
        &["mode"]
    )
    .expect("register jobs_submitted_total")
});

pub static JOBS_FINISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "trainhub_jobs_finished_total",
        "Total training jobs that finished successfully"
    )
    .expect("register jobs_finished_total")
});

pub static JOBS_FAILED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "trainhub_jobs_failed_total",
        "Total training jobs that ended in error"
    )
    .expect("register jobs_failed_total")
});

pub static JOBS_TERMINATED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "trainhub_jobs_terminated_total",
        "Total training jobs terminated by cancellation"
    )
    .expect("register jobs_terminated_total")
});

pub static STATUS_WAIT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "trainhub_status_wait_seconds",
        "Time spent blocked in long-poll status queries",
        vec![0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("register status_wait_seconds")
});

pub static TRAIN_DURATION_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "trainhub_train_duration_seconds",
        "Duration of completed training runs",
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0, 3600.0]
    )
    .expect("register train_duration_seconds")
});

pub static SERVICES: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("trainhub_services", "Number of registered services").expect("register services")
});

pub fn encode_metrics() -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

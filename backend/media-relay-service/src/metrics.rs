/// Prometheus metrics for the media relay
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_gauge_with_registry,
    register_histogram_vec_with_registry, CounterVec, Encoder, Gauge, HistogramVec, Registry,
    TextEncoder,
};

lazy_static! {
    /// Global registry for all metrics
    pub static ref REGISTRY: Registry = Registry::new();

    /// Admission decisions (labels: decision=allowed|denied, tier)
    pub static ref ADMISSIONS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "media_relay_admissions_total",
        "Total number of admission decisions",
        &["decision", "tier"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Finished jobs (labels: outcome=delivered|<error kind>)
    pub static ref JOBS_TOTAL: CounterVec = register_counter_vec_with_registry!(
        "media_relay_jobs_total",
        "Total number of jobs that reached a terminal state",
        &["outcome"],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Stage duration (labels: stage=fetch|transform|deliver)
    pub static ref STAGE_DURATION_SECONDS: HistogramVec = register_histogram_vec_with_registry!(
        "media_relay_stage_duration_seconds",
        "Time spent in each pipeline stage",
        &["stage"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0],
        REGISTRY
    )
    .expect("Failed to register metric");

    /// Jobs waiting in the queue, sampled by the health endpoint
    pub static ref QUEUE_DEPTH: Gauge = register_gauge_with_registry!(
        "media_relay_queue_depth",
        "Number of jobs waiting in the queue",
        REGISTRY
    )
    .expect("Failed to register metric");
}

pub fn record_admission(allowed: bool, tier: &str) {
    let decision = if allowed { "allowed" } else { "denied" };
    ADMISSIONS_TOTAL.with_label_values(&[decision, tier]).inc();
}

pub fn record_job_outcome(outcome: &str) {
    JOBS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_stage(stage: &str, seconds: f64) {
    STAGE_DURATION_SECONDS
        .with_label_values(&[stage])
        .observe(seconds);
}

/// Render the registry in the Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_contains_recorded_series() {
        record_admission(true, "standard");
        record_job_outcome("delivered");
        observe_stage("fetch", 1.5);
        QUEUE_DEPTH.set(3.0);

        let text = gather();
        assert!(text.contains("media_relay_admissions_total"));
        assert!(text.contains("media_relay_jobs_total"));
        assert!(text.contains("media_relay_stage_duration_seconds"));
        assert!(text.contains("media_relay_queue_depth"));
    }
}

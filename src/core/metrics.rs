use std::sync::OnceLock;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    describe();
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe() {
    describe_counter!("grading_jobs_total", "Grading jobs finished, by terminal status");
    describe_histogram!(
        "grading_job_duration_seconds",
        Unit::Seconds,
        "Wall time per grading job"
    );
    describe_histogram!(
        "ocr_duration_seconds",
        Unit::Seconds,
        "OCR phase duration per submission"
    );
    describe_histogram!(
        "llm_duration_seconds",
        Unit::Seconds,
        "Chat completion request duration"
    );
    describe_counter!("grading_attempts_total", "Orchestrator attempts by kind and outcome");
    describe_counter!("grading_degraded_total", "Degraded grading results by reason");
    describe_counter!("llm_calls_total", "Chat completion calls by status");
    describe_counter!("llm_tokens_total", "Tokens reported by the LLM provider");
    describe_gauge!("llm_cost_total", "Estimated LLM spend from configured model prices");
    describe_counter!("ocr_requests_total", "OCR recognitions by provider and status");
    describe_counter!("quota_exceeded_total", "Calls made over the daily quota");
    describe_counter!("jobs_enqueued_total", "Jobs pushed to the grading queue");
    describe_counter!("jobs_dropped_total", "Malformed queue messages discarded");
    describe_counter!("regrade_requests_total", "Submissions sent back to the queue");
    describe_counter!("http_requests_total", "HTTP requests by status");
    describe_histogram!("http_request_duration_seconds", Unit::Seconds, "HTTP request latency");
}

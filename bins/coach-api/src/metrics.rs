// Prometheus counters for the /metrics endpoint

use coach_common::types::ExecutionResult;
use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Encoder, Histogram,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codecoach_executions_total",
        "Executions finished, by result status",
        &["status"]
    )
    .expect("executions counter registers once");

    static ref EXPLANATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "codecoach_explanations_total",
        "Explanations returned, by the stage that produced them",
        &["source"]
    )
    .expect("explanations counter registers once");

    static ref EXECUTION_SECONDS: Histogram = register_histogram!(
        "codecoach_execution_seconds",
        "Time spent running user code",
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("execution histogram registers once");

    static ref INFRASTRUCTURE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "codecoach_infrastructure_errors_total",
        "Requests that failed because the sandbox itself failed"
    )
    .expect("infrastructure counter registers once");
}

pub fn record_execution(result: &ExecutionResult) {
    EXECUTIONS_TOTAL
        .with_label_values(&[&result.status.to_string()])
        .inc();
    EXECUTION_SECONDS.observe(result.execution_time);

    if let Some(explanation) = &result.explanation {
        EXPLANATIONS_TOTAL
            .with_label_values(&[&explanation.source.to_string()])
            .inc();
    }
}

pub fn record_infrastructure_error() {
    INFRASTRUCTURE_ERRORS_TOTAL.inc();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

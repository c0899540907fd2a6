//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade, so calls are no-ops until a
//! recorder is installed by [`install_recorder`].

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-wide Prometheus recorder and describe our metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    register_metrics();
    tracing::info!("prometheus metrics recorder installed");
    Ok(handle)
}

fn register_metrics() {
    describe_counter!("rpc_requests_total", "RPC requests by method and status");
    describe_histogram!(
        "rpc_request_duration_seconds",
        "RPC handler latency in seconds"
    );
    describe_counter!("transactions_total", "Transactions by type and outcome");
    describe_counter!("saga_retries_total", "Forward saga retries");
    describe_counter!(
        "reconciliation_recovered_total",
        "Stuck transactions driven to a terminal state"
    );
    describe_counter!("publisher_publish_total", "Broker publishes by outcome");
    describe_counter!("auth_attempts_total", "Authentication attempts by outcome");
}

pub fn record_rpc(service: &'static str, method: &str, status: u16, seconds: f64) {
    metrics::counter!(
        "rpc_requests_total",
        "service" => service,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "rpc_request_duration_seconds",
        "service" => service,
        "method" => method.to_string()
    )
    .record(seconds);
}

pub fn record_transaction(transaction_type: &str, outcome: &'static str) {
    metrics::counter!(
        "transactions_total",
        "type" => transaction_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_saga_retry() {
    metrics::counter!("saga_retries_total").increment(1);
}

pub fn record_reconciled(count: u64) {
    metrics::counter!("reconciliation_recovered_total").increment(count);
}

pub fn record_publish(outcome: &'static str) {
    metrics::counter!("publisher_publish_total", "outcome" => outcome).increment(1);
}

pub fn record_auth_attempt(outcome: &'static str) {
    metrics::counter!("auth_attempts_total", "outcome" => outcome).increment(1);
}

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

use crate::health::HealthRegistry;

/// Processing takes at least a cache round trip and a broker ack, and at most the retry budget.
const DURATION_SECONDS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

const BATCH_SIZES: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

/// Install the global recorder and build a Router exposing `/metrics` and `/_liveness`.
pub fn setup_metrics_router(liveness: HealthRegistry) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;
    Ok(metrics_router(recorder_handle, liveness))
}

pub fn metrics_router(recorder_handle: PrometheusHandle, liveness: HealthRegistry) -> Router {
    Router::new()
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = prometheus_builder()?.install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn prometheus_builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_owned()),
            DURATION_SECONDS,
        )?
        .set_buckets_for_metric(
            Matcher::Full("outcome_worker_batch_size".to_owned()),
            BATCH_SIZES,
        )
}

/// Help texts for every metric the gateway emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "outcome_worker_received_total",
        "Inbound outcome messages received"
    );
    metrics::describe_counter!(
        "outcome_worker_processed_total",
        "Outcomes whose processor chain completed"
    );
    metrics::describe_counter!(
        "outcome_worker_failures_total",
        "Processor chain failures, by error kind"
    );
    metrics::describe_counter!(
        "outcome_worker_retries_total",
        "Chain steps retried after a transient failure"
    );
    metrics::describe_counter!(
        "outcome_worker_skipped_total",
        "Redelivered outcomes with nothing left to do"
    );
    metrics::describe_counter!(
        "outcome_worker_dead_lettered_total",
        "Inbound messages sent to the dead letter topic, by error kind"
    );
    metrics::describe_counter!(
        "outcome_worker_empty_messages_total",
        "Inbound messages dropped for lack of a payload"
    );
    metrics::describe_histogram!(
        "outcome_worker_processing_duration_seconds",
        metrics::Unit::Seconds,
        "Time from receiving an outcome to completing its chain, retries included"
    );
    metrics::describe_histogram!(
        "outcome_worker_batch_size",
        "Inbound messages per consumed batch"
    );
    metrics::describe_gauge!(
        "outcome_worker_saturation_percent",
        "Share of concurrent processing slots in use"
    );
    metrics::describe_counter!(
        "outcome_published_total",
        "Derived events acknowledged by the broker, by routing key"
    );
    metrics::describe_counter!(
        "outcome_publish_errors_total",
        "Derived events that could not be published, by routing key"
    );
    metrics::describe_counter!(
        "outcome_gateway_events_total",
        "Lifecycle events raised by processors, by event type"
    );
    metrics::describe_gauge!(
        "outcome_kafka_producer_queue_depth",
        "Messages waiting in the producer queue"
    );
    metrics::describe_gauge!(
        "outcome_kafka_producer_queue_depth_limit",
        "Capacity of the producer queue"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_and_batch_sizes_use_their_own_buckets() {
        let recorder = prometheus_builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("outcome_worker_processing_duration_seconds").record(20.0);
            metrics::histogram!("outcome_worker_batch_size").record(100.0);
        });

        let rendered = handle.render();
        let buckets = |name: &str| {
            rendered
                .lines()
                .filter(|line| line.starts_with(&format!("{}_bucket{{", name)))
                .count()
        };

        // One line per bound plus +Inf
        assert_eq!(
            buckets("outcome_worker_processing_duration_seconds"),
            DURATION_SECONDS.len() + 1
        );
        assert_eq!(buckets("outcome_worker_batch_size"), BATCH_SIZES.len() + 1);
    }
}

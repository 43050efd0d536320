use std::sync::Arc;
use std::time;

use outcome_common::health::HealthHandle;
use outcome_common::outcome::Outcome;
use outcome_common::retry::RetryPolicy;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message};
use serde::Deserialize;
use tokio::sync;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::dead_letter::DeadLetterQueue;
use crate::error::{ProcessingError, WorkerError};
use crate::registry::Dispatcher;

/// An outcome as it arrives on the inbound topic.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundOutcome {
    pub outcome_type: String,
    #[serde(default)]
    pub existing_case_id: Option<Uuid>,
    pub outcome: Outcome,
}

/// What became of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Processed(Uuid),
    /// A redelivery of an outcome whose case already exists.
    Skipped,
    DeadLettered,
}

/// Runs one inbound message through the pipeline, retrying transient failures.
pub struct OutcomeHandler {
    dispatcher: Arc<Dispatcher>,
    dead_letters: Arc<dyn DeadLetterQueue>,
    retry_policy: RetryPolicy,
}

impl OutcomeHandler {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        dead_letters: Arc<dyn DeadLetterQueue>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            dispatcher,
            dead_letters,
            retry_policy,
        }
    }

    /// Handle the raw payload of an inbound message.
    ///
    /// A transient failure is retried from the failed step, with the case id that step was
    /// handed: completed steps are not run again. A split finding its case already created
    /// means an earlier delivery did it, so the chain carries on from the next step with that
    /// case, or the message is skipped when no step is left. The same finding while retrying
    /// the split itself means the failed attempt created the case without announcing it, and
    /// the message is dead lettered.
    ///
    /// Only a failure to dead letter is returned as an error: the message must then not be committed.
    pub async fn handle(&self, payload: &[u8]) -> Result<Disposition, WorkerError> {
        metrics::counter!("outcome_worker_received_total").increment(1);

        let inbound = match serde_json::from_slice::<InboundOutcome>(payload) {
            Ok(inbound) => inbound,
            Err(error) => {
                warn!("failed to parse inbound outcome: {}", error);
                return self
                    .dead_letter(payload, "parse_error", &error.to_string())
                    .await;
            }
        };

        let labels = [("outcome_type", inbound.outcome_type.clone())];
        let transaction_id = inbound.outcome.transaction_id;
        let now = tokio::time::Instant::now();
        let mut attempt = 1;
        let mut step = 0;
        let mut case_id = inbound.existing_case_id;
        let mut retrying_step = None;

        loop {
            let result = self
                .dispatcher
                .resume(&inbound.outcome, case_id, &inbound.outcome_type, step)
                .await;

            let failure = match result {
                Ok(case_id) => {
                    metrics::counter!("outcome_worker_processed_total", &labels).increment(1);
                    metrics::histogram!("outcome_worker_processing_duration_seconds", &labels)
                        .record(now.elapsed().as_secs_f64());
                    return Ok(Disposition::Processed(case_id));
                }
                Err(failure) => failure,
            };
            metrics::counter!("outcome_worker_failures_total", "kind" => failure.error.kind())
                .increment(1);

            if let ProcessingError::DuplicateCase { case_id: existing } = failure.error {
                if retrying_step != Some(failure.step) {
                    let next_step = failure.step + 1;
                    let pending = self
                        .dispatcher
                        .registry()
                        .chain_len(&inbound.outcome_type)
                        .is_some_and(|len| next_step < len);

                    if !pending {
                        info!(%transaction_id, %existing, "skipping redelivered outcome");
                        metrics::counter!("outcome_worker_skipped_total", &labels).increment(1);
                        return Ok(Disposition::Skipped);
                    }

                    info!(
                        %transaction_id,
                        %existing,
                        next_step,
                        "case already created, resuming chain"
                    );
                    step = next_step;
                    case_id = Some(existing);
                    retrying_step = None;
                    continue;
                }
            }

            if failure.error.is_retryable() && self.retry_policy.should_retry(attempt) {
                let wait = self.retry_policy.time_until_next_retry(attempt);
                warn!(
                    %transaction_id,
                    attempt,
                    step = failure.step,
                    "retrying outcome in {:?}: {}",
                    wait,
                    failure.error
                );
                metrics::counter!("outcome_worker_retries_total", &labels).increment(1);
                tokio::time::sleep(wait).await;
                attempt += 1;
                step = failure.step;
                case_id = failure.case_id;
                retrying_step = Some(failure.step);
                continue;
            }

            error!(
                %transaction_id,
                attempt,
                step = failure.step,
                "failed to process outcome: {}",
                failure.error
            );
            return self
                .dead_letter(payload, failure.error.kind(), &failure.error.to_string())
                .await;
        }
    }

    async fn dead_letter(
        &self,
        payload: &[u8],
        kind: &'static str,
        reason: &str,
    ) -> Result<Disposition, WorkerError> {
        self.dead_letters
            .dead_letter(payload, kind, reason)
            .await
            .map_err(WorkerError::DeadLetterError)?;

        metrics::counter!("outcome_worker_dead_lettered_total", "kind" => kind).increment(1);
        Ok(Disposition::DeadLettered)
    }
}

pub fn create_kafka_consumer(config: &Config) -> Result<StreamConsumer, WorkerError> {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka.kafka_hosts)
        .set("group.id", config.consumer_group.as_str())
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest");

    if config.kafka.kafka_tls {
        client_config
            .set("security.protocol", "ssl")
            .set("enable.ssl.certificate.verification", "false");
    };

    debug!("rdkafka consumer configuration: {:?}", client_config);
    let consumer: StreamConsumer = client_config.create()?;
    consumer.subscribe(&[config.inbound_topic.as_str()])?;

    Ok(consumer)
}

/// A worker consuming inbound outcomes from Kafka in batches.
///
/// Each batch is handled concurrently and committed only once every message in it was
/// processed, skipped or dead lettered.
pub struct OutcomeWorker {
    consumer: StreamConsumer,
    handler: Arc<OutcomeHandler>,
    /// Maximum number of messages per batch.
    batch_size: usize,
    /// How long to wait for a batch to fill up.
    batch_timeout: time::Duration,
    /// Maximum number of outcomes being processed at once.
    max_concurrent_outcomes: usize,
    /// The liveness check handle, to call on a schedule to report healthy
    liveness: HealthHandle,
}

impl OutcomeWorker {
    pub fn new(
        consumer: StreamConsumer,
        handler: OutcomeHandler,
        batch_size: usize,
        batch_timeout: time::Duration,
        max_concurrent_outcomes: usize,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            consumer,
            handler: Arc::new(handler),
            batch_size: batch_size.max(1),
            batch_timeout,
            max_concurrent_outcomes: max_concurrent_outcomes.max(1),
            liveness,
        }
    }

    /// Wait for up to `batch_size` payloads, returning early when `batch_timeout` runs out.
    async fn next_batch(&self) -> Result<Vec<Vec<u8>>, WorkerError> {
        let mut batch = Vec::with_capacity(self.batch_size);
        let deadline = tokio::time::sleep(self.batch_timeout);
        tokio::pin!(deadline);

        while batch.len() < self.batch_size {
            tokio::select! {
                message = self.consumer.recv() => {
                    let message = message?;
                    match message.payload() {
                        Some(payload) => batch.push(payload.to_vec()),
                        None => {
                            warn!(offset = message.offset(), "dropping inbound message without payload");
                            metrics::counter!("outcome_worker_empty_messages_total").increment(1);
                        }
                    }
                }
                _ = &mut deadline => break,
            }
        }

        Ok(batch)
    }

    /// Run this worker to continuously process inbound outcomes.
    pub async fn run(&self) -> Result<(), WorkerError> {
        let semaphore = Arc::new(sync::Semaphore::new(self.max_concurrent_outcomes));

        loop {
            self.liveness.report_healthy();

            let batch = self.next_batch().await?;
            if batch.is_empty() {
                continue;
            }

            metrics::histogram!("outcome_worker_batch_size").record(batch.len() as f64);
            let mut set = JoinSet::new();

            for payload in batch {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|error| WorkerError::TaskError(error.to_string()))?;
                metrics::gauge!("outcome_worker_saturation_percent").set(
                    1f64 - semaphore.available_permits() as f64
                        / self.max_concurrent_outcomes as f64,
                );

                let handler = self.handler.clone();
                set.spawn(async move {
                    let result = handler.handle(&payload).await;
                    drop(permit);
                    result
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(Ok(disposition)) => debug!("handled inbound outcome: {:?}", disposition),
                    Ok(Err(error)) => {
                        set.abort_all();
                        return Err(error);
                    }
                    Err(error) => {
                        set.abort_all();
                        return Err(WorkerError::TaskError(error.to_string()));
                    }
                }
            }

            self.consumer.commit_consumer_state(CommitMode::Sync)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::RecordingDeadLetterQueue;
    use crate::processors::default_processors;
    use crate::processors::testing::{outcome, Harness};
    use crate::registry::{ProcessorRegistry, DEFAULT_CHAINS};
    use outcome_common::cache::{CaseCacheEntry, MemoryCaseCache};

    fn handler(harness: &Harness, dead_letters: &RecordingDeadLetterQueue) -> OutcomeHandler {
        let mut registry = ProcessorRegistry::new();
        for processor in default_processors(&harness.context) {
            registry.register_processor(processor);
        }
        registry
            .register_chains(&DEFAULT_CHAINS.parse().unwrap())
            .unwrap();

        OutcomeHandler::new(
            Arc::new(Dispatcher::new(registry)),
            Arc::new(dead_letters.clone()),
            RetryPolicy::new(1, time::Duration::from_millis(1), None, 3),
        )
    }

    #[tokio::test]
    async fn test_rendering_failure_is_dead_lettered_without_retry() {
        let parent = Uuid::new_v4();
        let harness = Harness::unrenderable(
            MemoryCaseCache::new().with_entry(CaseCacheEntry::new(&parent.to_string())),
        );
        let dead_letters = RecordingDeadLetterQueue::new();
        let handler = handler(&harness, &dead_letters);
        let payload = serde_json::to_vec(&serde_json::json!({
            "outcomeType": "ADDRESS_TYPE_CHANGED",
            "outcome": outcome(parent),
        }))
        .unwrap();

        let disposition = handler.handle(&payload).await.unwrap();

        assert_eq!(disposition, Disposition::DeadLettered);
        let dead_letters = dead_letters.dead_letters();
        assert_eq!(dead_letters.len(), 1);
        assert_eq!(dead_letters[0].kind, "rendering_failure");
        assert_eq!(dead_letters[0].payload, payload);
        // A single split attempt: the child it created stays
        assert_eq!(harness.cache.len(), 2);
        assert!(harness.publisher.published().is_empty());
    }

    #[test]
    fn test_parse_inbound_outcome() {
        let raw = r#"{
            "outcomeType": "LINKED_QID",
            "outcome": {
                "caseId": "8ed3fc08-e95f-44db-a6d7-cde4e76a6182",
                "transactionId": "045de4dc-3c3b-11e9-b210-d663bd873d93",
                "eventDate": "2020-04-17T10:30:05Z",
                "officerId": "E1-RL-SAM1-01",
                "fulfilmentRequests": [{"questionnaireID": "Q1"}]
            }
        }"#;

        let inbound: InboundOutcome = serde_json::from_str(raw).unwrap();

        assert_eq!(inbound.outcome_type, "LINKED_QID");
        assert_eq!(inbound.existing_case_id, None);
        assert_eq!(inbound.outcome.fulfilment_requests.len(), 1);
    }
}

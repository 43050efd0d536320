use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use outcome_common::kafka_producer::KafkaContext;
use outcome_common::publisher::PublishError;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

/// Where inbound messages go once they can no longer be processed.
#[async_trait]
pub trait DeadLetterQueue: Send + Sync {
    async fn dead_letter(&self, payload: &[u8], kind: &str, reason: &str)
        -> Result<(), PublishError>;
}

/// Produces dead letters, untouched, to a Kafka topic. The failure travels in headers.
pub struct KafkaDeadLetterQueue {
    producer: FutureProducer<KafkaContext>,
    topic: String,
}

impl KafkaDeadLetterQueue {
    pub fn new(producer: FutureProducer<KafkaContext>, topic: &str) -> Self {
        Self {
            producer,
            topic: topic.to_owned(),
        }
    }
}

#[async_trait]
impl DeadLetterQueue for KafkaDeadLetterQueue {
    async fn dead_letter(
        &self,
        payload: &[u8],
        kind: &str,
        reason: &str,
    ) -> Result<(), PublishError> {
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "error_kind",
                value: Some(kind),
            })
            .insert(Header {
                key: "error",
                value: Some(reason),
            });

        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(&self.topic)
            .payload(payload)
            .headers(headers);

        self.producer
            .send(record, Timeout::After(Duration::from_secs(30)))
            .await
            .map(|_| ())
            .map_err(|(error, _)| PublishError::ProduceError {
                topic: self.topic.clone(),
                error,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub payload: Vec<u8>,
    pub kind: String,
    pub reason: String,
}

/// Keeps dead letters in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingDeadLetterQueue {
    dead_letters: Arc<Mutex<Vec<DeadLetter>>>,
}

impl RecordingDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        match self.dead_letters.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl DeadLetterQueue for RecordingDeadLetterQueue {
    async fn dead_letter(
        &self,
        payload: &[u8],
        kind: &str,
        reason: &str,
    ) -> Result<(), PublishError> {
        let dead_letter = DeadLetter {
            payload: payload.to_vec(),
            kind: kind.to_owned(),
            reason: reason.to_owned(),
        };

        match self.dead_letters.lock() {
            Ok(mut guard) => guard.push(dead_letter),
            Err(poisoned) => poisoned.into_inner().push(dead_letter),
        }
        Ok(())
    }
}

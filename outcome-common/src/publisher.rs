//! # Publisher
//!
//! Hands derived events over to the bus. Delivery is at least once: a publish returns only
//! after the broker acknowledged the message, and a failed publish may still have reached
//! the bus. Consumers deduplicate on the correlation token.
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrics::counter;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use thiserror::Error;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::kafka_producer::KafkaContext;
use crate::routing::{Channel, RoutingKey, OUTCOME_EXCHANGE};

/// A rendered payload ready for the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedEvent {
    pub payload: String,
    pub routing_key: RoutingKey,
    /// The transaction id of the outcome this event was derived from.
    pub correlation_token: Uuid,
}

impl DerivedEvent {
    pub fn new(payload: String, routing_key: RoutingKey, correlation_token: Uuid) -> Self {
        Self {
            payload,
            routing_key,
            correlation_token,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to produce to {topic}: {error}")]
    ProduceError { topic: String, error: KafkaError },
    #[error("delivery to {topic} was canceled before an acknowledgement")]
    Canceled { topic: String },
    #[error("message for {topic} is larger than the broker accepts")]
    MessageTooLarge { topic: String },
    #[error("publisher is unavailable: {0}")]
    Unavailable(String),
}

impl PublishError {
    /// Oversized messages fail the same way every time, everything else may go through later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PublishError::MessageTooLarge { .. })
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: DerivedEvent) -> Result<(), PublishError>;
}

/// Produces derived events to Kafka.
///
/// Events on the outcome channel go to the topic named by their routing key, property
/// listings go to one dedicated topic. Messages are keyed by correlation token.
#[derive(Clone)]
pub struct KafkaPublisher {
    producer: FutureProducer<KafkaContext>,
    property_listing_topic: String,
}

impl KafkaPublisher {
    pub fn new(producer: FutureProducer<KafkaContext>, property_listing_topic: &str) -> Self {
        Self {
            producer,
            property_listing_topic: property_listing_topic.to_owned(),
        }
    }

    pub fn topic_for(&self, routing_key: RoutingKey) -> &str {
        match routing_key.channel() {
            Channel::Outcome => routing_key.as_str(),
            Channel::PropertyListing => &self.property_listing_topic,
        }
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    #[instrument(skip_all, fields(routing_key = %event.routing_key, transaction_id = %event.correlation_token))]
    async fn publish(&self, event: DerivedEvent) -> Result<(), PublishError> {
        let topic = self.topic_for(event.routing_key).to_owned();
        let key = event.correlation_token.to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "routing_key",
                value: Some(event.routing_key.as_str()),
            })
            .insert(Header {
                key: "transaction_id",
                value: Some(key.as_str()),
            })
            .insert(Header {
                key: "exchange",
                value: Some(OUTCOME_EXCHANGE),
            });

        let record = FutureRecord::to(&topic)
            .payload(event.payload.as_str())
            .key(key.as_str())
            .headers(headers);

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _)) => {
                counter!("outcome_publish_errors_total", "reason" => "message_size").increment(1);
                return Err(PublishError::MessageTooLarge { topic });
            }
            Err((error, _)) => {
                counter!("outcome_publish_errors_total", "reason" => "enqueue").increment(1);
                error!("failed to enqueue derived event: {}", error);
                return Err(PublishError::ProduceError { topic, error });
            }
        };

        match delivery.await {
            Ok(Ok(_)) => {
                counter!("outcome_published_total", "routing_key" => event.routing_key.as_str())
                    .increment(1);
                Ok(())
            }
            Ok(Err((KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge), _))) => {
                counter!("outcome_publish_errors_total", "reason" => "message_size").increment(1);
                Err(PublishError::MessageTooLarge { topic })
            }
            Ok(Err((error, _))) => {
                counter!("outcome_publish_errors_total", "reason" => "produce").increment(1);
                error!("failed to produce derived event: {}", error);
                Err(PublishError::ProduceError { topic, error })
            }
            Err(_) => {
                // Dropped by the producer once message.timeout.ms ran out
                counter!("outcome_publish_errors_total", "reason" => "timeout").increment(1);
                error!("failed to produce derived event before the write timeout");
                Err(PublishError::Canceled { topic })
            }
        }
    }
}

/// Logs derived events instead of producing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrintPublisher;

#[async_trait]
impl Publisher for PrintPublisher {
    async fn publish(&self, event: DerivedEvent) -> Result<(), PublishError> {
        info!(
            routing_key = %event.routing_key,
            transaction_id = %event.correlation_token,
            "derived event: {}",
            event.payload
        );
        Ok(())
    }
}

/// Keeps published events in memory. Can be switched to fail every publish, or the next
/// publish on given routing keys.
#[derive(Debug, Clone, Default)]
pub struct RecordingPublisher {
    published: Arc<Mutex<Vec<DerivedEvent>>>,
    failing: Arc<Mutex<bool>>,
    scheduled_failures: Arc<Mutex<Vec<RoutingKey>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        match self.failing.lock() {
            Ok(mut guard) => *guard = failing,
            Err(poisoned) => *poisoned.into_inner() = failing,
        }
    }

    /// Fail the next publish on `routing_key`, once per call.
    pub fn fail_next_on(&self, routing_key: RoutingKey) {
        match self.scheduled_failures.lock() {
            Ok(mut guard) => guard.push(routing_key),
            Err(poisoned) => poisoned.into_inner().push(routing_key),
        }
    }

    pub fn published(&self) -> Vec<DerivedEvent> {
        match self.published.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn published_on(&self, routing_key: RoutingKey) -> Vec<DerivedEvent> {
        self.published()
            .into_iter()
            .filter(|event| event.routing_key == routing_key)
            .collect()
    }

    fn is_failing(&self, routing_key: RoutingKey) -> bool {
        let failing = match self.failing.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        if failing {
            return true;
        }

        let mut scheduled = match self.scheduled_failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match scheduled.iter().position(|key| *key == routing_key) {
            Some(index) => {
                scheduled.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, event: DerivedEvent) -> Result<(), PublishError> {
        if self.is_failing(event.routing_key) {
            return Err(PublishError::Unavailable(format!(
                "refusing {} for tests",
                event.routing_key
            )));
        }

        match self.published.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

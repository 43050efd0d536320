use async_trait::async_trait;
use outcome_common::events::{GatewayEvent, CESPG_OUTCOME_SENT};
use outcome_common::outcome::Outcome;
use outcome_common::publisher::DerivedEvent;
use outcome_common::render::{EventType, OutcomeMessage};
use outcome_common::routing::RoutingKey;
use uuid::Uuid;

use super::{OutcomeKind, OutcomeProcessor, ProcessorContext};
use crate::error::ProcessingError;

/// Reports a unit address found in the field as a property listing.
///
/// The case id of the new unit is minted here and the case cache is never consulted,
/// unlike the other processors.
pub struct NewUnitAddressProcessor {
    context: ProcessorContext,
}

impl NewUnitAddressProcessor {
    pub fn new(context: ProcessorContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl OutcomeProcessor for NewUnitAddressProcessor {
    fn kind(&self) -> OutcomeKind {
        OutcomeKind::NewUnitAddress
    }

    async fn process(
        &self,
        outcome: &Outcome,
        case_id: Option<Uuid>,
        survey_type: &str,
    ) -> Result<Uuid, ProcessingError> {
        self.context.processing_started(
            self.kind(),
            case_id.unwrap_or(outcome.case_id),
            outcome,
            survey_type,
        );

        let new_case_id = self
            .context
            .case_ids
            .generate(outcome.transaction_id, self.kind().as_str());

        let payload = self
            .context
            .renderer
            .render(&OutcomeMessage::NewAddressReported {
                outcome,
                new_case_id,
            })?;

        let routing_key = RoutingKey::CcsPropertyListing;
        self.context
            .publisher
            .publish(DerivedEvent::new(
                payload,
                routing_key,
                outcome.transaction_id,
            ))
            .await?;

        self.context.events.trigger(
            GatewayEvent::new(new_case_id.to_string(), CESPG_OUTCOME_SENT)
                .with("survey type", survey_type)
                .with("processor", self.kind().as_str())
                .with("type", EventType::NewAddressReported.as_str())
                .with("transaction id", outcome.transaction_id.to_string())
                .with("routing key", routing_key.as_str()),
        );

        Ok(new_case_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::{outcome, Harness};
    use assert_json_diff::assert_json_include;
    use outcome_common::cache::MemoryCaseCache;
    use outcome_common::routing::Channel;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_new_unit_is_listed_without_touching_the_cache() {
        let harness = Harness::new(MemoryCaseCache::new());
        let processor = NewUnitAddressProcessor::new(harness.context.clone());
        let outcome = outcome(Uuid::new_v4());

        let new_case_id = processor.process(&outcome, None, "SPG").await.unwrap();

        assert_ne!(new_case_id, outcome.case_id);
        assert!(harness.cache.is_empty());

        let published = harness.publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].routing_key, RoutingKey::CcsPropertyListing);
        assert_eq!(
            published[0].routing_key.channel(),
            Channel::PropertyListing
        );

        let payload: Value = serde_json::from_str(&published[0].payload).unwrap();
        assert_json_include!(
            actual: payload,
            expected: json!({
                "event": {
                    "type": "NEW_ADDRESS_REPORTED",
                    "dateTime": "2020-04-17T10:30:05.000Z",
                    "transactionId": outcome.transaction_id.to_string()
                },
                "payload": {
                    "newAddress": {
                        "collectionCase": {
                            "id": new_case_id.to_string(),
                            "fieldOfficerId": "E1-RL-SAM1-01",
                            "address": {
                                "addressLine1": "Flat 2, 1 Main Street",
                                "postcode": "EX1 1AA"
                            }
                        }
                    }
                }
            })
        );
    }

    #[tokio::test]
    async fn test_new_unit_ignores_an_unavailable_cache() {
        let harness = Harness::new(MemoryCaseCache::unavailable());
        let processor = NewUnitAddressProcessor::new(harness.context.clone());

        let result = processor.process(&outcome(Uuid::new_v4()), None, "SPG").await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_property_listing_sent_event() {
        let harness = Harness::new(MemoryCaseCache::new());
        let processor = NewUnitAddressProcessor::new(harness.context.clone());

        let new_case_id = processor
            .process(&outcome(Uuid::new_v4()), None, "SPG")
            .await
            .unwrap();

        let sent = harness.events.of_type(CESPG_OUTCOME_SENT);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].case_id, new_case_id.to_string());
        assert_eq!(sent[0].get("routing key"), Some("event.ccs.propertylisting"));
    }
}

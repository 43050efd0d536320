use async_trait::async_trait;
use outcome_common::cache::CaseCacheEntry;
use outcome_common::events::{GatewayEvent, OUTCOME_SENT};
use outcome_common::outcome::Outcome;
use outcome_common::publisher::DerivedEvent;
use outcome_common::render::{EventType, OutcomeMessage};
use outcome_common::routing::RoutingKey;
use uuid::Uuid;

use super::{OutcomeKind, OutcomeProcessor, ProcessorContext};
use crate::error::ProcessingError;

/// Links the questionnaires named by fulfilment requests to a case.
///
/// Linkage does not require the case to be tracked: it may be a split created earlier in the
/// same chain, or a case the gateway has not heard of yet.
pub struct LinkedQidProcessor {
    context: ProcessorContext,
}

impl LinkedQidProcessor {
    pub fn new(context: ProcessorContext) -> Self {
        Self { context }
    }

    /// Read-modify-write the entry of `case_id` so that it is marked delivered.
    async fn mark_delivered(&self, case_id: Uuid) -> Result<(), ProcessingError> {
        let key = case_id.to_string();
        let mut entry = self
            .context
            .cache
            .get(&key)
            .await?
            .unwrap_or_else(|| CaseCacheEntry::new(&key));

        entry.delivered = true;
        self.context.cache.put(&entry).await?;

        Ok(())
    }
}

#[async_trait]
impl OutcomeProcessor for LinkedQidProcessor {
    fn kind(&self) -> OutcomeKind {
        OutcomeKind::LinkedQid
    }

    async fn process(
        &self,
        outcome: &Outcome,
        case_id: Option<Uuid>,
        survey_type: &str,
    ) -> Result<Uuid, ProcessingError> {
        let case_id = case_id.unwrap_or(outcome.case_id);
        self.context
            .processing_started(self.kind(), case_id, outcome, survey_type);

        let routing_key = RoutingKey::QuestionnaireUpdate;
        for questionnaire_id in outcome
            .fulfilment_requests
            .iter()
            .filter_map(|request| request.questionnaire_id.as_deref())
        {
            self.mark_delivered(case_id).await?;

            let payload = self
                .context
                .renderer
                .render(&OutcomeMessage::QuestionnaireLinked {
                    outcome,
                    case_id,
                    questionnaire_id,
                })?;

            self.context
                .publisher
                .publish(DerivedEvent::new(
                    payload,
                    routing_key,
                    outcome.transaction_id,
                ))
                .await?;

            self.context.events.trigger(
                GatewayEvent::new(case_id.to_string(), OUTCOME_SENT)
                    .with("survey type", survey_type)
                    .with("processor", self.kind().as_str())
                    .with("questionnaire id", questionnaire_id)
                    .with("type", EventType::QuestionnaireLinked.as_str())
                    .with("transaction id", outcome.transaction_id.to_string())
                    .with("routing key", routing_key.as_str()),
            );
        }

        Ok(case_id)
    }
}

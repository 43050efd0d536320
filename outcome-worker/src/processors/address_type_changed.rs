use async_trait::async_trait;
use outcome_common::cache::{CaseCacheEntry, HOUSEHOLD_KIND};
use outcome_common::events::{GatewayEvent, OUTCOME_SENT};
use outcome_common::outcome::Outcome;
use outcome_common::publisher::DerivedEvent;
use outcome_common::region::region_lookup;
use outcome_common::render::{EventType, OutcomeMessage};
use outcome_common::routing::RoutingKey;
use tracing::debug;
use uuid::Uuid;

use super::{OutcomeKind, OutcomeProcessor, ProcessorContext};
use crate::error::ProcessingError;

/// Establishment type of the unit split off a household.
const SPLIT_ESTAB_TYPE: &str = "HH";
const SPLIT_USUAL_RESIDENTS: u32 = 0;

/// Splits a household: the parent case stays, a new case is created for the reported unit.
pub struct AddressTypeChangedProcessor {
    context: ProcessorContext,
}

impl AddressTypeChangedProcessor {
    pub fn new(context: ProcessorContext) -> Self {
        Self { context }
    }

    /// Track the new case. The parent must be known and the new case must not be.
    async fn track_split(
        &self,
        outcome: &Outcome,
        parent_case_id: Uuid,
        new_case_id: Uuid,
    ) -> Result<(), ProcessingError> {
        let cache = &self.context.cache;

        if cache.get(&parent_case_id.to_string()).await?.is_none() {
            return Err(ProcessingError::MissingParentCase {
                case_id: parent_case_id,
            });
        }

        if cache.get(&new_case_id.to_string()).await?.is_some() {
            return Err(ProcessingError::DuplicateCase {
                case_id: new_case_id,
            });
        }

        let child = CaseCacheEntry {
            exists_in_field: false,
            access_info: outcome.access_info.clone(),
            care_codes: outcome.care_codes_text(),
            kind: HOUSEHOLD_KIND,
            ..CaseCacheEntry::new(&new_case_id.to_string())
        };

        // A concurrent creator may have won since the read above
        if !cache.insert_if_absent(&child).await? {
            return Err(ProcessingError::DuplicateCase {
                case_id: new_case_id,
            });
        }

        debug!(%parent_case_id, %new_case_id, "tracked split case");
        Ok(())
    }
}

#[async_trait]
impl OutcomeProcessor for AddressTypeChangedProcessor {
    fn kind(&self) -> OutcomeKind {
        OutcomeKind::AddressTypeChangedHh
    }

    async fn process(
        &self,
        outcome: &Outcome,
        case_id: Option<Uuid>,
        survey_type: &str,
    ) -> Result<Uuid, ProcessingError> {
        let parent_case_id = case_id.unwrap_or(outcome.case_id);
        self.context
            .processing_started(self.kind(), parent_case_id, outcome, survey_type);

        let new_case_id = self
            .context
            .case_ids
            .generate(outcome.transaction_id, self.kind().as_str());
        self.track_split(outcome, parent_case_id, new_case_id)
            .await?;

        let payload = self
            .context
            .renderer
            .render(&OutcomeMessage::AddressTypeChanged {
                outcome,
                case_id: parent_case_id,
                new_case_id,
                region: region_lookup(&outcome.officer_id),
                estab_type: SPLIT_ESTAB_TYPE,
                usual_residents: SPLIT_USUAL_RESIDENTS,
            })?;

        let routing_key = RoutingKey::AddressUpdate;
        self.context
            .publisher
            .publish(DerivedEvent::new(
                payload,
                routing_key,
                outcome.transaction_id,
            ))
            .await?;

        self.context.events.trigger(
            GatewayEvent::new(parent_case_id.to_string(), OUTCOME_SENT)
                .with("survey type", survey_type)
                .with("processor", self.kind().as_str())
                .with("new case id", new_case_id.to_string())
                .with("type", EventType::AddressTypeChanged.as_str())
                .with("transaction id", outcome.transaction_id.to_string())
                .with("routing key", routing_key.as_str()),
        );

        Ok(new_case_id)
    }
}

//! # Processors
//!
//! One processor per outcome kind. A processor reads and writes the case cache under its own
//! rule, renders a derived event and hands it to the publisher. The case id threaded through
//! a chain comes in as `case_id` and the processor returns the one the next step works on.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use outcome_common::cache::CaseCache;
use outcome_common::case_id::CaseIdGenerator;
use outcome_common::events::{EventManager, GatewayEvent, PROCESSING_OUTCOME};
use outcome_common::outcome::Outcome;
use outcome_common::publisher::Publisher;
use outcome_common::render::Render;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ProcessingError;

mod address_type_changed;
mod linked_qid;
mod new_unit_address;

pub use address_type_changed::AddressTypeChangedProcessor;
pub use linked_qid::LinkedQidProcessor;
pub use new_unit_address::NewUnitAddressProcessor;

/// Closed set of processors the gateway knows about.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum OutcomeKind {
    AddressTypeChangedHh,
    LinkedQid,
    NewUnitAddress,
}

impl OutcomeKind {
    pub const ALL: [OutcomeKind; 3] = [
        OutcomeKind::AddressTypeChangedHh,
        OutcomeKind::LinkedQid,
        OutcomeKind::NewUnitAddress,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::AddressTypeChangedHh => "ADDRESS_TYPE_CHANGED_HH",
            OutcomeKind::LinkedQid => "LINKED_QID",
            OutcomeKind::NewUnitAddress => "NEW_UNIT_ADDRESS",
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a known processor")]
pub struct ParseOutcomeKindError(pub String);

impl FromStr for OutcomeKind {
    type Err = ParseOutcomeKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OutcomeKind::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| ParseOutcomeKindError(s.to_owned()))
    }
}

#[async_trait]
pub trait OutcomeProcessor: Send + Sync {
    fn kind(&self) -> OutcomeKind;

    /// Process `outcome`, working on `case_id` when an earlier step supplied one.
    /// Returns the case id handed to the next processor of the chain.
    async fn process(
        &self,
        outcome: &Outcome,
        case_id: Option<Uuid>,
        survey_type: &str,
    ) -> Result<Uuid, ProcessingError>;
}

/// Collaborators shared by every processor.
#[derive(Clone)]
pub struct ProcessorContext {
    pub cache: Arc<dyn CaseCache>,
    pub publisher: Arc<dyn Publisher>,
    pub events: Arc<dyn EventManager>,
    pub renderer: Arc<dyn Render>,
    pub case_ids: Arc<dyn CaseIdGenerator>,
}

impl ProcessorContext {
    /// Emit the lifecycle event every processor raises before touching anything.
    fn processing_started(
        &self,
        kind: OutcomeKind,
        case_id: Uuid,
        outcome: &Outcome,
        survey_type: &str,
    ) {
        self.events.trigger(
            GatewayEvent::new(case_id.to_string(), PROCESSING_OUTCOME)
                .with("survey type", survey_type)
                .with("processor", kind.as_str())
                .with("original case id", outcome.case_id.to_string())
                .with("site case id", outcome.site_case_id_label()),
        );
    }
}

/// Every processor the gateway ships with, sharing one context.
pub fn default_processors(context: &ProcessorContext) -> Vec<Arc<dyn OutcomeProcessor>> {
    vec![
        Arc::new(AddressTypeChangedProcessor::new(context.clone())),
        Arc::new(LinkedQidProcessor::new(context.clone())),
        Arc::new(NewUnitAddressProcessor::new(context.clone())),
    ]
}

//! # Registry and dispatcher
//!
//! Declared outcome types map to ordered chains of processors. Chains only exist through
//! explicit registration, and the dispatcher threads the case id from one step to the next.
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use outcome_common::outcome::Outcome;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ChainError, ProcessingError, RegistryError};
use crate::processors::{OutcomeKind, OutcomeProcessor};

/// Chains used when none are configured.
pub const DEFAULT_CHAINS: &str =
    "ADDRESS_TYPE_CHANGED=ADDRESS_TYPE_CHANGED_HH,LINKED_QID;LINKED_QID=LINKED_QID;NEW_UNIT_ADDRESS=NEW_UNIT_ADDRESS";

/// Declared outcome types with the processor kinds they run, in order.
/// Parsed from `TYPE=KIND,KIND;TYPE=KIND`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTable(pub Vec<(String, Vec<OutcomeKind>)>);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid outcome chain: {0}")]
pub struct ParseChainTableError(pub String);

impl FromStr for ChainTable {
    type Err = ParseChainTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chains = Vec::new();

        for chain in s.split(';').map(str::trim).filter(|chain| !chain.is_empty()) {
            let (declared_type, kinds) = chain
                .split_once('=')
                .ok_or_else(|| ParseChainTableError(chain.to_owned()))?;

            let declared_type = declared_type.trim();
            if declared_type.is_empty() {
                return Err(ParseChainTableError(chain.to_owned()));
            }

            let kinds = kinds
                .split(',')
                .map(str::trim)
                .filter(|kind| !kind.is_empty())
                .map(|kind| {
                    kind.parse::<OutcomeKind>()
                        .map_err(|error| ParseChainTableError(error.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            chains.push((declared_type.to_owned(), kinds));
        }

        Ok(ChainTable(chains))
    }
}

/// Lookup table from declared outcome type to processor chain.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<OutcomeKind, Arc<dyn OutcomeProcessor>>,
    chains: HashMap<String, Vec<Arc<dyn OutcomeProcessor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a processor available to chains registered from now on.
    pub fn register_processor(&mut self, processor: Arc<dyn OutcomeProcessor>) {
        self.processors.insert(processor.kind(), processor);
    }

    /// Register the chain run for `declared_type`, replacing any previous one.
    pub fn register_chain(
        &mut self,
        declared_type: &str,
        kinds: &[OutcomeKind],
    ) -> Result<(), RegistryError> {
        if kinds.is_empty() {
            return Err(RegistryError::EmptyChain {
                declared_type: declared_type.to_owned(),
            });
        }

        let chain = kinds
            .iter()
            .map(|kind| {
                self.processors
                    .get(kind)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnregisteredProcessor {
                        declared_type: declared_type.to_owned(),
                        kind: *kind,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.chains.insert(declared_type.to_owned(), chain);
        Ok(())
    }

    pub fn register_chains(&mut self, table: &ChainTable) -> Result<(), RegistryError> {
        for (declared_type, kinds) in &table.0 {
            self.register_chain(declared_type, kinds)?;
        }
        Ok(())
    }

    pub fn chain(&self, declared_type: &str) -> Option<&[Arc<dyn OutcomeProcessor>]> {
        self.chains.get(declared_type).map(Vec::as_slice)
    }

    /// Number of steps in the chain for `declared_type`, if any is registered.
    pub fn chain_len(&self, declared_type: &str) -> Option<usize> {
        self.chains.get(declared_type).map(Vec::len)
    }

    pub fn declared_types(&self) -> Vec<&str> {
        let mut declared_types: Vec<&str> = self.chains.keys().map(String::as_str).collect();
        declared_types.sort_unstable();
        declared_types
    }
}

/// Entry point of the pipeline.
pub struct Dispatcher {
    registry: ProcessorRegistry,
}

impl Dispatcher {
    pub fn new(registry: ProcessorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Run the chain registered for `declared_type` over `outcome`.
    ///
    /// Each processor receives the case id returned by the previous one, the first one receives
    /// `existing_case_id`. Returns the case id of the last processor, or the first error.
    pub async fn dispatch(
        &self,
        outcome: &Outcome,
        existing_case_id: Option<Uuid>,
        declared_type: &str,
    ) -> Result<Uuid, ProcessingError> {
        self.resume(outcome, existing_case_id, declared_type, 0)
            .await
            .map_err(|failure| failure.error)
    }

    /// Run the chain registered for `declared_type` from `first_step` on, handing `case_id` to
    /// that step. On failure, reports the failed step with the case id it was handed so the
    /// caller can resume there without running completed steps again.
    #[instrument(skip_all, fields(declared_type = %declared_type, transaction_id = %outcome.transaction_id, first_step = first_step))]
    pub async fn resume(
        &self,
        outcome: &Outcome,
        case_id: Option<Uuid>,
        declared_type: &str,
        first_step: usize,
    ) -> Result<Uuid, ChainError> {
        let chain = self
            .registry
            .chain(declared_type)
            .ok_or_else(|| ChainError {
                step: first_step,
                case_id,
                error: ProcessingError::ConfigurationError {
                    declared_type: declared_type.to_owned(),
                },
            })?;

        let site_case_id = outcome.site_case_id_label();
        let mut threaded = case_id;
        let mut resulting = case_id.unwrap_or(outcome.case_id);

        for (step, processor) in chain.iter().enumerate().skip(first_step) {
            info!(
                survey_type = declared_type,
                processor = processor.kind().as_str(),
                case_id = %outcome.case_id,
                site_case_id = %site_case_id,
                step,
                "processing outcome"
            );

            resulting = processor
                .process(outcome, threaded, declared_type)
                .await
                .map_err(|error| ChainError {
                    step,
                    case_id: threaded,
                    error,
                })?;
            threaded = Some(resulting);

            info!(
                survey_type = declared_type,
                processor = processor.kind().as_str(),
                case_id = %outcome.case_id,
                site_case_id = %site_case_id,
                resulting_case_id = %resulting,
                step,
                "processed outcome"
            );
        }

        Ok(resulting)
    }
}

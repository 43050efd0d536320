use outcome_common::cache::CacheError;
use outcome_common::publisher::PublishError;
use outcome_common::render::RenderError;
use rdkafka::error::KafkaError;
use thiserror::Error;
use uuid::Uuid;

use crate::processors::OutcomeKind;

/// Enumeration of errors a pipeline run can fail with.
/// None of them is retried inside the pipeline: the caller decides between retry, skip and dead letter.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("parent case {case_id} is not tracked in the case cache")]
    MissingParentCase { case_id: Uuid },
    #[error("case {case_id} to be created is already tracked in the case cache")]
    DuplicateCase { case_id: Uuid },
    #[error("a derived event could not be rendered: {0}")]
    RenderingFailure(#[from] RenderError),
    #[error("a derived event could not be published: {0}")]
    PublishError(#[from] PublishError),
    #[error("the case cache could not be used: {0}")]
    CacheError(#[from] CacheError),
    #[error("no processor is registered for outcome type {declared_type}")]
    ConfigurationError { declared_type: String },
}

impl ProcessingError {
    /// Whether processing the same outcome again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessingError::PublishError(error) => error.is_retryable(),
            ProcessingError::CacheError(_) => true,
            ProcessingError::MissingParentCase { .. }
            | ProcessingError::DuplicateCase { .. }
            | ProcessingError::RenderingFailure(_)
            | ProcessingError::ConfigurationError { .. } => false,
        }
    }

    /// Label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::MissingParentCase { .. } => "missing_parent_case",
            ProcessingError::DuplicateCase { .. } => "duplicate_case",
            ProcessingError::RenderingFailure(_) => "rendering_failure",
            ProcessingError::PublishError(_) => "publish_error",
            ProcessingError::CacheError(_) => "cache_error",
            ProcessingError::ConfigurationError { .. } => "configuration_error",
        }
    }
}

/// A chain stopped at `step`, which was handed `case_id`.
/// Steps before it completed and are not run again when resuming from `step`.
#[derive(Error, Debug)]
#[error("step {step} of the chain failed: {error}")]
pub struct ChainError {
    pub step: usize,
    pub case_id: Option<Uuid>,
    #[source]
    pub error: ProcessingError,
}

/// Enumeration of errors raised while wiring processors into chains.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("chain for {declared_type} has no processors")]
    EmptyChain { declared_type: String },
    #[error("chain for {declared_type} uses {kind} but no such processor is registered")]
    UnregisteredProcessor {
        declared_type: String,
        kind: OutcomeKind,
    },
}

/// Enumeration of errors related to initialization and consumption of inbound outcomes.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("processor chains could not be registered: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("a Kafka error occurred: {0}")]
    KafkaError(#[from] KafkaError),
    #[error("the case cache could not be initialized: {0}")]
    CacheError(#[from] CacheError),
    #[error("metrics could not be set up: {0}")]
    MetricsError(String),
    #[error("a message could not be dead lettered: {0}")]
    DeadLetterError(PublishError),
    #[error("an outcome processing task failed: {0}")]
    TaskError(String),
}

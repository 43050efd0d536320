//! Consume field outcomes from Kafka and republish the events derived from them.
use std::sync::Arc;

use envconfig::Envconfig;
use outcome_common::cache::PgCaseCache;
use outcome_common::events::TracingEventManager;
use outcome_common::health::HealthRegistry;
use outcome_common::kafka_producer::create_kafka_producer;
use outcome_common::metrics::{serve, setup_metrics_router};
use outcome_common::publisher::{KafkaPublisher, PrintPublisher, Publisher};
use outcome_common::render::JsonRenderer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use outcome_worker::config::Config;
use outcome_worker::dead_letter::KafkaDeadLetterQueue;
use outcome_worker::error::WorkerError;
use outcome_worker::processors::{default_processors, ProcessorContext};
use outcome_worker::registry::{Dispatcher, ProcessorRegistry};
use outcome_worker::worker::{create_kafka_consumer, OutcomeHandler, OutcomeWorker};

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();

    let config = Config::init_from_env()?;

    let liveness = HealthRegistry::new("liveness");
    // The worker reports once per batch, and a batch waits at most batch_timeout for messages
    let batch_timeout = time::Duration::try_from(config.batch_timeout.0).unwrap_or_default();
    let worker_liveness = liveness.register("worker", time::Duration::seconds(30) + batch_timeout);
    let kafka_liveness = liveness.register("rdkafka", time::Duration::seconds(30));

    let producer = create_kafka_producer(&config.kafka, kafka_liveness)?;
    let publisher: Arc<dyn Publisher> = if config.print_derived_events {
        info!("printing derived events instead of producing them");
        Arc::new(PrintPublisher)
    } else {
        Arc::new(KafkaPublisher::new(
            producer.clone(),
            config.property_listing_topic.as_str(),
        ))
    };

    let cache = PgCaseCache::new(
        config.cache_table.as_str(),
        &config.database_url,
        config.max_pg_connections,
    )?;

    let context = ProcessorContext {
        cache: Arc::new(cache),
        publisher,
        events: Arc::new(TracingEventManager),
        renderer: Arc::new(JsonRenderer),
        case_ids: Arc::from(config.case_id_strategy.generator()),
    };

    let mut registry = ProcessorRegistry::new();
    for processor in default_processors(&context) {
        registry.register_processor(processor);
    }
    registry.register_chains(&config.outcome_chains)?;
    info!(
        "registered outcome chains for {}",
        registry.declared_types().join(", ")
    );

    let handler = OutcomeHandler::new(
        Arc::new(Dispatcher::new(registry)),
        Arc::new(KafkaDeadLetterQueue::new(
            producer,
            config.dead_letter_topic.as_str(),
        )),
        config.retry_policy.policy(),
    );

    let worker = OutcomeWorker::new(
        create_kafka_consumer(&config)?,
        handler,
        config.batch_size,
        config.batch_timeout.0,
        config.max_concurrent_outcomes,
        worker_liveness,
    );

    let router = setup_metrics_router(liveness)
        .map_err(|error| WorkerError::MetricsError(error.to_string()))?;
    let bind = config.bind();
    tokio::task::spawn(async move {
        if let Err(error) = serve(router, &bind).await {
            error!("failed to serve metrics on {}: {}", bind, error);
        }
    });

    worker.run().await
}

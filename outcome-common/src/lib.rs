pub mod cache;
pub mod case_id;
pub mod events;
pub mod health;
pub mod kafka_producer;
pub mod metrics;
pub mod outcome;
pub mod publisher;
pub mod region;
pub mod render;
pub mod retry;
pub mod routing;

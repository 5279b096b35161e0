pub mod app_config;
pub mod database;
pub mod events;
pub mod memory;
pub mod redis_repo;
pub mod settlement_repo;
pub mod tracing_notifier;

pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use memory::InMemorySettlementStore;
pub use redis_repo::RedisClient;
pub use settlement_repo::PostgresSettlementStore;
pub use tracing_notifier::TracingNotifier;

use serde::Deserialize;
use std::env;
use ridepool_core::SettlementRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub settlement: SettlementRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

/// Redis backs the scheduler's cross-process trip claim
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default)]
    pub enabled: bool,
}

/// When disabled, notifications and audit entries are only logged
#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
    #[serde(default = "default_audit_topic")]
    pub audit_topic: String,
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
}

fn default_notifications_topic() -> String { "ridepool.notifications".to_string() }
fn default_audit_topic() -> String { "ridepool.audit".to_string() }
fn default_events_topic() -> String { "ridepool.settlement".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_scheduler_enabled() -> bool { true }
fn default_interval_seconds() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            interval_seconds: default_interval_seconds(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, e.g. config/production.toml
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // RIDEPOOL__SETTLEMENT__CURRENCY=EUR sets settlement.currency
            .add_source(config::Environment::with_prefix("RIDEPOOL").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_fills_defaults() {
        let toml = r#"
            [server]
            port = 8080
            [database]
            url = "postgres://localhost/ridepool"
            [redis]
            url = "redis://localhost"
            [kafka]
            brokers = "localhost:9092"
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(!config.kafka.enabled);
        assert_eq!(config.kafka.audit_topic, "ridepool.audit");
        assert_eq!(config.scheduler.interval_seconds, 60);
        assert_eq!(config.settlement.approval_cutoff_hours, 3);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_postgres_backend_and_rule_overrides() {
        let toml = r#"
            [server]
            port = 8080
            [storage]
            backend = "postgres"
            [database]
            url = "postgres://localhost/ridepool"
            [redis]
            url = "redis://localhost"
            enabled = true
            [kafka]
            brokers = "localhost:9092"
            [settlement]
            currency = "EUR"
            completion_buffer_seconds = 600
        "#;
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Postgres);
        assert!(config.redis.enabled);
        assert_eq!(config.settlement.currency, "EUR");
        assert_eq!(config.settlement.completion_buffer_seconds, 600);
        assert_eq!(config.settlement.rejection_grace_minutes, 60);
    }
}

use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info};
use uuid::Uuid;
use ridepool_core::{ActionStatus, AuditLogger, EventPublisher, Notifier};
use ridepool_shared::SettlementEvent;
use crate::app_config::KafkaConfig;

#[derive(Clone)]
pub struct EventProducer {
    producer: FutureProducer,
}

impl EventProducer {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }

    pub async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), rdkafka::error::KafkaError> {
        let record = FutureRecord::to(topic)
            .key(key)
            .payload(payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!("Sent message to {}/{}: partition {} offset {}", topic, key, delivery.partition, delivery.offset);
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", topic, e);
                Err(e)
            }
        }
    }
}

/// Routes notifications, audit entries and settlement events to their Kafka topics as JSON
#[derive(Clone)]
pub struct KafkaNotifier {
    producer: EventProducer,
    notifications_topic: String,
    audit_topic: String,
    events_topic: String,
}

impl KafkaNotifier {
    pub fn new(producer: EventProducer, config: &KafkaConfig) -> Self {
        Self {
            producer,
            notifications_topic: config.notifications_topic.clone(),
            audit_topic: config.audit_topic.clone(),
            events_topic: config.events_topic.clone(),
        }
    }
}

#[async_trait]
impl Notifier for KafkaNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = json!({
            "user_id": user_id,
            "title": title,
            "message": message,
            "link": link,
            "timestamp": Utc::now().timestamp(),
        });
        self.producer
            .publish(&self.notifications_topic, &user_id.to_string(), &payload.to_string())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditLogger for KafkaNotifier {
    async fn log_action(
        &self,
        actor: &str,
        action: &str,
        status: ActionStatus,
        details: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = json!({
            "actor": actor,
            "action": action,
            "status": status,
            "details": details,
            "timestamp": Utc::now().timestamp(),
        });
        self.producer.publish(&self.audit_topic, actor, &payload.to_string()).await?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for KafkaNotifier {
    async fn publish(&self, event: &SettlementEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = serde_json::to_string(event)?;
        self.producer
            .publish(&self.events_topic, &event.trip_id().to_string(), &payload)
            .await?;
        Ok(())
    }
}

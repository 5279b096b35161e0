use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;
use ridepool_core::{ActionStatus, AuditLogger, EventPublisher, Notifier};
use ridepool_shared::SettlementEvent;

/// Writes notifications, audit entries and events to the log. Used when Kafka is disabled.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(%user_id, title, link, "notification: {}", message);
        Ok(())
    }
}

#[async_trait]
impl AuditLogger for TracingNotifier {
    async fn log_action(
        &self,
        actor: &str,
        action: &str,
        status: ActionStatus,
        details: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(actor, action, ?status, %details, "audit");
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for TracingNotifier {
    async fn publish(&self, event: &SettlementEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!(trip_id = %event.trip_id(), "event: {}", serde_json::to_string(event)?);
        Ok(())
    }
}

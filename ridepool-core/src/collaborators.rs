use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use ridepool_shared::SettlementEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failure,
}

/// Delivers user-facing notifications (push, email, in-app)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        link: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Records who did what for the audit trail
#[async_trait]
pub trait AuditLogger: Send + Sync {
    async fn log_action(
        &self,
        actor: &str,
        action: &str,
        status: ActionStatus,
        details: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Publishes settlement facts to downstream consumers
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        event: &SettlementEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Cross-process claim on a trip so two scheduler instances never process it together
#[async_trait]
pub trait TripLock: Send + Sync {
    /// Returns false when another worker already holds the claim
    async fn try_claim(
        &self,
        trip_id: Uuid,
        ttl_seconds: u64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;

    /// Drop a claim this worker holds so the next pass can retry the trip
    async fn release(&self, trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Single-process deployments need no claim
pub struct NoopTripLock;

#[async_trait]
impl TripLock for NoopTripLock {
    async fn try_claim(
        &self,
        _trip_id: Uuid,
        _ttl_seconds: u64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(true)
    }

    async fn release(&self, _trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

use std::sync::Arc;
use ridepool_core::{ActionStatus, AuditLogger, EventPublisher, Notifier};
use ridepool_shared::SettlementEvent;
use tracing::warn;
use uuid::Uuid;

/// Dispatches notifications, audit entries and events after a commit.
///
/// Every call spawns a task and returns immediately. Failures are logged and
/// never reach the operation that triggered them.
#[derive(Clone)]
pub struct SideEffects {
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLogger>,
    events: Arc<dyn EventPublisher>,
}

impl SideEffects {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLogger>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self { notifier, audit, events }
    }

    pub fn notify(&self, user_id: Uuid, title: &str, message: String, link: Option<String>) {
        let notifier = self.notifier.clone();
        let title = title.to_string();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(user_id, &title, &message, link.as_deref()).await {
                warn!("Notification to {} failed: {}", user_id, e);
            }
        });
    }

    pub fn audit(&self, actor: String, action: &'static str, details: serde_json::Value) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.log_action(&actor, action, ActionStatus::Success, details).await {
                warn!("Audit entry {} for {} failed: {}", action, actor, e);
            }
        });
    }

    pub fn audit_failure(&self, actor: String, action: &'static str, details: serde_json::Value) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.log_action(&actor, action, ActionStatus::Failure, details).await {
                warn!("Audit entry {} for {} failed: {}", action, actor, e);
            }
        });
    }

    pub fn publish(&self, event: SettlementEvent) {
        let events = self.events.clone();
        tokio::spawn(async move {
            if let Err(e) = events.publish(&event).await {
                warn!("Publishing event for trip {} failed: {}", event.trip_id(), e);
            }
        });
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::status_enum;

status_enum! {
    pub enum PaymentStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
        Failed => "FAILED",
        Refunded => "REFUNDED",
    }
}

/// Payment for one reservation. `service_fee_cents` is the platform's cut
/// embedded in `total_amount_cents`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub reservation_id: Uuid,
    pub status: PaymentStatus,
    pub total_amount_cents: i64,
    pub service_fee_cents: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Create a pending payment for the trip price plus the platform fee
    pub fn pending(reservation_id: Uuid, trip_price_cents: i64, service_fee_cents: i64, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            status: PaymentStatus::Pending,
            total_amount_cents: trip_price_cents + service_fee_cents,
            service_fee_cents,
            currency: currency.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The ride-cost part of the payment, excluding the platform fee
    pub fn trip_price_portion(&self) -> i64 {
        self.total_amount_cents - self.service_fee_cents
    }
}

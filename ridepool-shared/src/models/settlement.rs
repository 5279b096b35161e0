use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::status_enum;

status_enum! {
    pub enum CancelledBy {
        Passenger => "PASSENGER",
        Driver => "DRIVER",
        System => "SYSTEM",
    }
}

status_enum! {
    pub enum RefundType {
        FullRefund => "FULL_REFUND",
        #[serde(rename = "PARTIAL_REFUND_75")]
        PartialRefund75 => "PARTIAL_REFUND_75",
        #[serde(rename = "PARTIAL_REFUND_50")]
        PartialRefund50 => "PARTIAL_REFUND_50",
    }
}

status_enum! {
    pub enum RefundStatus {
        Pending => "PENDING",
        Completed => "COMPLETED",
    }
}

status_enum! {
    pub enum PayoutStatus {
        Pending => "PENDING",
        OnHold => "ON_HOLD",
    }
}

/// Append-only record of a cancellation. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancellation {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub cancelled_by: CancelledBy,
    pub reason: String,
    pub hours_before_departure: f64,
    /// Absent for driver cancellations recorded at trip granularity
    pub refund_percentage: Option<u8>,
    pub created_at: DateTime<Utc>,
}

impl Cancellation {
    pub fn new(
        trip_id: Uuid,
        reservation_id: Option<Uuid>,
        cancelled_by: CancelledBy,
        reason: &str,
        hours_before_departure: f64,
        refund_percentage: Option<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            trip_id,
            reservation_id,
            cancelled_by,
            reason: reason.to_string(),
            hours_before_departure,
            refund_percentage,
            created_at: Utc::now(),
        }
    }
}

/// Money returned to a passenger after a paid reservation was cancelled
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Refund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub reservation_id: Uuid,
    pub refund_amount_cents: i64,
    pub driver_compensation_cents: i64,
    pub service_fee_retained_cents: i64,
    pub refund_type: RefundType,
    pub status: RefundStatus,
    pub processed_at: DateTime<Utc>,
}

/// Net amount owed to a driver once a trip completes. At most one per trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPayout {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub payout_amount_cents: i64,
    pub total_received_cents: i64,
    pub service_fee_cents: i64,
    pub late_cancellation_penalty_cents: i64,
    pub currency: String,
    pub status: PayoutStatus,
    pub created_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};

use super::status_enum;

status_enum! {
    /// Trip status in the lifecycle. COMPLETED and CANCELLED are terminal.
    pub enum TripStatus {
        Pending => "PENDING",
        Active => "ACTIVE",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
    }
}

impl TripStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed | TripStatus::Cancelled)
    }
}

status_enum! {
    pub enum FeeType {
        Percentage => "PERCENTAGE",
        FixedAmount => "FIXED_AMOUNT",
        PerSeat => "PER_SEAT",
    }
}

/// Rate-based platform fee configuration.
///
/// `rate` is a percent for `Percentage` (10.0 = 10%) and an amount in cents
/// for `FixedAmount` and `PerSeat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeePolicy {
    pub id: Uuid,
    pub fee_type: FeeType,
    pub rate: f64,
    pub minimum_fee_cents: Option<i64>,
    pub maximum_fee_cents: Option<i64>,
}

impl FeePolicy {
    pub fn new(fee_type: FeeType, rate: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            fee_type,
            rate,
            minimum_fee_cents: None,
            maximum_fee_cents: None,
        }
    }

    pub fn with_bounds(mut self, minimum_fee_cents: Option<i64>, maximum_fee_cents: Option<i64>) -> Self {
        self.minimum_fee_cents = minimum_fee_cents;
        self.maximum_fee_cents = maximum_fee_cents;
        self
    }
}

/// One offered journey
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub price_per_seat_cents: i64,
    pub departure_time: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub status: TripStatus,
    /// Seats offered when the trip was created
    pub total_seats: i32,
    pub remaining_seats: i32,
    pub is_full: bool,
    pub service_fee_cents: Option<i64>,
    pub fee_policy_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    pub fn new(
        driver_id: Uuid,
        price_per_seat_cents: i64,
        seats: i32,
        departure_time: DateTime<Utc>,
        duration_seconds: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            driver_id,
            price_per_seat_cents,
            departure_time,
            duration_seconds,
            status: TripStatus::Active,
            total_seats: seats,
            remaining_seats: seats,
            is_full: seats == 0,
            service_fee_cents: None,
            fee_policy_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scheduled end of the service window, if the duration is usable
    pub fn scheduled_end(&self) -> Option<DateTime<Utc>> {
        match self.duration_seconds {
            Some(secs) if secs > 0 => Some(self.departure_time + Duration::seconds(secs)),
            _ => None,
        }
    }

    /// Take seats off the inventory. Callers must check capacity first.
    pub fn hold_seats(&mut self, seats: i32) {
        self.remaining_seats -= seats;
        self.is_full = self.remaining_seats == 0;
        self.updated_at = Utc::now();
    }

    /// Return seats to the inventory
    pub fn release_seats(&mut self, seats: i32) {
        self.remaining_seats += seats;
        self.is_full = self.remaining_seats == 0;
        self.updated_at = Utc::now();
    }

    pub fn update_status(&mut self, new_status: TripStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_inventory_keeps_full_flag_in_sync() {
        let mut trip = Trip::new(Uuid::new_v4(), 10000, 3, Utc::now(), Some(3600));

        trip.hold_seats(3);
        assert_eq!(trip.remaining_seats, 0);
        assert!(trip.is_full);

        trip.release_seats(2);
        assert_eq!(trip.remaining_seats, 2);
        assert!(!trip.is_full);
    }

    #[test]
    fn test_scheduled_end_requires_positive_duration() {
        let departure = Utc::now();
        let mut trip = Trip::new(Uuid::new_v4(), 10000, 3, departure, Some(5400));
        assert_eq!(trip.scheduled_end(), Some(departure + Duration::seconds(5400)));

        trip.duration_seconds = Some(0);
        assert!(trip.scheduled_end().is_none());

        trip.duration_seconds = None;
        assert!(trip.scheduled_end().is_none());
    }
}

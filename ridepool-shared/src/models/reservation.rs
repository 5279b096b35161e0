use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use super::status_enum;

status_enum! {
    /// Reservation status. Transitions only move forward along
    /// PENDING_APPROVAL -> APPROVED -> CONFIRMED -> COMPLETED, with
    /// rejection, waitlisting and the cancellation tiers branching off.
    pub enum ReservationStatus {
        PendingApproval => "PENDING_APPROVAL",
        Approved => "APPROVED",
        Waitlisted => "WAITLISTED",
        Confirmed => "CONFIRMED",
        Rejected => "REJECTED",
        Completed => "COMPLETED",
        CancelledEarly => "CANCELLED_EARLY",
        CancelledMedium => "CANCELLED_MEDIUM",
        CancelledLate => "CANCELLED_LATE",
        CancelledByDriverEarly => "CANCELLED_BY_DRIVER_EARLY",
        CancelledByDriverLate => "CANCELLED_BY_DRIVER_LATE",
        NoShow => "NO_SHOW",
        Expired => "EXPIRED",
    }
}

impl ReservationStatus {
    /// Cancelled by anyone, or closed out as a no-show/expiry
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            ReservationStatus::CancelledEarly
                | ReservationStatus::CancelledMedium
                | ReservationStatus::CancelledLate
                | ReservationStatus::CancelledByDriverEarly
                | ReservationStatus::CancelledByDriverLate
                | ReservationStatus::NoShow
                | ReservationStatus::Expired
        )
    }

    pub fn is_terminal(&self) -> bool {
        self.is_cancelled() || matches!(self, ReservationStatus::Rejected | ReservationStatus::Completed)
    }

    /// Statuses that currently hold seats on the trip
    pub fn holds_seats(&self) -> bool {
        matches!(self, ReservationStatus::Approved | ReservationStatus::Confirmed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        match self {
            PendingApproval => matches!(next, Approved | Rejected | Waitlisted) || next.is_cancelled(),
            Waitlisted => matches!(next, Approved | Rejected) || next.is_cancelled(),
            Approved => matches!(next, Confirmed | Rejected | Completed) || next.is_cancelled(),
            Confirmed => matches!(next, Completed) || next.is_cancelled(),
            _ => false,
        }
    }
}

/// Seats held by one passenger on one trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub passenger_id: Uuid,
    pub seats_reserved: i32,
    pub total_price_cents: i64,
    pub status: ReservationStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(trip_id: Uuid, passenger_id: Uuid, seats_reserved: i32, price_per_seat_cents: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trip_id,
            passenger_id,
            seats_reserved,
            total_price_cents: price_per_seat_cents * i64::from(seats_reserved),
            status: ReservationStatus::PendingApproval,
            approved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn update_status(&mut self, new_status: ReservationStatus) {
        self.status = new_status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    #[test]
    fn test_total_price_scales_with_seats() {
        let reservation = Reservation::new(Uuid::new_v4(), Uuid::new_v4(), 3, 2500);
        assert_eq!(reservation.total_price_cents, 7500);
        assert_eq!(reservation.status, PendingApproval);
    }

    #[test]
    fn test_paid_passenger_cannot_be_rejected() {
        assert!(Approved.can_transition_to(Rejected));
        assert!(!Confirmed.can_transition_to(Rejected));
    }

    #[test]
    fn test_terminal_states_never_move() {
        for status in [Rejected, Completed, CancelledEarly, CancelledByDriverLate, NoShow, Expired] {
            assert!(status.is_terminal());
            assert!(!status.can_transition_to(Approved));
            assert!(!status.can_transition_to(PendingApproval));
        }
    }

    #[test]
    fn test_only_approved_and_confirmed_hold_seats() {
        assert!(Approved.holds_seats());
        assert!(Confirmed.holds_seats());
        assert!(!PendingApproval.holds_seats());
        assert!(!Waitlisted.holds_seats());
    }
}

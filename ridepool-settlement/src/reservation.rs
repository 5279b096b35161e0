use chrono::Duration;
use ridepool_core::repository::{ApprovalCommit, PaymentSettlement, RejectionCommit, ReservationTransition};
use ridepool_core::{SettlementError, SettlementResult};
use ridepool_shared::{
    Payment, PaymentStatus, Reservation, ReservationStatus, SettlementEvent, TripStatus,
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::context::SettlementContext;
use crate::policy::{compute_reservation_fee, hours_between};

/// Drives a single reservation through its lifecycle
#[derive(Clone)]
pub struct ReservationManager {
    ctx: SettlementContext,
}

impl ReservationManager {
    pub fn new(ctx: SettlementContext) -> Self {
        Self { ctx }
    }

    /// Passenger asks for seats. Starts in PENDING_APPROVAL.
    pub async fn request_reservation(
        &self,
        trip_id: Uuid,
        passenger_id: Uuid,
        seats: i32,
    ) -> SettlementResult<Reservation> {
        if seats < 1 {
            return Err(SettlementError::ValidationFailed("at least one seat must be requested".into()));
        }

        let trip = self.ctx.load_trip(trip_id).await?;
        if trip.driver_id == passenger_id {
            return Err(SettlementError::ValidationFailed("drivers cannot book their own trip".into()));
        }
        if !matches!(trip.status, TripStatus::Pending | TripStatus::Active) {
            return Err(SettlementError::InvalidState(format!("trip is {}", trip.status)));
        }

        let now = self.ctx.now();
        if trip.departure_time <= now {
            return Err(SettlementError::InvalidState("trip has already departed".into()));
        }

        let mut reservation = Reservation::new(trip.id, passenger_id, seats, trip.price_per_seat_cents);
        reservation.created_at = now;
        reservation.updated_at = now;
        self.ctx.store.insert_reservation(&reservation).await?;

        info!("Reservation {} requested on trip {} ({} seats)", reservation.id, trip.id, seats);
        self.ctx.effects.notify(
            trip.driver_id,
            "New reservation request",
            format!("A passenger requested {} seat(s) on your trip", seats),
            Some(format!("/trips/{}/reservations/{}", trip.id, reservation.id)),
        );
        Ok(reservation)
    }

    /// Transition: PENDING_APPROVAL | WAITLISTED → APPROVED
    pub async fn approve(
        &self,
        trip_id: Uuid,
        reservation_id: Uuid,
        actor_id: Uuid,
    ) -> SettlementResult<Reservation> {
        let mut reservation = self.ctx.load_trip_reservation(trip_id, reservation_id).await?;
        let trip = self.ctx.load_trip(trip_id).await?;

        if trip.driver_id != actor_id {
            return Err(SettlementError::Forbidden { actor: actor_id.to_string(), action: "approve reservation" });
        }
        if trip.status.is_terminal() {
            return Err(SettlementError::InvalidState(format!("trip is {}", trip.status)));
        }
        if !reservation.status.can_transition_to(ReservationStatus::Approved) {
            return Err(SettlementError::InvalidState(format!(
                "cannot approve a {} reservation",
                reservation.status
            )));
        }

        let now = self.ctx.now();
        let hours_left = hours_between(now, trip.departure_time);
        if hours_left < self.ctx.rules.approval_cutoff_hours as f64 {
            return Err(SettlementError::TimingRestricted(format!(
                "approvals close {} hours before departure",
                self.ctx.rules.approval_cutoff_hours
            )));
        }
        if reservation.seats_reserved > trip.remaining_seats {
            return Err(SettlementError::CapacityExceeded {
                requested: reservation.seats_reserved,
                available: trip.remaining_seats,
            });
        }

        let policy = self.ctx.load_fee_policy(&trip).await?;
        let fee = compute_reservation_fee(
            reservation.total_price_cents,
            reservation.seats_reserved,
            policy.as_ref(),
            trip.service_fee_cents,
        );
        let mut payment = Payment::pending(reservation.id, reservation.total_price_cents, fee, &self.ctx.rules.currency);
        payment.created_at = now;
        payment.updated_at = now;

        let commit = ApprovalCommit {
            reservation_id: reservation.id,
            trip_id: trip.id,
            expected_status: reservation.status,
            seats: reservation.seats_reserved,
            approved_at: now,
            payment: payment.clone(),
        };
        let trip = self.ctx.store.apply_approval(&commit).await?;

        reservation.update_status(ReservationStatus::Approved);
        reservation.approved_at = Some(now);

        info!(
            "Reservation {} approved, trip {} has {} seats left",
            reservation.id, trip.id, trip.remaining_seats
        );
        self.ctx.effects.notify(
            reservation.passenger_id,
            "Reservation approved",
            format!("Your reservation was approved. Amount due: {} {}", payment.total_amount_cents, payment.currency),
            Some(format!("/reservations/{}/payment", reservation.id)),
        );
        self.ctx.effects.publish(SettlementEvent::ReservationApproved {
            reservation_id: reservation.id,
            trip_id: trip.id,
            seats: reservation.seats_reserved,
            timestamp: now.timestamp(),
        });
        self.ctx.effects.audit(
            actor_id.to_string(),
            "RESERVATION_APPROVED",
            json!({ "reservation_id": reservation.id, "payment_id": payment.id, "service_fee_cents": fee }),
        );
        Ok(reservation)
    }

    /// Transition: PENDING_APPROVAL | WAITLISTED | APPROVED → REJECTED
    ///
    /// A confirmed (paid) passenger is never rejected. An approved passenger
    /// can only be removed shortly after approval and well before departure.
    pub async fn reject(
        &self,
        trip_id: Uuid,
        reservation_id: Uuid,
        actor_id: Uuid,
    ) -> SettlementResult<Reservation> {
        let mut reservation = self.ctx.load_trip_reservation(trip_id, reservation_id).await?;
        let trip = self.ctx.load_trip(trip_id).await?;

        if trip.driver_id != actor_id {
            return Err(SettlementError::Forbidden { actor: actor_id.to_string(), action: "reject reservation" });
        }
        if reservation.status == ReservationStatus::Confirmed {
            return Err(SettlementError::Immutable("cannot reject a paid passenger".into()));
        }
        if reservation.status.is_terminal() {
            return Err(SettlementError::Immutable(format!("reservation is {}", reservation.status)));
        }

        let now = self.ctx.now();
        if reservation.status == ReservationStatus::Approved {
            let grace = Duration::minutes(self.ctx.rules.rejection_grace_minutes);
            let grace_expired = reservation.approved_at.is_some_and(|at| now >= at + grace);
            let near_departure =
                hours_between(now, trip.departure_time) < self.ctx.rules.approval_cutoff_hours as f64;
            if grace_expired || near_departure {
                return Err(SettlementError::TimingRestricted(
                    "approved passengers can no longer be removed".into(),
                ));
            }
        }

        let release_seats = if reservation.status.holds_seats() { reservation.seats_reserved } else { 0 };
        let commit = RejectionCommit {
            reservation_id: reservation.id,
            trip_id: trip.id,
            expected_status: reservation.status,
            release_seats,
        };
        let trip = self.ctx.store.apply_rejection(&commit).await?;

        reservation.update_status(ReservationStatus::Rejected);
        reservation.approved_at = None;

        info!(
            "Reservation {} rejected, trip {} has {} seats left",
            reservation.id, trip.id, trip.remaining_seats
        );
        self.ctx.effects.notify(
            reservation.passenger_id,
            "Reservation declined",
            "The driver declined your reservation".to_string(),
            None,
        );
        self.ctx.effects.audit(
            actor_id.to_string(),
            "RESERVATION_REJECTED",
            json!({ "reservation_id": reservation.id, "released_seats": release_seats }),
        );
        Ok(reservation)
    }

    /// Transition: PENDING_APPROVAL → WAITLISTED
    pub async fn waitlist(
        &self,
        trip_id: Uuid,
        reservation_id: Uuid,
        actor_id: Uuid,
    ) -> SettlementResult<Reservation> {
        let mut reservation = self.ctx.load_trip_reservation(trip_id, reservation_id).await?;
        let trip = self.ctx.load_trip(trip_id).await?;

        if trip.driver_id != actor_id {
            return Err(SettlementError::Forbidden { actor: actor_id.to_string(), action: "waitlist reservation" });
        }
        if reservation.status != ReservationStatus::PendingApproval {
            return Err(SettlementError::InvalidState(format!(
                "cannot waitlist a {} reservation",
                reservation.status
            )));
        }

        self.ctx
            .store
            .apply_transition(&ReservationTransition {
                reservation_id: reservation.id,
                expected_status: ReservationStatus::PendingApproval,
                new_status: ReservationStatus::Waitlisted,
            })
            .await?;
        reservation.update_status(ReservationStatus::Waitlisted);

        info!("Reservation {} waitlisted on trip {}", reservation.id, trip.id);
        self.ctx.effects.notify(
            reservation.passenger_id,
            "Reservation waitlisted",
            "The trip is full for now; you are on the waitlist".to_string(),
            None,
        );
        Ok(reservation)
    }

    /// Transition: APPROVED → CONFIRMED, together with payment PENDING → COMPLETED
    pub async fn confirm_payment(&self, reservation_id: Uuid) -> SettlementResult<Reservation> {
        let mut reservation = self.ctx.load_reservation(reservation_id).await?;
        let payment = self.pending_payment(reservation_id).await?;

        if reservation.status != ReservationStatus::Approved {
            return Err(SettlementError::InvalidState(format!(
                "cannot confirm payment for a {} reservation",
                reservation.status
            )));
        }

        let settlement = PaymentSettlement {
            payment_id: payment.id,
            new_status: PaymentStatus::Completed,
            reservation_transition: Some(ReservationTransition {
                reservation_id: reservation.id,
                expected_status: ReservationStatus::Approved,
                new_status: ReservationStatus::Confirmed,
            }),
        };
        self.ctx.store.apply_payment_settlement(&settlement).await?;
        reservation.update_status(ReservationStatus::Confirmed);

        info!("Payment {} completed, reservation {} confirmed", payment.id, reservation.id);
        self.ctx.effects.notify(
            reservation.passenger_id,
            "Seat confirmed",
            format!("Payment of {} {} received", payment.total_amount_cents, payment.currency),
            None,
        );
        self.ctx.effects.audit(
            reservation.passenger_id.to_string(),
            "PAYMENT_COMPLETED",
            json!({ "reservation_id": reservation.id, "payment_id": payment.id }),
        );
        Ok(reservation)
    }

    /// Payment PENDING → FAILED. The reservation stays APPROVED.
    pub async fn fail_payment(&self, reservation_id: Uuid) -> SettlementResult<Payment> {
        let reservation = self.ctx.load_reservation(reservation_id).await?;
        let mut payment = self.pending_payment(reservation_id).await?;

        self.ctx
            .store
            .apply_payment_settlement(&PaymentSettlement {
                payment_id: payment.id,
                new_status: PaymentStatus::Failed,
                reservation_transition: None,
            })
            .await?;
        payment.status = PaymentStatus::Failed;
        payment.updated_at = self.ctx.now();

        info!("Payment {} for reservation {} failed", payment.id, reservation.id);
        self.ctx.effects.notify(
            reservation.passenger_id,
            "Payment failed",
            "Your payment could not be processed".to_string(),
            Some(format!("/reservations/{}/payment", reservation.id)),
        );
        Ok(payment)
    }

    async fn pending_payment(&self, reservation_id: Uuid) -> SettlementResult<Payment> {
        let payment = self
            .ctx
            .store
            .get_reservation_payment(reservation_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Payment", reservation_id))?;
        if payment.status != PaymentStatus::Pending {
            return Err(SettlementError::InvalidState(format!("payment is {}", payment.status)));
        }
        Ok(payment)
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ridepool_core::repository::{
    ReservationCancellationCommit, ReservationSettlement, SystemCancellationCommit, TripCancellationCommit,
};
use ridepool_core::{SettlementError, SettlementResult};
use ridepool_shared::{
    Cancellation, CancelledBy, Payment, PaymentStatus, Refund, RefundStatus, RefundType, Reservation,
    ReservationStatus, SettlementEvent, Trip, TripStatus,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::context::SettlementContext;
use crate::policy::{
    compute_driver_cancellation_tier, compute_passenger_refund_tier, compute_refund_amounts, hours_between,
};

/// What to cancel and why. `target_id` is a reservation for passenger
/// cancellations and a trip otherwise.
#[derive(Debug, Clone)]
pub struct CancellationRequest {
    pub target_id: Uuid,
    pub reason: String,
    pub actor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationCancellation {
    pub reservation: Reservation,
    pub refund: Option<Refund>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripCancellation {
    pub trip: Trip,
    pub affected_count: usize,
}

#[derive(Debug, Clone)]
pub enum CancellationOutcome {
    Reservation(ReservationCancellation),
    Trip(TripCancellation),
}

/// One cancellation rule set, selected by who cancelled
#[async_trait]
pub trait CancellationStrategy: Send + Sync {
    fn cancelled_by(&self) -> CancelledBy;

    async fn cancel(
        &self,
        ctx: &SettlementContext,
        request: &CancellationRequest,
    ) -> SettlementResult<CancellationOutcome>;
}

fn refund_for(
    payment: &Payment,
    reservation_id: Uuid,
    refund_percentage: u8,
    refund_type: RefundType,
    now: DateTime<Utc>,
) -> Refund {
    let amounts = compute_refund_amounts(payment.trip_price_portion(), payment.service_fee_cents, refund_percentage);
    Refund {
        id: Uuid::new_v4(),
        payment_id: payment.id,
        reservation_id,
        refund_amount_cents: amounts.refund_amount_cents,
        driver_compensation_cents: amounts.driver_compensation_cents,
        service_fee_retained_cents: amounts.service_fee_retained_cents,
        refund_type,
        status: RefundStatus::Completed,
        processed_at: now,
    }
}

pub struct PassengerCancellation;

#[async_trait]
impl CancellationStrategy for PassengerCancellation {
    fn cancelled_by(&self) -> CancelledBy {
        CancelledBy::Passenger
    }

    async fn cancel(
        &self,
        ctx: &SettlementContext,
        request: &CancellationRequest,
    ) -> SettlementResult<CancellationOutcome> {
        let mut reservation = ctx.load_reservation(request.target_id).await?;
        if reservation.status.is_cancelled() {
            return Err(SettlementError::AlreadyCancelled(reservation.status.to_string()));
        }
        if matches!(reservation.status, ReservationStatus::Rejected | ReservationStatus::Completed) {
            return Err(SettlementError::InvalidState(format!(
                "cannot cancel a {} reservation",
                reservation.status
            )));
        }

        let trip = ctx.load_trip(reservation.trip_id).await?;
        if trip.status.is_terminal() {
            return Err(SettlementError::TripNotCancellable(format!("trip is {}", trip.status)));
        }

        let now = ctx.now();
        let tier = compute_passenger_refund_tier(trip.departure_time, now, reservation.created_at);
        let mut cancellation = Cancellation::new(
            trip.id,
            Some(reservation.id),
            CancelledBy::Passenger,
            &request.reason,
            hours_between(now, trip.departure_time),
            Some(tier.refund_percentage),
        );
        cancellation.created_at = now;

        let refund = match ctx.store.get_reservation_payment(reservation.id).await? {
            Some(payment) if payment.status == PaymentStatus::Completed => Some(refund_for(
                &payment,
                reservation.id,
                tier.refund_percentage,
                tier.refund_type,
                now,
            )),
            _ => None,
        };

        let release_seats = if reservation.status.holds_seats() { reservation.seats_reserved } else { 0 };
        let commit = ReservationCancellationCommit {
            reservation_id: reservation.id,
            trip_id: trip.id,
            expected_status: reservation.status,
            new_status: tier.status,
            cancellation,
            refund: refund.clone(),
            release_seats,
        };
        let trip = ctx.store.apply_reservation_cancellation(&commit).await?;
        reservation.update_status(tier.status);

        info!(
            "Reservation {} cancelled by passenger as {} ({}% refund)",
            reservation.id, tier.status, tier.refund_percentage
        );
        let refund_cents = refund.as_ref().map(|r| r.refund_amount_cents);
        ctx.effects.notify(
            reservation.passenger_id,
            "Reservation cancelled",
            match refund_cents {
                Some(cents) => format!("Your reservation was cancelled. Refund: {} {}", cents, ctx.rules.currency),
                None => "Your reservation was cancelled".to_string(),
            },
            None,
        );
        ctx.effects.notify(
            trip.driver_id,
            "Passenger cancelled",
            format!("A passenger cancelled {} seat(s) on your trip", reservation.seats_reserved),
            Some(format!("/trips/{}", trip.id)),
        );
        ctx.effects.publish(SettlementEvent::ReservationCancelled {
            reservation_id: reservation.id,
            trip_id: trip.id,
            status: tier.status.to_string(),
            refund_cents,
            timestamp: now.timestamp(),
        });
        ctx.effects.audit(
            reservation.passenger_id.to_string(),
            "RESERVATION_CANCELLED",
            json!({
                "reservation_id": reservation.id,
                "status": tier.status,
                "refund_percentage": tier.refund_percentage,
                "refund_cents": refund_cents,
            }),
        );

        Ok(CancellationOutcome::Reservation(ReservationCancellation { reservation, refund }))
    }
}

pub struct DriverCancellation;

#[async_trait]
impl CancellationStrategy for DriverCancellation {
    fn cancelled_by(&self) -> CancelledBy {
        CancelledBy::Driver
    }

    async fn cancel(
        &self,
        ctx: &SettlementContext,
        request: &CancellationRequest,
    ) -> SettlementResult<CancellationOutcome> {
        let trip = ctx.load_trip(request.target_id).await?;
        if request.actor_id != Some(trip.driver_id) {
            return Err(SettlementError::Forbidden {
                actor: request.actor_id.map(|id| id.to_string()).unwrap_or_default(),
                action: "cancel trip",
            });
        }
        if trip.status.is_terminal() {
            return Err(SettlementError::InvalidState(format!("trip is {}", trip.status)));
        }

        let now = ctx.now();
        let tier = compute_driver_cancellation_tier(trip.departure_time, now);
        let mut cancellation = Cancellation::new(
            trip.id,
            None,
            CancelledBy::Driver,
            &request.reason,
            hours_between(now, trip.departure_time),
            None,
        );
        cancellation.created_at = now;

        let reservations = ctx.store.list_trip_reservations(trip.id).await?;
        let mut settlements = Vec::new();
        let mut passengers = Vec::new();
        for reservation in reservations.iter().filter(|r| {
            matches!(
                r.status,
                ReservationStatus::PendingApproval | ReservationStatus::Approved | ReservationStatus::Confirmed
            )
        }) {
            // The driver caused the cancellation, so passengers get the whole trip price back
            let refund = match ctx.store.get_reservation_payment(reservation.id).await? {
                Some(payment) if payment.status == PaymentStatus::Completed => {
                    Some(refund_for(&payment, reservation.id, 100, RefundType::FullRefund, now))
                }
                _ => None,
            };
            passengers.push((reservation.passenger_id, refund.as_ref().map(|r| r.refund_amount_cents)));
            settlements.push(ReservationSettlement {
                reservation_id: reservation.id,
                expected_status: reservation.status,
                new_status: tier,
                refund,
            });
        }

        let commit = TripCancellationCommit {
            trip_id: trip.id,
            expected_trip_status: trip.status,
            cancellation,
            reservations: settlements,
        };
        let trip = ctx.store.apply_trip_cancellation(&commit).await?;
        let affected_count = commit.reservations.len();

        info!("Trip {} cancelled by driver as {}, {} reservations affected", trip.id, tier, affected_count);
        for (passenger_id, refund_cents) in passengers {
            ctx.effects.notify(
                passenger_id,
                "Trip cancelled",
                match refund_cents {
                    Some(cents) => format!(
                        "The driver cancelled the trip. Refund: {} {}",
                        cents, ctx.rules.currency
                    ),
                    None => "The driver cancelled the trip".to_string(),
                },
                None,
            );
        }
        ctx.effects.publish(SettlementEvent::TripCancelled {
            trip_id: trip.id,
            cancelled_by: CancelledBy::Driver.to_string(),
            affected_reservations: affected_count,
            timestamp: now.timestamp(),
        });
        ctx.effects.audit(
            trip.driver_id.to_string(),
            "TRIP_CANCELLED",
            json!({ "trip_id": trip.id, "tier": tier, "affected_reservations": affected_count }),
        );

        Ok(CancellationOutcome::Trip(TripCancellation { trip, affected_count }))
    }
}

/// Expiry of a trip nobody paid for
pub struct SystemCancellation;

#[async_trait]
impl CancellationStrategy for SystemCancellation {
    fn cancelled_by(&self) -> CancelledBy {
        CancelledBy::System
    }

    async fn cancel(
        &self,
        ctx: &SettlementContext,
        request: &CancellationRequest,
    ) -> SettlementResult<CancellationOutcome> {
        let mut trip = ctx.load_trip(request.target_id).await?;
        if !matches!(trip.status, TripStatus::Pending | TripStatus::Active) {
            return Err(SettlementError::InvalidState(format!("trip is {}", trip.status)));
        }

        let now = ctx.now();
        let mut cancellation = Cancellation::new(trip.id, None, CancelledBy::System, &request.reason, 0.0, Some(0));
        cancellation.created_at = now;

        let commit = SystemCancellationCommit {
            trip_id: trip.id,
            cancellation,
            new_status: ReservationStatus::CancelledByDriverLate,
        };
        let affected_count = ctx.store.apply_system_cancellation(&commit).await?;
        trip.update_status(TripStatus::Cancelled);

        info!("Trip {} expired without confirmed passengers, {} reservations cancelled", trip.id, affected_count);
        ctx.effects.notify(
            trip.driver_id,
            "Trip expired",
            "Your trip ended without confirmed passengers and was cancelled".to_string(),
            Some(format!("/trips/{}", trip.id)),
        );
        ctx.effects.publish(SettlementEvent::TripCancelled {
            trip_id: trip.id,
            cancelled_by: CancelledBy::System.to_string(),
            affected_reservations: affected_count,
            timestamp: now.timestamp(),
        });
        ctx.effects.audit(
            "system".to_string(),
            "TRIP_EXPIRED",
            json!({ "trip_id": trip.id, "affected_reservations": affected_count }),
        );

        Ok(CancellationOutcome::Trip(TripCancellation { trip, affected_count }))
    }
}

/// Routes a cancellation to the strategy for its actor
#[derive(Clone)]
pub struct CancellationService {
    ctx: SettlementContext,
    passenger: Arc<dyn CancellationStrategy>,
    driver: Arc<dyn CancellationStrategy>,
    system: Arc<dyn CancellationStrategy>,
}

impl CancellationService {
    pub fn new(ctx: SettlementContext) -> Self {
        Self {
            ctx,
            passenger: Arc::new(PassengerCancellation),
            driver: Arc::new(DriverCancellation),
            system: Arc::new(SystemCancellation),
        }
    }

    pub fn strategy(&self, cancelled_by: CancelledBy) -> &dyn CancellationStrategy {
        match cancelled_by {
            CancelledBy::Passenger => self.passenger.as_ref(),
            CancelledBy::Driver => self.driver.as_ref(),
            CancelledBy::System => self.system.as_ref(),
        }
    }

    pub async fn cancel(
        &self,
        cancelled_by: CancelledBy,
        request: &CancellationRequest,
    ) -> SettlementResult<CancellationOutcome> {
        self.strategy(cancelled_by).cancel(&self.ctx, request).await
    }

    pub async fn cancel_reservation(&self, reservation_id: Uuid, reason: &str) -> SettlementResult<ReservationCancellation> {
        let request = CancellationRequest { target_id: reservation_id, reason: reason.to_string(), actor_id: None };
        match self.cancel(CancelledBy::Passenger, &request).await? {
            CancellationOutcome::Reservation(outcome) => Ok(outcome),
            CancellationOutcome::Trip(_) => Err(SettlementError::InvalidState("expected a reservation outcome".into())),
        }
    }

    pub async fn cancel_trip(&self, trip_id: Uuid, reason: &str, actor_id: Uuid) -> SettlementResult<TripCancellation> {
        let request = CancellationRequest { target_id: trip_id, reason: reason.to_string(), actor_id: Some(actor_id) };
        self.expect_trip(self.cancel(CancelledBy::Driver, &request).await?)
    }

    pub async fn expire_trip(&self, trip_id: Uuid, reason: &str) -> SettlementResult<TripCancellation> {
        let request = CancellationRequest { target_id: trip_id, reason: reason.to_string(), actor_id: None };
        self.expect_trip(self.cancel(CancelledBy::System, &request).await?)
    }

    fn expect_trip(&self, outcome: CancellationOutcome) -> SettlementResult<TripCancellation> {
        match outcome {
            CancellationOutcome::Trip(outcome) => Ok(outcome),
            CancellationOutcome::Reservation(_) => Err(SettlementError::InvalidState("expected a trip outcome".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_splits_trip_price_and_keeps_fee() {
        let payment = Payment::pending(Uuid::new_v4(), 10000, 1000, "USD");
        let refund = refund_for(&payment, payment.reservation_id, 50, RefundType::PartialRefund50, Utc::now());
        assert_eq!(refund.refund_amount_cents, 5000);
        assert_eq!(refund.driver_compensation_cents, 5000);
        assert_eq!(refund.service_fee_retained_cents, 1000);
        assert_eq!(refund.status, RefundStatus::Completed);
    }

    #[test]
    fn test_each_strategy_reports_its_actor() {
        assert_eq!(PassengerCancellation.cancelled_by(), CancelledBy::Passenger);
        assert_eq!(DriverCancellation.cancelled_by(), CancelledBy::Driver);
        assert_eq!(SystemCancellation.cancelled_by(), CancelledBy::System);
    }
}

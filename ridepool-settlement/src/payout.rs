use std::collections::HashMap;
use ridepool_core::{SettlementError, SettlementResult};
use ridepool_shared::{
    DriverPayout, FeePolicy, Payment, PaymentStatus, PayoutStatus, Reservation, ReservationStatus,
    SettlementEvent, Trip, TripStatus,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::context::SettlementContext;
use crate::policy::compute_service_fee;

/// The payout a trip would produce, before anything is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayoutCalculation {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub valid_reservations: usize,
    pub late_cancellations: usize,
    pub total_received_cents: i64,
    /// Fee components embedded in the valid payments
    pub collected_fees_cents: i64,
    pub service_fee_cents: i64,
    pub late_cancellation_penalty_cents: i64,
    pub payout_amount_cents: i64,
    pub status: PayoutStatus,
}

/// Aggregate one trip's payments and penalties.
///
/// The deducted fee is the trip-level policy fee, but never less than the
/// fees passengers already paid, so the driver only ever receives trip-price
/// money. Each late cancellation costs the driver one seat's price, whatever
/// the number of seats it held.
pub fn compute_payout(
    trip: &Trip,
    reservations: &[Reservation],
    payments: &[Payment],
    policy: Option<&FeePolicy>,
) -> PayoutCalculation {
    let payments_by_reservation: HashMap<Uuid, &Payment> =
        payments.iter().map(|p| (p.reservation_id, p)).collect();

    let valid: Vec<&Payment> = reservations
        .iter()
        .filter(|r| {
            matches!(
                r.status,
                ReservationStatus::Approved | ReservationStatus::Completed | ReservationStatus::Confirmed
            )
        })
        .filter_map(|r| payments_by_reservation.get(&r.id).copied())
        .filter(|p| p.status == PaymentStatus::Completed)
        .collect();

    let total_received_cents: i64 = valid.iter().map(|p| p.total_amount_cents).sum();
    let collected_fees_cents: i64 = valid.iter().map(|p| p.service_fee_cents).sum();
    let service_fee_cents = compute_service_fee(total_received_cents, valid.len(), policy, trip.service_fee_cents)
        .max(collected_fees_cents);

    let late_cancellations = reservations
        .iter()
        .filter(|r| r.status == ReservationStatus::CancelledLate)
        .count();
    let late_cancellation_penalty_cents = trip.price_per_seat_cents * late_cancellations as i64;

    let payout_amount_cents = (total_received_cents - service_fee_cents - late_cancellation_penalty_cents).max(0);
    let status = if payout_amount_cents == 0 { PayoutStatus::OnHold } else { PayoutStatus::Pending };

    PayoutCalculation {
        trip_id: trip.id,
        driver_id: trip.driver_id,
        valid_reservations: valid.len(),
        late_cancellations,
        total_received_cents,
        collected_fees_cents,
        service_fee_cents,
        late_cancellation_penalty_cents,
        payout_amount_cents,
        status,
    }
}

#[derive(Clone)]
pub struct PayoutCalculator {
    ctx: SettlementContext,
}

impl PayoutCalculator {
    pub fn new(ctx: SettlementContext) -> Self {
        Self { ctx }
    }

    pub async fn calculate_driver_payout(&self, trip_id: Uuid) -> SettlementResult<PayoutCalculation> {
        let trip = self.ctx.load_trip(trip_id).await?;
        self.calculate_for(&trip).await
    }

    async fn calculate_for(&self, trip: &Trip) -> SettlementResult<PayoutCalculation> {
        let reservations = self.ctx.store.list_trip_reservations(trip.id).await?;
        let payments = self.ctx.store.list_trip_payments(trip.id).await?;
        let policy = self.ctx.load_fee_policy(trip).await?;
        Ok(compute_payout(trip, &reservations, &payments, policy.as_ref()))
    }

    /// Persist the payout for a completed trip. At most one per trip.
    pub async fn create_driver_payout(&self, trip_id: Uuid) -> SettlementResult<DriverPayout> {
        let trip = self.ctx.load_trip(trip_id).await?;
        if trip.status != TripStatus::Completed {
            return Err(SettlementError::InvalidState(format!(
                "payouts require a COMPLETED trip, found {}",
                trip.status
            )));
        }
        if self.ctx.store.get_trip_payout(trip.id).await?.is_some() {
            return Err(SettlementError::AlreadyExists(format!("payout for trip {}", trip.id)));
        }

        let calc = self.calculate_for(&trip).await?;
        let payout = DriverPayout {
            id: Uuid::new_v4(),
            trip_id: trip.id,
            driver_id: trip.driver_id,
            payout_amount_cents: calc.payout_amount_cents,
            total_received_cents: calc.total_received_cents,
            service_fee_cents: calc.service_fee_cents,
            late_cancellation_penalty_cents: calc.late_cancellation_penalty_cents,
            currency: self.ctx.rules.currency.clone(),
            status: calc.status,
            created_at: self.ctx.now(),
        };

        // A concurrent creator may have won between the check and the insert
        if !self.ctx.store.insert_payout_if_absent(&payout).await? {
            return Err(SettlementError::AlreadyExists(format!("payout for trip {}", trip.id)));
        }

        info!(
            "Payout {} created for trip {}: {} cents ({})",
            payout.id, trip.id, payout.payout_amount_cents, payout.status
        );
        self.ctx.effects.notify(
            trip.driver_id,
            "Payout created",
            match payout.status {
                PayoutStatus::Pending => format!("{} {} will be paid out", payout.payout_amount_cents, payout.currency),
                PayoutStatus::OnHold => "Nothing to pay out for this trip; the payout is on hold".to_string(),
            },
            Some(format!("/trips/{}/payout", trip.id)),
        );
        self.ctx.effects.publish(SettlementEvent::PayoutCreated {
            payout_id: payout.id,
            trip_id: trip.id,
            payout_amount_cents: payout.payout_amount_cents,
            status: payout.status.to_string(),
            timestamp: payout.created_at.timestamp(),
        });
        self.ctx.effects.audit(
            "system".to_string(),
            "PAYOUT_CREATED",
            json!({ "trip_id": trip.id, "payout_id": payout.id, "calculation": calc }),
        );
        Ok(payout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ridepool_shared::FeeType;

    fn trip_at(price_per_seat_cents: i64) -> Trip {
        Trip::new(Uuid::new_v4(), price_per_seat_cents, 4, Utc::now(), Some(3600))
    }

    fn paid(trip: &Trip, status: ReservationStatus, amount_cents: i64) -> (Reservation, Payment) {
        let mut reservation = Reservation::new(trip.id, Uuid::new_v4(), 1, trip.price_per_seat_cents);
        reservation.status = status;
        let mut payment = Payment::pending(reservation.id, amount_cents, 0, "USD");
        payment.status = PaymentStatus::Completed;
        (reservation, payment)
    }

    fn late(trip: &Trip, seats: i32) -> Reservation {
        let mut reservation = Reservation::new(trip.id, Uuid::new_v4(), seats, trip.price_per_seat_cents);
        reservation.status = ReservationStatus::CancelledLate;
        reservation
    }

    #[test]
    fn test_payout_with_minimum_fee_and_late_penalties() {
        let trip = trip_at(10000);
        let mut reservations = Vec::new();
        let mut payments = Vec::new();
        for _ in 0..5 {
            let (r, p) = paid(&trip, ReservationStatus::Completed, 10000);
            reservations.push(r);
            payments.push(p);
        }
        reservations.push(late(&trip, 1));
        // Multi-seat late cancellations still cost one seat
        reservations.push(late(&trip, 3));

        let policy = FeePolicy::new(FeeType::Percentage, 10.0).with_bounds(Some(6000), None);
        let calc = compute_payout(&trip, &reservations, &payments, Some(&policy));

        assert_eq!(calc.total_received_cents, 50000);
        assert_eq!(calc.service_fee_cents, 6000);
        assert_eq!(calc.late_cancellation_penalty_cents, 20000);
        assert_eq!(calc.payout_amount_cents, 24000);
        assert_eq!(calc.status, PayoutStatus::Pending);
    }

    #[test]
    fn test_fee_deduction_covers_fees_passengers_paid() {
        let mut trip = trip_at(10000);
        trip.service_fee_cents = Some(1000);
        let mut reservations = Vec::new();
        let mut payments = Vec::new();
        for _ in 0..2 {
            let (r, mut p) = paid(&trip, ReservationStatus::Completed, 11000);
            p.service_fee_cents = 1000;
            reservations.push(r);
            payments.push(p);
        }

        let calc = compute_payout(&trip, &reservations, &payments, None);
        assert_eq!(calc.total_received_cents, 22000);
        assert_eq!(calc.collected_fees_cents, 2000);
        assert_eq!(calc.service_fee_cents, 2000);
        assert_eq!(calc.payout_amount_cents, 20000);
    }

    #[test]
    fn test_nothing_received_puts_payout_on_hold() {
        let trip = trip_at(10000);
        let reservations = vec![late(&trip, 1)];
        let calc = compute_payout(&trip, &reservations, &[], None);
        assert_eq!(calc.payout_amount_cents, 0);
        assert_eq!(calc.status, PayoutStatus::OnHold);
    }

    #[test]
    fn test_unpaid_and_refunded_reservations_are_not_counted() {
        let trip = trip_at(10000);
        let (approved_unpaid, mut pending) = paid(&trip, ReservationStatus::Approved, 10000);
        pending.status = PaymentStatus::Pending;
        let (refunded, mut refunded_payment) = paid(&trip, ReservationStatus::CancelledEarly, 10000);
        refunded_payment.status = PaymentStatus::Refunded;
        let (confirmed, confirmed_payment) = paid(&trip, ReservationStatus::Confirmed, 11000);

        let calc = compute_payout(
            &trip,
            &[approved_unpaid, refunded, confirmed],
            &[pending, refunded_payment, confirmed_payment],
            None,
        );
        assert_eq!(calc.valid_reservations, 1);
        assert_eq!(calc.total_received_cents, 11000);
    }

    #[test]
    fn test_recomputation_is_deterministic() {
        let trip = trip_at(2500);
        let (r, p) = paid(&trip, ReservationStatus::Completed, 2750);
        let policy = FeePolicy::new(FeeType::PerSeat, 300.0);
        let first = compute_payout(&trip, &[r.clone()], &[p.clone()], Some(&policy));
        let second = compute_payout(&trip, &[r], &[p], Some(&policy));
        assert_eq!(first, second);
        assert_eq!(first.service_fee_cents, 300);
    }
}

use std::collections::{HashMap, HashSet};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;
use ridepool_core::repository::{
    ApprovalCommit, PaymentSettlement, RejectionCommit, ReservationCancellationCommit, ReservationTransition,
    SystemCancellationCommit, TripCancellationCommit, TripCompletionCommit,
};
use ridepool_core::{SettlementStore, StoreError, StoreResult};
use ridepool_shared::{
    Cancellation, DriverPayout, FeePolicy, Payment, PaymentStatus, Refund, Reservation, ReservationStatus,
    Trip, TripStatus,
};

#[derive(Default)]
struct MemoryState {
    trips: HashMap<Uuid, Trip>,
    fee_policies: HashMap<Uuid, FeePolicy>,
    reservations: HashMap<Uuid, Reservation>,
    payments: HashMap<Uuid, Payment>,
    cancellations: Vec<Cancellation>,
    /// Keyed by payment id
    refunds: HashMap<Uuid, Refund>,
    /// Keyed by trip id
    payouts: HashMap<Uuid, DriverPayout>,
}

impl MemoryState {
    fn trip(&self, id: Uuid) -> StoreResult<&Trip> {
        self.trips.get(&id).ok_or(StoreError::NotFound { entity: "Trip", id })
    }

    fn reservation(&self, id: Uuid) -> StoreResult<&Reservation> {
        self.reservations.get(&id).ok_or(StoreError::NotFound { entity: "Reservation", id })
    }

    fn payment_id_for(&self, reservation_id: Uuid) -> Option<Uuid> {
        self.payments.values().find(|p| p.reservation_id == reservation_id).map(|p| p.id)
    }

    fn trip_reservations(&self, trip_id: Uuid) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().filter(move |r| r.trip_id == trip_id)
    }

    fn expect_reservation(&self, id: Uuid, expected: ReservationStatus) -> StoreResult<&Reservation> {
        let reservation = self.reservation(id)?;
        if reservation.status != expected {
            return Err(StoreError::Conflict(format!(
                "reservation {} is {}, expected {}",
                id, reservation.status, expected
            )));
        }
        Ok(reservation)
    }

    fn expect_refundable(&self, refund: &Refund) -> StoreResult<()> {
        let payment = self
            .payments
            .get(&refund.payment_id)
            .ok_or(StoreError::NotFound { entity: "Payment", id: refund.payment_id })?;
        if payment.status != PaymentStatus::Completed {
            return Err(StoreError::Conflict(format!("payment {} is {}", payment.id, payment.status)));
        }
        if self.refunds.contains_key(&refund.payment_id) {
            return Err(StoreError::Duplicate(format!("refund for payment {}", refund.payment_id)));
        }
        Ok(())
    }

    fn set_reservation_status(&mut self, id: Uuid, status: ReservationStatus) {
        if let Some(reservation) = self.reservations.get_mut(&id) {
            reservation.update_status(status);
        }
    }

    fn record_refund(&mut self, refund: &Refund) {
        if let Some(payment) = self.payments.get_mut(&refund.payment_id) {
            payment.status = PaymentStatus::Refunded;
            payment.updated_at = refund.processed_at;
        }
        self.refunds.insert(refund.payment_id, refund.clone());
    }

    /// An unpaid payment of a reservation that left the trip can never complete
    fn fail_pending_payment(&mut self, reservation_id: Uuid, at: DateTime<Utc>) {
        if let Some(payment) = self
            .payments
            .values_mut()
            .find(|p| p.reservation_id == reservation_id && p.status == PaymentStatus::Pending)
        {
            payment.status = PaymentStatus::Failed;
            payment.updated_at = at;
        }
    }

    fn trip_mut(&mut self, id: Uuid) -> StoreResult<&mut Trip> {
        self.trips.get_mut(&id).ok_or(StoreError::NotFound { entity: "Trip", id })
    }
}

/// Process-local store. One mutex guards everything, so every `apply_*`
/// validates all of its expectations and then mutates under the same guard.
#[derive(Default)]
pub struct InMemorySettlementStore {
    state: Mutex<MemoryState>,
}

impl InMemorySettlementStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for InMemorySettlementStore {
    async fn insert_trip(&self, trip: &Trip) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.trips.contains_key(&trip.id) {
            return Err(StoreError::Duplicate(format!("trip {}", trip.id)));
        }
        state.trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> StoreResult<Option<Trip>> {
        Ok(self.state.lock().await.trips.get(&id).cloned())
    }

    async fn insert_fee_policy(&self, policy: &FeePolicy) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        if state.fee_policies.contains_key(&policy.id) {
            return Err(StoreError::Duplicate(format!("fee policy {}", policy.id)));
        }
        state.fee_policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_fee_policy(&self, id: Uuid) -> StoreResult<Option<FeePolicy>> {
        Ok(self.state.lock().await.fee_policies.get(&id).cloned())
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let trip = state.trip(reservation.trip_id)?;
        if trip.status.is_terminal() {
            return Err(StoreError::Conflict(format!("trip {} is not open for reservations", trip.id)));
        }
        if state.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(format!("reservation {}", reservation.id)));
        }
        state.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn list_trip_reservations(&self, trip_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let state = self.state.lock().await;
        let mut reservations: Vec<Reservation> = state.trip_reservations(trip_id).cloned().collect();
        reservations.sort_by_key(|r| r.created_at);
        Ok(reservations)
    }

    async fn get_reservation_payment(&self, reservation_id: Uuid) -> StoreResult<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.values().find(|p| p.reservation_id == reservation_id).cloned())
    }

    async fn list_trip_payments(&self, trip_id: Uuid) -> StoreResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let reservation_ids: HashSet<Uuid> = state.trip_reservations(trip_id).map(|r| r.id).collect();
        Ok(state
            .payments
            .values()
            .filter(|p| reservation_ids.contains(&p.reservation_id))
            .cloned()
            .collect())
    }

    async fn list_trip_cancellations(&self, trip_id: Uuid) -> StoreResult<Vec<Cancellation>> {
        let state = self.state.lock().await;
        Ok(state.cancellations.iter().filter(|c| c.trip_id == trip_id).cloned().collect())
    }

    async fn get_payment_refund(&self, payment_id: Uuid) -> StoreResult<Option<Refund>> {
        Ok(self.state.lock().await.refunds.get(&payment_id).cloned())
    }

    async fn list_departed_active_trips(&self, now: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
        let state = self.state.lock().await;
        let mut trips: Vec<Trip> = state
            .trips
            .values()
            .filter(|t| t.status == TripStatus::Active && t.departure_time <= now)
            .cloned()
            .collect();
        trips.sort_by_key(|t| t.departure_time);
        Ok(trips)
    }

    async fn get_trip_payout(&self, trip_id: Uuid) -> StoreResult<Option<DriverPayout>> {
        Ok(self.state.lock().await.payouts.get(&trip_id).cloned())
    }

    async fn apply_approval(&self, commit: &ApprovalCommit) -> StoreResult<Trip> {
        let mut state = self.state.lock().await;

        let trip = state.trip(commit.trip_id)?;
        if trip.status.is_terminal() {
            return Err(StoreError::Conflict(format!("trip {} is {}", trip.id, trip.status)));
        }
        if trip.remaining_seats < commit.seats {
            return Err(StoreError::CapacityExceeded { requested: commit.seats, available: trip.remaining_seats });
        }
        state.expect_reservation(commit.reservation_id, commit.expected_status)?;
        if state.payment_id_for(commit.reservation_id).is_some() {
            return Err(StoreError::Duplicate(format!("payment for reservation {}", commit.reservation_id)));
        }

        let trip = state.trip_mut(commit.trip_id)?;
        trip.hold_seats(commit.seats);
        let trip = trip.clone();
        if let Some(reservation) = state.reservations.get_mut(&commit.reservation_id) {
            reservation.update_status(ReservationStatus::Approved);
            reservation.approved_at = Some(commit.approved_at);
        }
        state.payments.insert(commit.payment.id, commit.payment.clone());
        Ok(trip)
    }

    async fn apply_rejection(&self, commit: &RejectionCommit) -> StoreResult<Trip> {
        let mut state = self.state.lock().await;
        state.trip(commit.trip_id)?;
        state.expect_reservation(commit.reservation_id, commit.expected_status)?;

        if let Some(reservation) = state.reservations.get_mut(&commit.reservation_id) {
            reservation.update_status(ReservationStatus::Rejected);
            reservation.approved_at = None;
        }
        state.fail_pending_payment(commit.reservation_id, Utc::now());
        let trip = state.trip_mut(commit.trip_id)?;
        if commit.release_seats > 0 {
            trip.release_seats(commit.release_seats);
        }
        Ok(trip.clone())
    }

    async fn apply_transition(&self, transition: &ReservationTransition) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.expect_reservation(transition.reservation_id, transition.expected_status)?;
        state.set_reservation_status(transition.reservation_id, transition.new_status);
        Ok(())
    }

    async fn apply_payment_settlement(&self, settlement: &PaymentSettlement) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let payment = state
            .payments
            .get(&settlement.payment_id)
            .ok_or(StoreError::NotFound { entity: "Payment", id: settlement.payment_id })?;
        if payment.status != PaymentStatus::Pending {
            return Err(StoreError::Conflict(format!("payment {} is {}", payment.id, payment.status)));
        }
        if let Some(transition) = &settlement.reservation_transition {
            state.expect_reservation(transition.reservation_id, transition.expected_status)?;
        }

        if let Some(payment) = state.payments.get_mut(&settlement.payment_id) {
            payment.status = settlement.new_status;
            payment.updated_at = Utc::now();
        }
        if let Some(transition) = &settlement.reservation_transition {
            state.set_reservation_status(transition.reservation_id, transition.new_status);
        }
        Ok(())
    }

    async fn apply_reservation_cancellation(&self, commit: &ReservationCancellationCommit) -> StoreResult<Trip> {
        let mut state = self.state.lock().await;
        let trip = state.trip(commit.trip_id)?;
        if trip.status.is_terminal() {
            return Err(StoreError::Conflict(format!("trip {} is {}", trip.id, trip.status)));
        }
        state.expect_reservation(commit.reservation_id, commit.expected_status)?;
        if let Some(refund) = &commit.refund {
            state.expect_refundable(refund)?;
        }

        state.set_reservation_status(commit.reservation_id, commit.new_status);
        state.cancellations.push(commit.cancellation.clone());
        if let Some(refund) = &commit.refund {
            state.record_refund(refund);
        }
        state.fail_pending_payment(commit.reservation_id, commit.cancellation.created_at);
        let trip = state.trip_mut(commit.trip_id)?;
        if commit.release_seats > 0 {
            trip.release_seats(commit.release_seats);
        }
        Ok(trip.clone())
    }

    async fn apply_trip_cancellation(&self, commit: &TripCancellationCommit) -> StoreResult<Trip> {
        let mut state = self.state.lock().await;
        let trip = state.trip(commit.trip_id)?;
        if trip.status != commit.expected_trip_status {
            return Err(StoreError::Conflict(format!(
                "trip {} is {}, expected {}",
                trip.id, trip.status, commit.expected_trip_status
            )));
        }

        let active: HashSet<Uuid> = state
            .trip_reservations(commit.trip_id)
            .filter(|r| {
                matches!(
                    r.status,
                    ReservationStatus::PendingApproval | ReservationStatus::Approved | ReservationStatus::Confirmed
                )
            })
            .map(|r| r.id)
            .collect();
        let covered: HashSet<Uuid> = commit.reservations.iter().map(|r| r.reservation_id).collect();
        if active != covered {
            return Err(StoreError::Conflict(format!("reservations of trip {} changed", commit.trip_id)));
        }
        for settlement in &commit.reservations {
            state.expect_reservation(settlement.reservation_id, settlement.expected_status)?;
            if let Some(refund) = &settlement.refund {
                state.expect_refundable(refund)?;
            }
        }

        for settlement in &commit.reservations {
            state.set_reservation_status(settlement.reservation_id, settlement.new_status);
            if let Some(refund) = &settlement.refund {
                state.record_refund(refund);
            }
            state.fail_pending_payment(settlement.reservation_id, commit.cancellation.created_at);
        }
        state.cancellations.push(commit.cancellation.clone());
        let trip = state.trip_mut(commit.trip_id)?;
        trip.update_status(TripStatus::Cancelled);
        Ok(trip.clone())
    }

    async fn apply_system_cancellation(&self, commit: &SystemCancellationCommit) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let trip = state.trip(commit.trip_id)?;
        if !matches!(trip.status, TripStatus::Pending | TripStatus::Active) {
            return Err(StoreError::Conflict(format!("trip {} is {}", trip.id, trip.status)));
        }
        if state
            .trip_reservations(commit.trip_id)
            .any(|r| r.status == ReservationStatus::Confirmed)
        {
            return Err(StoreError::Conflict(format!("trip {} has confirmed passengers", commit.trip_id)));
        }

        let affected: Vec<Uuid> = state
            .trip_reservations(commit.trip_id)
            .filter(|r| {
                matches!(
                    r.status,
                    ReservationStatus::PendingApproval | ReservationStatus::Approved | ReservationStatus::Waitlisted
                )
            })
            .map(|r| r.id)
            .collect();
        for id in &affected {
            state.set_reservation_status(*id, commit.new_status);
            state.fail_pending_payment(*id, commit.cancellation.created_at);
        }
        state.cancellations.push(commit.cancellation.clone());
        state.trip_mut(commit.trip_id)?.update_status(TripStatus::Cancelled);
        Ok(affected.len())
    }

    async fn apply_trip_completion(&self, commit: &TripCompletionCommit) -> StoreResult<usize> {
        let mut state = self.state.lock().await;
        let trip = state.trip(commit.trip_id)?;
        if trip.status != TripStatus::Active {
            return Err(StoreError::Conflict(format!("trip {} is {}", trip.id, trip.status)));
        }
        if !state
            .trip_reservations(commit.trip_id)
            .any(|r| r.status == ReservationStatus::Confirmed)
        {
            return Err(StoreError::Conflict(format!("trip {} has no confirmed passengers", commit.trip_id)));
        }

        let completed: Vec<Uuid> = state
            .trip_reservations(commit.trip_id)
            .filter(|r| matches!(r.status, ReservationStatus::Approved | ReservationStatus::Confirmed))
            .map(|r| r.id)
            .collect();
        for id in &completed {
            state.set_reservation_status(*id, ReservationStatus::Completed);
        }
        state.trip_mut(commit.trip_id)?.update_status(TripStatus::Completed);
        Ok(completed.len())
    }

    async fn insert_payout_if_absent(&self, payout: &DriverPayout) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.payouts.contains_key(&payout.trip_id) {
            return Ok(false);
        }
        state.payouts.insert(payout.trip_id, payout.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn seeded(seats: i32) -> (InMemorySettlementStore, Trip, Reservation) {
        let store = InMemorySettlementStore::new();
        let trip = Trip::new(Uuid::new_v4(), 10000, seats, Utc::now() + Duration::days(2), Some(3600));
        store.insert_trip(&trip).await.unwrap();
        let reservation = Reservation::new(trip.id, Uuid::new_v4(), 2, trip.price_per_seat_cents);
        store.insert_reservation(&reservation).await.unwrap();
        (store, trip, reservation)
    }

    fn approval(trip: &Trip, reservation: &Reservation) -> ApprovalCommit {
        ApprovalCommit {
            reservation_id: reservation.id,
            trip_id: trip.id,
            expected_status: ReservationStatus::PendingApproval,
            seats: reservation.seats_reserved,
            approved_at: Utc::now(),
            payment: Payment::pending(reservation.id, reservation.total_price_cents, 1000, "USD"),
        }
    }

    #[tokio::test]
    async fn test_approval_decrements_seats_and_creates_payment() {
        let (store, trip, reservation) = seeded(2).await;

        let updated = store.apply_approval(&approval(&trip, &reservation)).await.unwrap();
        assert_eq!(updated.remaining_seats, 0);
        assert!(updated.is_full);

        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Approved);
        assert!(stored.approved_at.is_some());
        let payment = store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_approval_guards_capacity_without_partial_writes() {
        let (store, trip, reservation) = seeded(1).await;

        let err = store.apply_approval(&approval(&trip, &reservation)).await.unwrap_err();
        assert!(matches!(err, StoreError::CapacityExceeded { requested: 2, available: 1 }));

        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::PendingApproval);
        assert!(store.get_reservation_payment(reservation.id).await.unwrap().is_none());
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().remaining_seats, 1);
    }

    #[tokio::test]
    async fn test_stale_expected_status_conflicts() {
        let (store, trip, reservation) = seeded(4).await;
        store.apply_approval(&approval(&trip, &reservation)).await.unwrap();

        let err = store.apply_approval(&approval(&trip, &reservation)).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().remaining_seats, 2);
    }

    #[tokio::test]
    async fn test_rejection_releases_seats_and_fails_pending_payment() {
        let (store, trip, reservation) = seeded(2).await;
        store.apply_approval(&approval(&trip, &reservation)).await.unwrap();

        let updated = store
            .apply_rejection(&RejectionCommit {
                reservation_id: reservation.id,
                trip_id: trip.id,
                expected_status: ReservationStatus::Approved,
                release_seats: 2,
            })
            .await
            .unwrap();
        assert_eq!(updated.remaining_seats, 2);
        assert!(!updated.is_full);

        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert!(stored.approved_at.is_none());
        let payment = store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_payout_insert_is_at_most_once() {
        let (store, trip, _) = seeded(2).await;
        let payout = DriverPayout {
            id: Uuid::new_v4(),
            trip_id: trip.id,
            driver_id: trip.driver_id,
            payout_amount_cents: 0,
            total_received_cents: 0,
            service_fee_cents: 0,
            late_cancellation_penalty_cents: 0,
            currency: "USD".into(),
            status: ridepool_shared::PayoutStatus::OnHold,
            created_at: Utc::now(),
        };
        assert!(store.insert_payout_if_absent(&payout).await.unwrap());

        let retry = DriverPayout { id: Uuid::new_v4(), ..payout.clone() };
        assert!(!store.insert_payout_if_absent(&retry).await.unwrap());
        assert_eq!(store.get_trip_payout(trip.id).await.unwrap().unwrap().id, payout.id);
    }

    #[tokio::test]
    async fn test_system_cancellation_refuses_confirmed_passengers() {
        let (store, trip, reservation) = seeded(2).await;
        store.apply_approval(&approval(&trip, &reservation)).await.unwrap();
        let payment = store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
        store
            .apply_payment_settlement(&PaymentSettlement {
                payment_id: payment.id,
                new_status: PaymentStatus::Completed,
                reservation_transition: Some(ReservationTransition {
                    reservation_id: reservation.id,
                    expected_status: ReservationStatus::Approved,
                    new_status: ReservationStatus::Confirmed,
                }),
            })
            .await
            .unwrap();

        let commit = SystemCancellationCommit {
            trip_id: trip.id,
            cancellation: Cancellation::new(trip.id, None, ridepool_shared::CancelledBy::System, "expired", 0.0, Some(0)),
            new_status: ReservationStatus::CancelledByDriverLate,
        };
        let err = store.apply_system_cancellation(&commit).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_trip(trip.id).await.unwrap().unwrap().status, TripStatus::Active);
        assert!(store.list_trip_cancellations(trip.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_system_cancellation_fails_unpaid_payments() {
        let (store, trip, reservation) = seeded(2).await;
        store.apply_approval(&approval(&trip, &reservation)).await.unwrap();

        let commit = SystemCancellationCommit {
            trip_id: trip.id,
            cancellation: Cancellation::new(trip.id, None, ridepool_shared::CancelledBy::System, "expired", 0.0, Some(0)),
            new_status: ReservationStatus::CancelledByDriverLate,
        };
        assert_eq!(store.apply_system_cancellation(&commit).await.unwrap(), 1);

        let payment = store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_trip_refuses_new_reservations() {
        let store = InMemorySettlementStore::new();
        let mut trip = Trip::new(Uuid::new_v4(), 10000, 3, Utc::now() + Duration::days(2), Some(3600));
        trip.update_status(TripStatus::Cancelled);
        store.insert_trip(&trip).await.unwrap();

        let reservation = Reservation::new(trip.id, Uuid::new_v4(), 1, trip.price_per_seat_cents);
        let err = store.insert_reservation(&reservation).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(store.get_reservation(reservation.id).await.unwrap().is_none());
    }
}

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use ridepool_core::repository::{
    ApprovalCommit, PaymentSettlement, RejectionCommit, ReservationCancellationCommit, ReservationTransition,
    SystemCancellationCommit, TripCancellationCommit, TripCompletionCommit,
};
use ridepool_core::{
    ActionStatus, AuditLogger, EventPublisher, FixedClock, NoopTripLock, Notifier, SettlementRules, SettlementStore,
    StoreError, StoreResult, TripLock,
};
use ridepool_settlement::{SettlementContext, SettlementEngine, SideEffects, TripOffer};
use ridepool_shared::{
    Cancellation, DriverPayout, FeePolicy, Payment, Refund, Reservation, SettlementEvent, Trip,
};
use ridepool_store::InMemorySettlementStore;
use uuid::Uuid;

pub const PRICE_PER_SEAT: i64 = 10_000;
pub const FLAT_FEE: i64 = 1_000;

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub status: ActionStatus,
}

/// Captures every side effect so tests can assert on them
#[derive(Default)]
pub struct Recorder {
    pub notifications: Mutex<Vec<SentNotification>>,
    pub audit: Mutex<Vec<AuditEntry>>,
    pub events: Mutex<Vec<SettlementEvent>>,
}

impl Recorder {
    pub fn notifications_for(&self, user_id: Uuid) -> Vec<SentNotification> {
        self.notifications.lock().unwrap().iter().filter(|n| n.user_id == user_id).cloned().collect()
    }

    pub fn actions(&self) -> Vec<String> {
        self.audit.lock().unwrap().iter().map(|a| a.action.clone()).collect()
    }

    pub fn events(&self) -> Vec<SettlementEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(
        &self,
        user_id: Uuid,
        title: &str,
        message: &str,
        _link: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.notifications.lock().unwrap().push(SentNotification {
            user_id,
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl AuditLogger for Recorder {
    async fn log_action(
        &self,
        actor: &str,
        action: &str,
        status: ActionStatus,
        _details: serde_json::Value,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.audit.lock().unwrap().push(AuditEntry {
            actor: actor.to_string(),
            action: action.to_string(),
            status,
        });
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for Recorder {
    async fn publish(&self, event: &SettlementEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Every delivery fails
pub struct BrokenNotifier;

#[async_trait]
impl Notifier for BrokenNotifier {
    async fn notify(
        &self,
        _user_id: Uuid,
        _title: &str,
        _message: &str,
        _link: Option<&str>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("smtp relay unreachable".into())
    }
}

/// Claim always held by someone else
pub struct HeldTripLock;

#[async_trait]
impl TripLock for HeldTripLock {
    async fn try_claim(&self, _trip_id: Uuid, _ttl_seconds: u64) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(false)
    }

    async fn release(&self, _trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Lock backend that is down for one trip only
pub struct FailingTripLock {
    pub failing_trip: Uuid,
}

#[async_trait]
impl TripLock for FailingTripLock {
    async fn try_claim(&self, trip_id: Uuid, _ttl_seconds: u64) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        if trip_id == self.failing_trip {
            return Err("connection reset by peer".into());
        }
        Ok(true)
    }

    async fn release(&self, _trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Claims that stay held until released, like the Redis lock without a TTL
#[derive(Default)]
pub struct ClaimRegistry {
    held: Mutex<HashSet<Uuid>>,
}

impl ClaimRegistry {
    pub fn is_held(&self, trip_id: Uuid) -> bool {
        self.held.lock().unwrap().contains(&trip_id)
    }
}

#[async_trait]
impl TripLock for ClaimRegistry {
    async fn try_claim(&self, trip_id: Uuid, _ttl_seconds: u64) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.held.lock().unwrap().insert(trip_id))
    }

    async fn release(&self, trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.held.lock().unwrap().remove(&trip_id);
        Ok(())
    }
}

/// In-memory store whose next `completion_failures` trip completions lose a race
pub struct FlakyCompletionStore {
    inner: Arc<InMemorySettlementStore>,
    completion_failures: AtomicUsize,
}

#[async_trait]
impl SettlementStore for FlakyCompletionStore {
    async fn insert_trip(&self, trip: &Trip) -> StoreResult<()> {
        self.inner.insert_trip(trip).await
    }

    async fn get_trip(&self, id: Uuid) -> StoreResult<Option<Trip>> {
        self.inner.get_trip(id).await
    }

    async fn insert_fee_policy(&self, policy: &FeePolicy) -> StoreResult<()> {
        self.inner.insert_fee_policy(policy).await
    }

    async fn get_fee_policy(&self, id: Uuid) -> StoreResult<Option<FeePolicy>> {
        self.inner.get_fee_policy(id).await
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> StoreResult<()> {
        self.inner.insert_reservation(reservation).await
    }

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        self.inner.get_reservation(id).await
    }

    async fn list_trip_reservations(&self, trip_id: Uuid) -> StoreResult<Vec<Reservation>> {
        self.inner.list_trip_reservations(trip_id).await
    }

    async fn get_reservation_payment(&self, reservation_id: Uuid) -> StoreResult<Option<Payment>> {
        self.inner.get_reservation_payment(reservation_id).await
    }

    async fn list_trip_payments(&self, trip_id: Uuid) -> StoreResult<Vec<Payment>> {
        self.inner.list_trip_payments(trip_id).await
    }

    async fn list_trip_cancellations(&self, trip_id: Uuid) -> StoreResult<Vec<Cancellation>> {
        self.inner.list_trip_cancellations(trip_id).await
    }

    async fn get_payment_refund(&self, payment_id: Uuid) -> StoreResult<Option<Refund>> {
        self.inner.get_payment_refund(payment_id).await
    }

    async fn list_departed_active_trips(&self, now: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
        self.inner.list_departed_active_trips(now).await
    }

    async fn get_trip_payout(&self, trip_id: Uuid) -> StoreResult<Option<DriverPayout>> {
        self.inner.get_trip_payout(trip_id).await
    }

    async fn apply_approval(&self, commit: &ApprovalCommit) -> StoreResult<Trip> {
        self.inner.apply_approval(commit).await
    }

    async fn apply_rejection(&self, commit: &RejectionCommit) -> StoreResult<Trip> {
        self.inner.apply_rejection(commit).await
    }

    async fn apply_transition(&self, transition: &ReservationTransition) -> StoreResult<()> {
        self.inner.apply_transition(transition).await
    }

    async fn apply_payment_settlement(&self, settlement: &PaymentSettlement) -> StoreResult<()> {
        self.inner.apply_payment_settlement(settlement).await
    }

    async fn apply_reservation_cancellation(&self, commit: &ReservationCancellationCommit) -> StoreResult<Trip> {
        self.inner.apply_reservation_cancellation(commit).await
    }

    async fn apply_trip_cancellation(&self, commit: &TripCancellationCommit) -> StoreResult<Trip> {
        self.inner.apply_trip_cancellation(commit).await
    }

    async fn apply_system_cancellation(&self, commit: &SystemCancellationCommit) -> StoreResult<usize> {
        self.inner.apply_system_cancellation(commit).await
    }

    async fn apply_trip_completion(&self, commit: &TripCompletionCommit) -> StoreResult<usize> {
        let remaining = self.completion_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.completion_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StoreError::Conflict(format!("trip {} changed concurrently", commit.trip_id)));
        }
        self.inner.apply_trip_completion(commit).await
    }

    async fn insert_payout_if_absent(&self, payout: &DriverPayout) -> StoreResult<bool> {
        self.inner.insert_payout_if_absent(payout).await
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
}

pub struct Harness {
    pub engine: SettlementEngine,
    pub store: Arc<InMemorySettlementStore>,
    pub clock: Arc<FixedClock>,
    pub recorder: Arc<Recorder>,
}

pub struct HarnessBuilder {
    lock: Arc<dyn TripLock>,
    notifier: Option<Arc<dyn Notifier>>,
    rules: SettlementRules,
    completion_failures: usize,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            lock: Arc::new(NoopTripLock),
            notifier: None,
            rules: SettlementRules::default(),
            completion_failures: 0,
        }
    }

    pub fn completion_failures(mut self, failures: usize) -> Self {
        self.completion_failures = failures;
        self
    }

    pub fn lock(mut self, lock: Arc<dyn TripLock>) -> Self {
        self.lock = lock;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(InMemorySettlementStore::new());
        let clock = Arc::new(FixedClock::new(start_time()));
        let recorder = Arc::new(Recorder::default());
        let notifier: Arc<dyn Notifier> = self.notifier.unwrap_or_else(|| recorder.clone() as Arc<dyn Notifier>);
        let effects = SideEffects::new(notifier, recorder.clone(), recorder.clone());
        let backend: Arc<dyn SettlementStore> = if self.completion_failures > 0 {
            Arc::new(FlakyCompletionStore {
                inner: store.clone(),
                completion_failures: AtomicUsize::new(self.completion_failures),
            })
        } else {
            store.clone()
        };
        let ctx = SettlementContext::new(backend, effects, clock.clone(), self.rules);
        Harness { engine: SettlementEngine::new(ctx, self.lock), store, clock, recorder }
    }
}

impl Harness {
    pub fn new() -> Self {
        HarnessBuilder::new().build()
    }

    pub fn now(&self) -> DateTime<Utc> {
        use ridepool_core::Clock;
        self.clock.now()
    }

    /// Trip with a flat fee, departing `hours` from now, lasting one hour
    pub async fn offer(&self, seats: i32, hours: i64) -> Trip {
        self.offer_with(seats, hours, Some(3600), None).await
    }

    pub async fn offer_with(
        &self,
        seats: i32,
        hours: i64,
        duration_seconds: Option<i64>,
        fee_policy: Option<FeePolicy>,
    ) -> Trip {
        let service_fee_cents = if fee_policy.is_some() { None } else { Some(FLAT_FEE) };
        self.engine
            .offer_trip(TripOffer {
                driver_id: Uuid::new_v4(),
                price_per_seat_cents: PRICE_PER_SEAT,
                seats,
                departure_time: self.now() + Duration::hours(hours),
                duration_seconds,
                service_fee_cents,
                fee_policy,
            })
            .await
            .unwrap()
    }

    pub async fn approved(&self, trip: &Trip, seats: i32) -> Reservation {
        let reservation = self.engine.request_reservation(trip.id, Uuid::new_v4(), seats).await.unwrap();
        self.engine.approve_reservation(trip.id, reservation.id, trip.driver_id).await.unwrap()
    }

    pub async fn confirmed(&self, trip: &Trip, seats: i32) -> Reservation {
        let reservation = self.approved(trip, seats).await;
        self.engine.confirm_payment(reservation.id).await.unwrap()
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Lets the spawned side-effect tasks run
    pub async fn settle_effects(&self) {
        tokio::time::sleep(StdDuration::from_millis(50)).await;
    }

    pub async fn assert_seat_invariant(&self, trip_id: Uuid) -> Trip {
        let trip = self.engine.get_trip(trip_id).await.unwrap();
        assert!(trip.remaining_seats >= 0, "negative seat count on {}", trip.id);
        assert_eq!(trip.is_full, trip.remaining_seats == 0);
        trip
    }
}

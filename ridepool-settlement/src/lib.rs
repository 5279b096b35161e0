pub mod cancellation;
pub mod context;
pub mod effects;
pub mod payout;
pub mod policy;
pub mod reservation;
pub mod scheduler;

use std::sync::Arc;
use chrono::{DateTime, Utc};
use ridepool_core::{SettlementError, SettlementResult, TripLock};
use ridepool_shared::{DriverPayout, FeePolicy, Payment, Reservation, Trip};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub use cancellation::{CancellationService, ReservationCancellation, TripCancellation};
pub use context::SettlementContext;
pub use effects::SideEffects;
pub use payout::{PayoutCalculation, PayoutCalculator};
pub use reservation::ReservationManager;
pub use scheduler::{CompletionScheduler, CompletionSummary};

/// A driver's offer of a new trip
#[derive(Debug, Clone)]
pub struct TripOffer {
    pub driver_id: Uuid,
    pub price_per_seat_cents: i64,
    pub seats: i32,
    pub departure_time: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub service_fee_cents: Option<i64>,
    pub fee_policy: Option<FeePolicy>,
}

/// Entry point for every settlement operation
#[derive(Clone)]
pub struct SettlementEngine {
    ctx: SettlementContext,
    reservations: ReservationManager,
    cancellations: CancellationService,
    payouts: PayoutCalculator,
    scheduler: CompletionScheduler,
}

impl SettlementEngine {
    pub fn new(ctx: SettlementContext, lock: Arc<dyn TripLock>) -> Self {
        let reservations = ReservationManager::new(ctx.clone());
        let cancellations = CancellationService::new(ctx.clone());
        let payouts = PayoutCalculator::new(ctx.clone());
        let scheduler = CompletionScheduler::new(ctx.clone(), cancellations.clone(), payouts.clone(), lock);
        Self { ctx, reservations, cancellations, payouts, scheduler }
    }

    pub fn context(&self) -> &SettlementContext {
        &self.ctx
    }

    pub async fn offer_trip(&self, offer: TripOffer) -> SettlementResult<Trip> {
        if offer.seats < 1 {
            return Err(SettlementError::ValidationFailed("a trip needs at least one seat".into()));
        }
        if offer.price_per_seat_cents <= 0 {
            return Err(SettlementError::ValidationFailed("price per seat must be positive".into()));
        }
        if offer.service_fee_cents.is_some_and(|fee| fee < 0) {
            return Err(SettlementError::ValidationFailed("service fee cannot be negative".into()));
        }
        let now = self.ctx.now();
        if offer.departure_time <= now {
            return Err(SettlementError::ValidationFailed("departure must be in the future".into()));
        }

        let mut trip = Trip::new(
            offer.driver_id,
            offer.price_per_seat_cents,
            offer.seats,
            offer.departure_time,
            offer.duration_seconds,
        );
        trip.created_at = now;
        trip.updated_at = now;
        trip.service_fee_cents = offer.service_fee_cents;

        if let Some(policy) = offer.fee_policy {
            if policy.rate < 0.0 {
                return Err(SettlementError::ValidationFailed("fee rate cannot be negative".into()));
            }
            self.ctx.store.insert_fee_policy(&policy).await?;
            trip.fee_policy_id = Some(policy.id);
        }
        self.ctx.store.insert_trip(&trip).await?;

        info!("Trip {} offered by driver {} with {} seats", trip.id, trip.driver_id, offer.seats);
        self.ctx.effects.audit(
            trip.driver_id.to_string(),
            "TRIP_OFFERED",
            json!({ "trip_id": trip.id, "seats": offer.seats, "price_per_seat_cents": trip.price_per_seat_cents }),
        );
        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: Uuid) -> SettlementResult<Trip> {
        self.ctx.load_trip(trip_id).await
    }

    pub async fn get_reservation(&self, reservation_id: Uuid) -> SettlementResult<Reservation> {
        self.ctx.load_reservation(reservation_id).await
    }

    pub async fn list_trip_reservations(&self, trip_id: Uuid) -> SettlementResult<Vec<Reservation>> {
        self.ctx.load_trip(trip_id).await?;
        Ok(self.ctx.store.list_trip_reservations(trip_id).await?)
    }

    pub async fn get_trip_payout(&self, trip_id: Uuid) -> SettlementResult<DriverPayout> {
        self.ctx
            .store
            .get_trip_payout(trip_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("DriverPayout", trip_id))
    }

    pub async fn request_reservation(&self, trip_id: Uuid, passenger_id: Uuid, seats: i32) -> SettlementResult<Reservation> {
        self.reservations.request_reservation(trip_id, passenger_id, seats).await
    }

    pub async fn approve_reservation(&self, trip_id: Uuid, reservation_id: Uuid, actor_id: Uuid) -> SettlementResult<Reservation> {
        self.reservations.approve(trip_id, reservation_id, actor_id).await
    }

    pub async fn reject_reservation(&self, trip_id: Uuid, reservation_id: Uuid, actor_id: Uuid) -> SettlementResult<Reservation> {
        self.reservations.reject(trip_id, reservation_id, actor_id).await
    }

    pub async fn waitlist_reservation(&self, trip_id: Uuid, reservation_id: Uuid, actor_id: Uuid) -> SettlementResult<Reservation> {
        self.reservations.waitlist(trip_id, reservation_id, actor_id).await
    }

    pub async fn confirm_payment(&self, reservation_id: Uuid) -> SettlementResult<Reservation> {
        self.reservations.confirm_payment(reservation_id).await
    }

    pub async fn fail_payment(&self, reservation_id: Uuid) -> SettlementResult<Payment> {
        self.reservations.fail_payment(reservation_id).await
    }

    pub async fn cancel_reservation(&self, reservation_id: Uuid, reason: &str) -> SettlementResult<ReservationCancellation> {
        self.cancellations.cancel_reservation(reservation_id, reason).await
    }

    pub async fn cancel_trip(&self, trip_id: Uuid, reason: &str, actor_id: Uuid) -> SettlementResult<TripCancellation> {
        self.cancellations.cancel_trip(trip_id, reason, actor_id).await
    }

    pub async fn complete_expired_trips(&self, now_override: Option<DateTime<Utc>>) -> SettlementResult<CompletionSummary> {
        self.scheduler.complete_expired_trips(now_override).await
    }

    pub async fn calculate_driver_payout(&self, trip_id: Uuid) -> SettlementResult<PayoutCalculation> {
        self.payouts.calculate_driver_payout(trip_id).await
    }

    pub async fn create_driver_payout(&self, trip_id: Uuid) -> SettlementResult<DriverPayout> {
        self.payouts.create_driver_payout(trip_id).await
    }
}

use std::sync::Arc;
use chrono::{DateTime, Utc};
use ridepool_core::{Clock, SettlementError, SettlementResult, SettlementRules, SettlementStore};
use ridepool_shared::{FeePolicy, Reservation, Trip};
use uuid::Uuid;

use crate::effects::SideEffects;

/// Everything a settlement operation needs, shared by all services
#[derive(Clone)]
pub struct SettlementContext {
    pub store: Arc<dyn SettlementStore>,
    pub effects: SideEffects,
    pub clock: Arc<dyn Clock>,
    pub rules: SettlementRules,
}

impl SettlementContext {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        effects: SideEffects,
        clock: Arc<dyn Clock>,
        rules: SettlementRules,
    ) -> Self {
        Self { store, effects, clock, rules }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn load_trip(&self, trip_id: Uuid) -> SettlementResult<Trip> {
        self.store
            .get_trip(trip_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Trip", trip_id))
    }

    pub async fn load_reservation(&self, reservation_id: Uuid) -> SettlementResult<Reservation> {
        self.store
            .get_reservation(reservation_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Reservation", reservation_id))
    }

    /// Reservation that must belong to `trip_id`
    pub async fn load_trip_reservation(&self, trip_id: Uuid, reservation_id: Uuid) -> SettlementResult<Reservation> {
        let reservation = self.load_reservation(reservation_id).await?;
        if reservation.trip_id != trip_id {
            return Err(SettlementError::not_found("Reservation", reservation_id));
        }
        Ok(reservation)
    }

    pub async fn load_fee_policy(&self, trip: &Trip) -> SettlementResult<Option<FeePolicy>> {
        match trip.fee_policy_id {
            Some(id) => Ok(self.store.get_fee_policy(id).await?),
            None => Ok(None),
        }
    }
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;
use ridepool_settlement::{TripCancellation, TripOffer};
use ridepool_shared::{FeePolicy, FeeType, Reservation, Trip};

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FeePolicyRequest {
    pub fee_type: FeeType,
    pub rate: f64,
    pub minimum_fee_cents: Option<i64>,
    pub maximum_fee_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OfferTripRequest {
    pub driver_id: Uuid,
    pub price_per_seat_cents: i64,
    pub seats: i32,
    pub departure_time: DateTime<Utc>,
    pub duration_seconds: Option<i64>,
    pub service_fee_cents: Option<i64>,
    pub fee_policy: Option<FeePolicyRequest>,
}

#[derive(Debug, Deserialize)]
pub struct RequestReservationRequest {
    pub passenger_id: Uuid,
    pub seats: i32,
}

/// The acting user. Authentication happens upstream of this service.
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CancelTripRequest {
    pub actor_id: Uuid,
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/trips", post(offer_trip))
        .route("/trips/{trip_id}", get(get_trip))
        .route("/trips/{trip_id}/cancel", post(cancel_trip))
        .route(
            "/trips/{trip_id}/reservations",
            get(list_reservations).post(request_reservation),
        )
        .route("/trips/{trip_id}/reservations/{reservation_id}/approve", post(approve_reservation))
        .route("/trips/{trip_id}/reservations/{reservation_id}/reject", post(reject_reservation))
        .route("/trips/{trip_id}/reservations/{reservation_id}/waitlist", post(waitlist_reservation))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/trips
async fn offer_trip(
    State(state): State<AppState>,
    Json(req): Json<OfferTripRequest>,
) -> Result<(StatusCode, Json<Trip>), AppError> {
    let fee_policy = req.fee_policy.map(|p| {
        FeePolicy::new(p.fee_type, p.rate).with_bounds(p.minimum_fee_cents, p.maximum_fee_cents)
    });
    let trip = state
        .engine
        .offer_trip(TripOffer {
            driver_id: req.driver_id,
            price_per_seat_cents: req.price_per_seat_cents,
            seats: req.seats,
            departure_time: req.departure_time,
            duration_seconds: req.duration_seconds,
            service_fee_cents: req.service_fee_cents,
            fee_policy,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// GET /v1/trips/:trip_id
async fn get_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.engine.get_trip(trip_id).await?))
}

/// POST /v1/trips/:trip_id/cancel
/// Driver cancels the whole trip; every active passenger is settled
async fn cancel_trip(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Json(req): Json<CancelTripRequest>,
) -> Result<Json<TripCancellation>, AppError> {
    if req.reason.trim().is_empty() {
        return Err(AppError::BadRequest("a cancellation reason is required".into()));
    }
    Ok(Json(state.engine.cancel_trip(trip_id, &req.reason, req.actor_id).await?))
}

/// GET /v1/trips/:trip_id/reservations
async fn list_reservations(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.engine.list_trip_reservations(trip_id).await?))
}

/// POST /v1/trips/:trip_id/reservations
async fn request_reservation(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
    Json(req): Json<RequestReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let reservation = state.engine.request_reservation(trip_id, req.passenger_id, req.seats).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// POST /v1/trips/:trip_id/reservations/:reservation_id/approve
async fn approve_reservation(
    State(state): State<AppState>,
    Path((trip_id, reservation_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.approve_reservation(trip_id, reservation_id, req.actor_id).await?))
}

/// POST /v1/trips/:trip_id/reservations/:reservation_id/reject
async fn reject_reservation(
    State(state): State<AppState>,
    Path((trip_id, reservation_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.reject_reservation(trip_id, reservation_id, req.actor_id).await?))
}

/// POST /v1/trips/:trip_id/reservations/:reservation_id/waitlist
async fn waitlist_reservation(
    State(state): State<AppState>,
    Path((trip_id, reservation_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.waitlist_reservation(trip_id, reservation_id, req.actor_id).await?))
}

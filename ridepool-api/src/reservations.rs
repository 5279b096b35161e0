use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use ridepool_settlement::ReservationCancellation;
use ridepool_shared::{Payment, Reservation};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CancelReservationRequest {
    pub reason: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/reservations/{reservation_id}", get(get_reservation))
        .route("/reservations/{reservation_id}/cancel", post(cancel_reservation))
        .route("/reservations/{reservation_id}/payment/confirm", post(confirm_payment))
        .route("/reservations/{reservation_id}/payment/fail", post(fail_payment))
}

/// GET /v1/reservations/:reservation_id
async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.get_reservation(reservation_id).await?))
}

/// POST /v1/reservations/:reservation_id/cancel
/// Passenger cancellation; the refund tier depends on how close departure is
async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Json(req): Json<CancelReservationRequest>,
) -> Result<Json<ReservationCancellation>, AppError> {
    if req.reason.trim().is_empty() {
        return Err(AppError::BadRequest("a cancellation reason is required".into()));
    }
    Ok(Json(state.engine.cancel_reservation(reservation_id, &req.reason).await?))
}

/// POST /v1/reservations/:reservation_id/payment/confirm
/// Callback from the payment provider once the charge succeeded
async fn confirm_payment(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.confirm_payment(reservation_id).await?))
}

/// POST /v1/reservations/:reservation_id/payment/fail
async fn fail_payment(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.engine.fail_payment(reservation_id).await?))
}

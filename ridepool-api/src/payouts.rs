use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;
use ridepool_settlement::PayoutCalculation;
use ridepool_shared::DriverPayout;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/trips/{trip_id}/payout", get(get_payout).post(create_payout))
        .route("/trips/{trip_id}/payout/calculation", get(calculate_payout))
}

/// GET /v1/trips/:trip_id/payout
async fn get_payout(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<DriverPayout>, AppError> {
    Ok(Json(state.engine.get_trip_payout(trip_id).await?))
}

/// POST /v1/trips/:trip_id/payout
/// Manual retry for completed trips whose automatic payout failed
async fn create_payout(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<(StatusCode, Json<DriverPayout>), AppError> {
    let payout = state.engine.create_driver_payout(trip_id).await?;
    Ok((StatusCode::CREATED, Json(payout)))
}

/// GET /v1/trips/:trip_id/payout/calculation
/// Preview only, nothing is persisted
async fn calculate_payout(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Json<PayoutCalculation>, AppError> {
    Ok(Json(state.engine.calculate_driver_payout(trip_id).await?))
}

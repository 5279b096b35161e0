use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use ridepool_settlement::CompletionSummary;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunSchedulerQuery {
    /// Evaluate trips as of this instant instead of now
    pub now: Option<DateTime<Utc>>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/admin/scheduler/run", post(run_scheduler))
}

/// POST /v1/admin/scheduler/run
/// Runs one completion pass immediately, outside the worker's interval
async fn run_scheduler(
    State(state): State<AppState>,
    Query(query): Query<RunSchedulerQuery>,
) -> Result<Json<CompletionSummary>, AppError> {
    Ok(Json(state.engine.complete_expired_trips(query.now).await?))
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ridepool_core::SettlementError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Settlement(SettlementError),
    BadRequest(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            AppError::Settlement(err) => match err {
                SettlementError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                SettlementError::Forbidden { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                SettlementError::TimingRestricted(_) => (StatusCode::UNPROCESSABLE_ENTITY, "TIMING_RESTRICTED"),
                SettlementError::InvalidState(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_STATE"),
                SettlementError::CapacityExceeded { .. } => (StatusCode::CONFLICT, "CAPACITY_EXCEEDED"),
                SettlementError::Immutable(_) => (StatusCode::CONFLICT, "IMMUTABLE"),
                SettlementError::AlreadyCancelled(_) => (StatusCode::CONFLICT, "ALREADY_CANCELLED"),
                SettlementError::TripNotCancellable(_) => (StatusCode::CONFLICT, "TRIP_NOT_CANCELLABLE"),
                SettlementError::AlreadyExists(_) => (StatusCode::CONFLICT, "ALREADY_EXISTS"),
                SettlementError::ValidationFailed(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
                SettlementError::Conflict(_) => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),
                SettlementError::DependencyUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEPENDENCY_UNAVAILABLE"),
                SettlementError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let error_message = match self {
            AppError::BadRequest(msg) => msg,
            AppError::Settlement(err) if err.is_domain() => err.to_string(),
            AppError::Settlement(SettlementError::Conflict(msg)) => {
                tracing::warn!("Concurrent modification: {}", msg);
                "The resource changed while processing the request, retry".to_string()
            }
            AppError::Settlement(err) => {
                tracing::error!("Settlement failed: {}", err);
                "Internal Server Error".to_string()
            }
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl From<SettlementError> for AppError {
    fn from(err: SettlementError) -> Self {
        Self::Settlement(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_errors_map_to_client_statuses() {
        let cases = [
            (SettlementError::not_found("Trip", "x"), StatusCode::NOT_FOUND),
            (SettlementError::Forbidden { actor: "a".into(), action: "approve reservation" }, StatusCode::FORBIDDEN),
            (SettlementError::TimingRestricted("late".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (SettlementError::CapacityExceeded { requested: 2, available: 1 }, StatusCode::CONFLICT),
            (SettlementError::Immutable("paid".into()), StatusCode::CONFLICT),
            (SettlementError::ValidationFailed("seats".into()), StatusCode::BAD_REQUEST),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn test_infrastructure_errors_hide_details() {
        let response = AppError::from(SettlementError::Storage("pool timed out".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::from(SettlementError::DependencyUnavailable("redis".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}

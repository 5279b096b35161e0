pub mod clock;
pub mod collaborators;
pub mod repository;
pub mod rules;

pub use clock::{Clock, FixedClock, SystemClock};
pub use collaborators::{ActionStatus, AuditLogger, EventPublisher, NoopTripLock, Notifier, TripLock};
pub use repository::{SettlementStore, StoreError, StoreResult};
pub use rules::SettlementRules;

/// Errors returned by settlement operations.
///
/// Everything except `Conflict`, `DependencyUnavailable` and `Storage` is a
/// domain error that is safe to show to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Actor {actor} is not allowed to {action}")]
    Forbidden { actor: String, action: &'static str },

    #[error("Outside the allowed time window: {0}")]
    TimingRestricted(String),

    #[error("Insufficient seats: requested {requested}, available {available}")]
    CapacityExceeded { requested: i32, available: i32 },

    #[error("Cannot modify: {0}")]
    Immutable(String),

    #[error("Reservation already cancelled: {0}")]
    AlreadyCancelled(String),

    #[error("Trip cannot be cancelled: {0}")]
    TripNotCancellable(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl SettlementError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        SettlementError::NotFound { entity, id: id.to_string() }
    }

    /// Domain errors carry a message that can be shown to the caller as-is
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            SettlementError::Conflict(_)
                | SettlementError::DependencyUnavailable(_)
                | SettlementError::Storage(_)
        )
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => SettlementError::NotFound { entity, id: id.to_string() },
            StoreError::CapacityExceeded { requested, available } => {
                SettlementError::CapacityExceeded { requested, available }
            }
            StoreError::Conflict(msg) => SettlementError::Conflict(msg),
            StoreError::Duplicate(msg) => SettlementError::AlreadyExists(msg),
            StoreError::Backend(msg) => SettlementError::Storage(msg),
        }
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

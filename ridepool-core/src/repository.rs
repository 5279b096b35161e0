use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;
use ridepool_shared::{
    Cancellation, DriverPayout, FeePolicy, Payment, PaymentStatus, Refund, Reservation,
    ReservationStatus, Trip, TripStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// An expected status no longer matched inside the atomic unit
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient seats: requested {requested}, available {available}")]
    CapacityExceeded { requested: i32, available: i32 },

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Approve a reservation: guarded seat decrement, status change and the pending payment
#[derive(Debug, Clone)]
pub struct ApprovalCommit {
    pub reservation_id: Uuid,
    pub trip_id: Uuid,
    pub expected_status: ReservationStatus,
    pub seats: i32,
    pub approved_at: DateTime<Utc>,
    pub payment: Payment,
}

/// Reject a reservation, returning its seats when they were held
#[derive(Debug, Clone)]
pub struct RejectionCommit {
    pub reservation_id: Uuid,
    pub trip_id: Uuid,
    pub expected_status: ReservationStatus,
    pub release_seats: i32,
}

/// Plain status move with no inventory or money attached
#[derive(Debug, Clone)]
pub struct ReservationTransition {
    pub reservation_id: Uuid,
    pub expected_status: ReservationStatus,
    pub new_status: ReservationStatus,
}

/// Settle a PENDING payment, optionally moving its reservation along
#[derive(Debug, Clone)]
pub struct PaymentSettlement {
    pub payment_id: Uuid,
    pub new_status: PaymentStatus,
    pub reservation_transition: Option<ReservationTransition>,
}

/// One passenger-initiated cancellation: status, audit record, refund, seats
#[derive(Debug, Clone)]
pub struct ReservationCancellationCommit {
    pub reservation_id: Uuid,
    pub trip_id: Uuid,
    pub expected_status: ReservationStatus,
    pub new_status: ReservationStatus,
    pub cancellation: Cancellation,
    /// Present when a completed payment is refunded; that payment moves to REFUNDED
    pub refund: Option<Refund>,
    pub release_seats: i32,
}

#[derive(Debug, Clone)]
pub struct ReservationSettlement {
    pub reservation_id: Uuid,
    pub expected_status: ReservationStatus,
    pub new_status: ReservationStatus,
    pub refund: Option<Refund>,
}

/// Driver cancels the whole trip. `reservations` must cover every
/// reservation still PENDING_APPROVAL, APPROVED or CONFIRMED.
#[derive(Debug, Clone)]
pub struct TripCancellationCommit {
    pub trip_id: Uuid,
    pub expected_trip_status: TripStatus,
    pub cancellation: Cancellation,
    pub reservations: Vec<ReservationSettlement>,
}

/// Expiry cancellation. Aborts with `Conflict` if a CONFIRMED reservation exists.
#[derive(Debug, Clone)]
pub struct SystemCancellationCommit {
    pub trip_id: Uuid,
    pub cancellation: Cancellation,
    pub new_status: ReservationStatus,
}

/// Scheduler completion. Requires an ACTIVE trip with at least one CONFIRMED reservation.
#[derive(Debug, Clone)]
pub struct TripCompletionCommit {
    pub trip_id: Uuid,
}

/// Persistence port. Every `apply_*` method is one atomic unit: either all of
/// it is applied or none of it is.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn insert_trip(&self, trip: &Trip) -> StoreResult<()>;

    async fn get_trip(&self, id: Uuid) -> StoreResult<Option<Trip>>;

    async fn insert_fee_policy(&self, policy: &FeePolicy) -> StoreResult<()>;

    async fn get_fee_policy(&self, id: Uuid) -> StoreResult<Option<FeePolicy>>;

    async fn insert_reservation(&self, reservation: &Reservation) -> StoreResult<()>;

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>>;

    async fn list_trip_reservations(&self, trip_id: Uuid) -> StoreResult<Vec<Reservation>>;

    async fn get_reservation_payment(&self, reservation_id: Uuid) -> StoreResult<Option<Payment>>;

    async fn list_trip_payments(&self, trip_id: Uuid) -> StoreResult<Vec<Payment>>;

    async fn list_trip_cancellations(&self, trip_id: Uuid) -> StoreResult<Vec<Cancellation>>;

    async fn get_payment_refund(&self, payment_id: Uuid) -> StoreResult<Option<Refund>>;

    /// ACTIVE trips whose departure time is at or before `now`
    async fn list_departed_active_trips(&self, now: DateTime<Utc>) -> StoreResult<Vec<Trip>>;

    async fn get_trip_payout(&self, trip_id: Uuid) -> StoreResult<Option<DriverPayout>>;

    /// Returns the trip with its updated seat count
    async fn apply_approval(&self, commit: &ApprovalCommit) -> StoreResult<Trip>;

    async fn apply_rejection(&self, commit: &RejectionCommit) -> StoreResult<Trip>;

    async fn apply_transition(&self, transition: &ReservationTransition) -> StoreResult<()>;

    async fn apply_payment_settlement(&self, settlement: &PaymentSettlement) -> StoreResult<()>;

    async fn apply_reservation_cancellation(&self, commit: &ReservationCancellationCommit) -> StoreResult<Trip>;

    async fn apply_trip_cancellation(&self, commit: &TripCancellationCommit) -> StoreResult<Trip>;

    /// Returns how many reservations were cancelled
    async fn apply_system_cancellation(&self, commit: &SystemCancellationCommit) -> StoreResult<usize>;

    /// Returns how many reservations were completed
    async fn apply_trip_completion(&self, commit: &TripCompletionCommit) -> StoreResult<usize>;

    /// Insert unless a payout already exists for the trip. Returns false on duplicate.
    async fn insert_payout_if_absent(&self, payout: &DriverPayout) -> StoreResult<bool>;
}

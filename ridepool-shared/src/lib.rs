pub mod models;

pub use models::events::SettlementEvent;
pub use models::payment::{Payment, PaymentStatus};
pub use models::reservation::{Reservation, ReservationStatus};
pub use models::settlement::{
    Cancellation, CancelledBy, DriverPayout, PayoutStatus, Refund, RefundStatus, RefundType,
};
pub use models::trip::{FeePolicy, FeeType, Trip, TripStatus};
pub use models::ParseStatusError;

use chrono::{DateTime, Utc};
use ridepool_shared::{FeePolicy, FeeType, RefundType, ReservationStatus};

/// A booking younger than this still qualifies for the quick-cancel grace
const BOOKING_GRACE_HOURS: f64 = 24.0;
/// Cancelling within this long of booking refunds everything
const QUICK_CANCEL_HOURS: f64 = 1.0;
const EARLY_CANCELLATION_HOURS: f64 = 24.0;
const MEDIUM_CANCELLATION_HOURS: f64 = 12.0;
const DRIVER_EARLY_CANCELLATION_HOURS: f64 = 48.0;

/// Outcome of the refund-timing rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundTier {
    pub status: ReservationStatus,
    pub refund_percentage: u8,
    pub refund_type: RefundType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundAmounts {
    pub refund_amount_cents: i64,
    pub driver_compensation_cents: i64,
    pub service_fee_retained_cents: i64,
}

/// Hours from `from` to `to`. Negative when `to` is earlier.
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

pub fn compute_passenger_refund_tier(
    departure_time: DateTime<Utc>,
    cancelled_at: DateTime<Utc>,
    reservation_created_at: DateTime<Utc>,
) -> RefundTier {
    let since_booking = hours_between(reservation_created_at, cancelled_at);
    if since_booking < BOOKING_GRACE_HOURS && since_booking < QUICK_CANCEL_HOURS {
        return full_refund_tier();
    }

    let before_departure = hours_between(cancelled_at, departure_time);
    if before_departure > EARLY_CANCELLATION_HOURS {
        full_refund_tier()
    } else if before_departure >= MEDIUM_CANCELLATION_HOURS {
        RefundTier {
            status: ReservationStatus::CancelledMedium,
            refund_percentage: 75,
            refund_type: RefundType::PartialRefund75,
        }
    } else {
        RefundTier {
            status: ReservationStatus::CancelledLate,
            refund_percentage: 50,
            refund_type: RefundType::PartialRefund50,
        }
    }
}

fn full_refund_tier() -> RefundTier {
    RefundTier {
        status: ReservationStatus::CancelledEarly,
        refund_percentage: 100,
        refund_type: RefundType::FullRefund,
    }
}

/// Passengers always get the whole trip price back when the driver cancels;
/// only the status records how much notice they had.
pub fn compute_driver_cancellation_tier(
    departure_time: DateTime<Utc>,
    cancelled_at: DateTime<Utc>,
) -> ReservationStatus {
    if hours_between(cancelled_at, departure_time) > DRIVER_EARLY_CANCELLATION_HOURS {
        ReservationStatus::CancelledByDriverEarly
    } else {
        ReservationStatus::CancelledByDriverLate
    }
}

/// Split the trip-price portion between passenger and driver. The service
/// fee is never part of the refund.
pub fn compute_refund_amounts(
    trip_price_portion_cents: i64,
    service_fee_cents: i64,
    refund_percentage: u8,
) -> RefundAmounts {
    let refund_amount_cents = percent_of(trip_price_portion_cents, f64::from(refund_percentage));
    RefundAmounts {
        refund_amount_cents,
        driver_compensation_cents: trip_price_portion_cents - refund_amount_cents,
        service_fee_retained_cents: service_fee_cents,
    }
}

/// Platform fee for an amount. A rate-based policy wins over the trip's flat
/// fee; bounds are applied minimum first, then maximum.
pub fn compute_service_fee(
    total_received_cents: i64,
    valid_passenger_count: usize,
    policy: Option<&FeePolicy>,
    flat_fee_cents: Option<i64>,
) -> i64 {
    let Some(policy) = policy else {
        return flat_fee_cents.unwrap_or(0);
    };

    let mut fee = match policy.fee_type {
        FeeType::Percentage => percent_of(total_received_cents, policy.rate),
        FeeType::FixedAmount => policy.rate.round() as i64,
        FeeType::PerSeat => (policy.rate * valid_passenger_count as f64).round() as i64,
    };

    if let Some(min) = policy.minimum_fee_cents {
        if fee < min {
            fee = min;
        }
    }
    if let Some(max) = policy.maximum_fee_cents {
        if fee > max {
            fee = max;
        }
    }
    fee
}

/// One reservation's fee component, charged at approval. Flat and fixed
/// amounts are per booking; rate-based fees scale with the reservation.
/// Policy bounds are trip-level and only apply to the payout.
pub fn compute_reservation_fee(
    trip_price_portion_cents: i64,
    seats: i32,
    policy: Option<&FeePolicy>,
    flat_fee_cents: Option<i64>,
) -> i64 {
    let Some(policy) = policy else {
        return flat_fee_cents.unwrap_or(0);
    };
    match policy.fee_type {
        FeeType::Percentage => percent_of(trip_price_portion_cents, policy.rate),
        FeeType::FixedAmount => policy.rate.round() as i64,
        FeeType::PerSeat => (policy.rate * f64::from(seats)).round() as i64,
    }
}

/// `amount * percent / 100`, rounded half away from zero
fn percent_of(amount_cents: i64, percent: f64) -> i64 {
    (amount_cents as f64 * percent / 100.0).round() as i64
}

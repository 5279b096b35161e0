mod common;

use chrono::Duration;
use common::{Harness, FLAT_FEE, PRICE_PER_SEAT};
use ridepool_core::{SettlementError, SettlementStore};
use ridepool_shared::{CancelledBy, PaymentStatus, RefundType, ReservationStatus, SettlementEvent, TripStatus};
use uuid::Uuid;

#[tokio::test]
async fn test_quick_cancellation_gets_full_refund_close_to_departure() {
    let h = Harness::new();
    let trip = h.offer(3, 10).await;
    let reservation = h.confirmed(&trip, 1).await;

    h.advance(Duration::minutes(30));
    let outcome = h.engine.cancel_reservation(reservation.id, "booked the wrong day").await.unwrap();

    assert_eq!(outcome.reservation.status, ReservationStatus::CancelledEarly);
    let refund = outcome.refund.unwrap();
    assert_eq!(refund.refund_type, RefundType::FullRefund);
    assert_eq!(refund.refund_amount_cents, PRICE_PER_SEAT);
    assert_eq!(refund.driver_compensation_cents, 0);
    assert_eq!(refund.service_fee_retained_cents, FLAT_FEE);
}

#[tokio::test]
async fn test_late_cancellation_splits_trip_price_with_driver() {
    let h = Harness::new();
    let trip = h.offer(3, 3 * 24 + 10).await;
    let reservation = h.confirmed(&trip, 1).await;

    h.advance(Duration::days(3));
    let outcome = h.engine.cancel_reservation(reservation.id, "meeting moved").await.unwrap();

    assert_eq!(outcome.reservation.status, ReservationStatus::CancelledLate);
    let refund = outcome.refund.unwrap();
    assert_eq!(refund.refund_type, RefundType::PartialRefund50);
    assert_eq!(refund.refund_amount_cents, 5_000);
    assert_eq!(refund.driver_compensation_cents, 5_000);
    assert_eq!(refund.service_fee_retained_cents, 1_000);

    let payment = h.store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(h.store.get_payment_refund(payment.id).await.unwrap(), Some(refund));
    assert_eq!(h.assert_seat_invariant(trip.id).await.remaining_seats, 3);

    let cancellations = h.store.list_trip_cancellations(trip.id).await.unwrap();
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].cancelled_by, CancelledBy::Passenger);
    assert_eq!(cancellations[0].refund_percentage, Some(50));
    assert!((cancellations[0].hours_before_departure - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_medium_window_refunds_three_quarters() {
    let h = Harness::new();
    let trip = h.offer(3, 48).await;
    let reservation = h.confirmed(&trip, 2).await;

    h.advance(Duration::hours(30));
    let outcome = h.engine.cancel_reservation(reservation.id, "weather").await.unwrap();

    assert_eq!(outcome.reservation.status, ReservationStatus::CancelledMedium);
    let refund = outcome.refund.unwrap();
    assert_eq!(refund.refund_amount_cents, 15_000);
    assert_eq!(refund.refund_amount_cents + refund.driver_compensation_cents, 2 * PRICE_PER_SEAT);
    assert_eq!(refund.service_fee_retained_cents, FLAT_FEE);
}

#[tokio::test]
async fn test_unpaid_cancellation_records_tier_without_refund() {
    let h = Harness::new();
    let trip = h.offer(3, 48).await;
    let reservation = h.approved(&trip, 1).await;

    h.advance(Duration::hours(40));
    let outcome = h.engine.cancel_reservation(reservation.id, "no longer needed").await.unwrap();

    assert_eq!(outcome.reservation.status, ReservationStatus::CancelledLate);
    assert!(outcome.refund.is_none());
    assert_eq!(h.assert_seat_invariant(trip.id).await.remaining_seats, 3);
    let payment = h.store.get_reservation_payment(reservation.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    h.settle_effects().await;
    assert!(h.recorder.events().iter().any(|e| matches!(
        e,
        SettlementEvent::ReservationCancelled { refund_cents: None, .. }
    )));
    assert_eq!(h.recorder.notifications_for(trip.driver_id).iter().filter(|n| n.title == "Passenger cancelled").count(), 1);
}

#[tokio::test]
async fn test_second_cancellation_is_refused() {
    let h = Harness::new();
    let trip = h.offer(3, 48).await;
    let reservation = h.confirmed(&trip, 1).await;

    h.engine.cancel_reservation(reservation.id, "first").await.unwrap();
    let err = h.engine.cancel_reservation(reservation.id, "second").await.unwrap_err();
    assert!(matches!(err, SettlementError::AlreadyCancelled(_)));
    assert_eq!(h.store.list_trip_cancellations(trip.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reservation_on_cancelled_trip_cannot_be_cancelled() {
    let h = Harness::new();
    let trip = h.offer(3, 72).await;
    let reservation = h.engine.request_reservation(trip.id, Uuid::new_v4(), 1).await.unwrap();
    h.engine.waitlist_reservation(trip.id, reservation.id, trip.driver_id).await.unwrap();

    h.engine.cancel_trip(trip.id, "car broke down", trip.driver_id).await.unwrap();

    let err = h.engine.cancel_reservation(reservation.id, "too late").await.unwrap_err();
    assert!(matches!(err, SettlementError::TripNotCancellable(_)));
}

#[tokio::test]
async fn test_unknown_reservation_is_not_found() {
    let h = Harness::new();
    let err = h.engine.cancel_reservation(Uuid::new_v4(), "whatever").await.unwrap_err();
    assert!(matches!(err, SettlementError::NotFound { entity: "Reservation", .. }));
}

#[tokio::test]
async fn test_early_driver_cancellation_refunds_passengers_in_full() {
    let h = Harness::new();
    let trip = h.offer(4, 60).await;
    let paid = h.confirmed(&trip, 1).await;
    let unpaid = h.approved(&trip, 1).await;
    let pending = h.engine.request_reservation(trip.id, Uuid::new_v4(), 1).await.unwrap();

    let outcome = h.engine.cancel_trip(trip.id, "family emergency", trip.driver_id).await.unwrap();
    assert_eq!(outcome.trip.status, TripStatus::Cancelled);
    assert_eq!(outcome.affected_count, 3);

    let unpaid_payment = h.store.get_reservation_payment(unpaid.id).await.unwrap().unwrap();
    assert_eq!(unpaid_payment.status, PaymentStatus::Failed);
    assert!(h.store.get_payment_refund(unpaid_payment.id).await.unwrap().is_none());

    let paid = h.engine.get_reservation(paid.id).await.unwrap();
    assert_eq!(paid.status, ReservationStatus::CancelledByDriverEarly);
    let pending = h.engine.get_reservation(pending.id).await.unwrap();
    assert_eq!(pending.status, ReservationStatus::CancelledByDriverEarly);

    let payment = h.store.get_reservation_payment(paid.id).await.unwrap().unwrap();
    let refund = h.store.get_payment_refund(payment.id).await.unwrap().unwrap();
    assert_eq!(refund.refund_type, RefundType::FullRefund);
    assert_eq!(refund.refund_amount_cents, 10_000);
    assert_eq!(refund.driver_compensation_cents, 0);
    assert_eq!(refund.service_fee_retained_cents, 1_000);

    let cancellations = h.store.list_trip_cancellations(trip.id).await.unwrap();
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].cancelled_by, CancelledBy::Driver);
    assert_eq!(cancellations[0].reservation_id, None);

    h.settle_effects().await;
    assert_eq!(h.recorder.notifications_for(paid.passenger_id).iter().filter(|n| n.title == "Trip cancelled").count(), 1);
    assert!(h.recorder.actions().contains(&"TRIP_CANCELLED".to_string()));
}

#[tokio::test]
async fn test_late_driver_cancellation_uses_late_tier() {
    let h = Harness::new();
    let trip = h.offer(2, 60).await;
    let reservation = h.confirmed(&trip, 1).await;

    h.advance(Duration::hours(20));
    h.engine.cancel_trip(trip.id, "double booked", trip.driver_id).await.unwrap();

    let reservation = h.engine.get_reservation(reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::CancelledByDriverLate);
}

#[tokio::test]
async fn test_only_the_driver_can_cancel_a_trip() {
    let h = Harness::new();
    let trip = h.offer(2, 60).await;

    let err = h.engine.cancel_trip(trip.id, "not mine", Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, SettlementError::Forbidden { .. }));
    assert_eq!(h.engine.get_trip(trip.id).await.unwrap().status, TripStatus::Active);
}

#[tokio::test]
async fn test_cancelled_trip_cannot_be_cancelled_again() {
    let h = Harness::new();
    let trip = h.offer(2, 60).await;

    h.engine.cancel_trip(trip.id, "first", trip.driver_id).await.unwrap();
    let err = h.engine.cancel_trip(trip.id, "second", trip.driver_id).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidState(_)));
}

#[tokio::test]
async fn test_refund_invariants_hold_across_tiers() {
    for hours_out in [6_i64, 18, 30] {
        let h = Harness::new();
        let trip = h.offer(3, hours_out + 48).await;
        let reservation = h.confirmed(&trip, 3).await;
        let payment = h.store.get_reservation_payment(reservation.id).await.unwrap().unwrap();

        h.advance(Duration::hours(48));
        let refund = h.engine.cancel_reservation(reservation.id, "tier sweep").await.unwrap().refund.unwrap();

        assert_eq!(
            refund.refund_amount_cents + refund.driver_compensation_cents,
            payment.trip_price_portion()
        );
        assert_eq!(refund.service_fee_retained_cents, payment.service_fee_cents);
    }
}

use std::collections::HashSet;
use std::str::FromStr;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;
use ridepool_core::repository::{
    ApprovalCommit, PaymentSettlement, RejectionCommit, ReservationCancellationCommit, ReservationTransition,
    SystemCancellationCommit, TripCancellationCommit, TripCompletionCommit,
};
use ridepool_core::{SettlementStore, StoreError, StoreResult};
use ridepool_shared::{
    Cancellation, DriverPayout, FeePolicy, ParseStatusError, Payment, Refund, Reservation, ReservationStatus,
    Trip, TripStatus,
};

const TRIP_SELECT: &str = r#"
    SELECT id, driver_id, price_per_seat_cents, departure_time, duration_seconds, status,
           total_seats, remaining_seats, is_full, service_fee_cents, fee_policy_id, created_at, updated_at
    FROM trips
"#;

const RESERVATION_SELECT: &str = r#"
    SELECT id, trip_id, passenger_id, seats_reserved, total_price_cents, status, approved_at,
           created_at, updated_at
    FROM reservations
"#;

const PAYMENT_SELECT: &str = r#"
    SELECT p.id, p.reservation_id, p.status, p.total_amount_cents, p.service_fee_cents, p.currency,
           p.created_at, p.updated_at
    FROM payments p
"#;

const TRIP_RETURNING: &str = r#"
    RETURNING id, driver_id, price_per_seat_cents, departure_time, duration_seconds, status,
              total_seats, remaining_seats, is_full, service_fee_cents, fee_policy_id, created_at, updated_at
"#;

#[derive(sqlx::FromRow)]
struct TripRow {
    id: Uuid,
    driver_id: Uuid,
    price_per_seat_cents: i64,
    departure_time: DateTime<Utc>,
    duration_seconds: Option<i64>,
    status: String,
    total_seats: i32,
    remaining_seats: i32,
    is_full: bool,
    service_fee_cents: Option<i64>,
    fee_policy_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TripRow> for Trip {
    type Error = StoreError;

    fn try_from(row: TripRow) -> StoreResult<Self> {
        Ok(Trip {
            id: row.id,
            driver_id: row.driver_id,
            price_per_seat_cents: row.price_per_seat_cents,
            departure_time: row.departure_time,
            duration_seconds: row.duration_seconds,
            status: parse(&row.status)?,
            total_seats: row.total_seats,
            remaining_seats: row.remaining_seats,
            is_full: row.is_full,
            service_fee_cents: row.service_fee_cents,
            fee_policy_id: row.fee_policy_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FeePolicyRow {
    id: Uuid,
    fee_type: String,
    rate: f64,
    minimum_fee_cents: Option<i64>,
    maximum_fee_cents: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    trip_id: Uuid,
    passenger_id: Uuid,
    seats_reserved: i32,
    total_price_cents: i64,
    status: String,
    approved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> StoreResult<Self> {
        Ok(Reservation {
            id: row.id,
            trip_id: row.trip_id,
            passenger_id: row.passenger_id,
            seats_reserved: row.seats_reserved,
            total_price_cents: row.total_price_cents,
            status: parse(&row.status)?,
            approved_at: row.approved_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    reservation_id: Uuid,
    status: String,
    total_amount_cents: i64,
    service_fee_cents: i64,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> StoreResult<Self> {
        Ok(Payment {
            id: row.id,
            reservation_id: row.reservation_id,
            status: parse(&row.status)?,
            total_amount_cents: row.total_amount_cents,
            service_fee_cents: row.service_fee_cents,
            currency: row.currency,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CancellationRow {
    id: Uuid,
    trip_id: Uuid,
    reservation_id: Option<Uuid>,
    cancelled_by: String,
    reason: String,
    hours_before_departure: f64,
    refund_percentage: Option<i16>,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct RefundRow {
    id: Uuid,
    payment_id: Uuid,
    reservation_id: Uuid,
    refund_amount_cents: i64,
    driver_compensation_cents: i64,
    service_fee_retained_cents: i64,
    refund_type: String,
    status: String,
    processed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct PayoutRow {
    id: Uuid,
    trip_id: Uuid,
    driver_id: Uuid,
    payout_amount_cents: i64,
    total_received_cents: i64,
    service_fee_cents: i64,
    late_cancellation_penalty_cents: i64,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct StatusRow {
    id: Uuid,
    status: String,
}

fn parse<T: FromStr<Err = ParseStatusError>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(|e: ParseStatusError| StoreError::Backend(e.to_string()))
}

fn db_err(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Duplicate(db.message().to_string()),
        _ => StoreError::Backend(e.to_string()),
    }
}

fn conflict(what: String) -> StoreError {
    StoreError::Conflict(what)
}

/// PostgreSQL adapter. Each `apply_*` runs in one transaction; expected
/// statuses are enforced with `WHERE status = ...` guards and row locks.
pub struct PostgresSettlementStore {
    pool: PgPool,
}

impl PostgresSettlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_trip_status(tx: &mut Transaction<'_, Postgres>, trip_id: Uuid) -> StoreResult<TripStatus> {
        let row: Option<StatusRow> = sqlx::query_as("SELECT id, status FROM trips WHERE id = $1 FOR UPDATE")
            .bind(trip_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        let row = row.ok_or(StoreError::NotFound { entity: "Trip", id: trip_id })?;
        parse(&row.status)
    }

    /// Locks every reservation of the trip so concurrent transitions wait for us
    async fn lock_trip_reservations(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: Uuid,
    ) -> StoreResult<Vec<(Uuid, ReservationStatus)>> {
        let rows: Vec<StatusRow> = sqlx::query_as("SELECT id, status FROM reservations WHERE trip_id = $1 FOR UPDATE")
            .bind(trip_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err)?;
        rows.into_iter()
            .map(|r| -> StoreResult<(Uuid, ReservationStatus)> { Ok((r.id, parse(&r.status)?)) })
            .collect()
    }

    async fn fetch_trip(tx: &mut Transaction<'_, Postgres>, trip_id: Uuid) -> StoreResult<Trip> {
        let sql = format!("{} WHERE id = $1", TRIP_SELECT);
        let row: Option<TripRow> = sqlx::query_as(&sql)
            .bind(trip_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.ok_or(StoreError::NotFound { entity: "Trip", id: trip_id })?.try_into()
    }

    async fn release_seats(tx: &mut Transaction<'_, Postgres>, trip_id: Uuid, seats: i32) -> StoreResult<Trip> {
        if seats == 0 {
            return Self::fetch_trip(tx, trip_id).await;
        }
        let sql = format!(
            "UPDATE trips SET remaining_seats = remaining_seats + $2, is_full = (remaining_seats + $2 = 0), updated_at = $3 WHERE id = $1 {}",
            TRIP_RETURNING
        );
        let row: Option<TripRow> = sqlx::query_as(&sql)
            .bind(trip_id)
            .bind(seats)
            .bind(Utc::now())
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?;
        row.ok_or(StoreError::NotFound { entity: "Trip", id: trip_id })?.try_into()
    }

    async fn transition_reservation(
        tx: &mut Transaction<'_, Postgres>,
        reservation_id: Uuid,
        expected: ReservationStatus,
        new_status: ReservationStatus,
    ) -> StoreResult<()> {
        let result = sqlx::query("UPDATE reservations SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2")
            .bind(reservation_id)
            .bind(expected.as_str())
            .bind(new_status.as_str())
            .bind(Utc::now())
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!("reservation {} is no longer {}", reservation_id, expected)));
        }
        Ok(())
    }

    async fn insert_cancellation(tx: &mut Transaction<'_, Postgres>, cancellation: &Cancellation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cancellations (id, trip_id, reservation_id, cancelled_by, reason, hours_before_departure, refund_percentage, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(cancellation.id)
        .bind(cancellation.trip_id)
        .bind(cancellation.reservation_id)
        .bind(cancellation.cancelled_by.as_str())
        .bind(&cancellation.reason)
        .bind(cancellation.hours_before_departure)
        .bind(cancellation.refund_percentage.map(i16::from))
        .bind(cancellation.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Unpaid payments of reservations that left the trip can never complete
    async fn fail_pending_payments(
        tx: &mut Transaction<'_, Postgres>,
        reservation_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if reservation_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE payments SET status = 'FAILED', updated_at = $2 WHERE reservation_id = ANY($1) AND status = 'PENDING'")
            .bind(reservation_ids)
            .bind(at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Moves the COMPLETED payment to REFUNDED and records the refund
    async fn record_refund(tx: &mut Transaction<'_, Postgres>, refund: &Refund) -> StoreResult<()> {
        let result = sqlx::query("UPDATE payments SET status = 'REFUNDED', updated_at = $2 WHERE id = $1 AND status = 'COMPLETED'")
            .bind(refund.payment_id)
            .bind(refund.processed_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!("payment {} is not refundable", refund.payment_id)));
        }

        sqlx::query(
            r#"
            INSERT INTO refunds (id, payment_id, reservation_id, refund_amount_cents, driver_compensation_cents, service_fee_retained_cents, refund_type, status, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(refund.reservation_id)
        .bind(refund.refund_amount_cents)
        .bind(refund.driver_compensation_cents)
        .bind(refund.service_fee_retained_cents)
        .bind(refund.refund_type.as_str())
        .bind(refund.status.as_str())
        .bind(refund.processed_at)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for PostgresSettlementStore {
    async fn insert_trip(&self, trip: &Trip) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trips (id, driver_id, price_per_seat_cents, departure_time, duration_seconds, status, total_seats, remaining_seats, is_full, service_fee_cents, fee_policy_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(trip.id)
        .bind(trip.driver_id)
        .bind(trip.price_per_seat_cents)
        .bind(trip.departure_time)
        .bind(trip.duration_seconds)
        .bind(trip.status.as_str())
        .bind(trip.total_seats)
        .bind(trip.remaining_seats)
        .bind(trip.is_full)
        .bind(trip.service_fee_cents)
        .bind(trip.fee_policy_id)
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_trip(&self, id: Uuid) -> StoreResult<Option<Trip>> {
        let sql = format!("{} WHERE id = $1", TRIP_SELECT);
        let row: Option<TripRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Trip::try_from).transpose()
    }

    async fn insert_fee_policy(&self, policy: &FeePolicy) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO fee_policies (id, fee_type, rate, minimum_fee_cents, maximum_fee_cents) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(policy.id)
        .bind(policy.fee_type.as_str())
        .bind(policy.rate)
        .bind(policy.minimum_fee_cents)
        .bind(policy.maximum_fee_cents)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_fee_policy(&self, id: Uuid) -> StoreResult<Option<FeePolicy>> {
        let row: Option<FeePolicyRow> = sqlx::query_as(
            "SELECT id, fee_type, rate, minimum_fee_cents, maximum_fee_cents FROM fee_policies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(FeePolicy {
                id: row.id,
                fee_type: parse(&row.fee_type)?,
                rate: row.rate,
                minimum_fee_cents: row.minimum_fee_cents,
                maximum_fee_cents: row.maximum_fee_cents,
            })),
            None => Ok(None),
        }
    }

    async fn insert_reservation(&self, reservation: &Reservation) -> StoreResult<()> {
        // Only open trips accept new reservations
        let result = sqlx::query(
            r#"
            INSERT INTO reservations (id, trip_id, passenger_id, seats_reserved, total_price_cents, status, approved_at, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
            WHERE EXISTS (SELECT 1 FROM trips WHERE id = $2 AND status IN ('PENDING', 'ACTIVE'))
            "#,
        )
        .bind(reservation.id)
        .bind(reservation.trip_id)
        .bind(reservation.passenger_id)
        .bind(reservation.seats_reserved)
        .bind(reservation.total_price_cents)
        .bind(reservation.status.as_str())
        .bind(reservation.approved_at)
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!("trip {} is not open for reservations", reservation.trip_id)));
        }
        Ok(())
    }

    async fn get_reservation(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        let sql = format!("{} WHERE id = $1", RESERVATION_SELECT);
        let row: Option<ReservationRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Reservation::try_from).transpose()
    }

    async fn list_trip_reservations(&self, trip_id: Uuid) -> StoreResult<Vec<Reservation>> {
        let sql = format!("{} WHERE trip_id = $1 ORDER BY created_at", RESERVATION_SELECT);
        let rows: Vec<ReservationRow> = sqlx::query_as(&sql)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn get_reservation_payment(&self, reservation_id: Uuid) -> StoreResult<Option<Payment>> {
        let sql = format!("{} WHERE p.reservation_id = $1", PAYMENT_SELECT);
        let row: Option<PaymentRow> = sqlx::query_as(&sql)
            .bind(reservation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Payment::try_from).transpose()
    }

    async fn list_trip_payments(&self, trip_id: Uuid) -> StoreResult<Vec<Payment>> {
        let sql = format!(
            "{} JOIN reservations r ON r.id = p.reservation_id WHERE r.trip_id = $1",
            PAYMENT_SELECT
        );
        let rows: Vec<PaymentRow> = sqlx::query_as(&sql)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn list_trip_cancellations(&self, trip_id: Uuid) -> StoreResult<Vec<Cancellation>> {
        let rows: Vec<CancellationRow> = sqlx::query_as(
            r#"
            SELECT id, trip_id, reservation_id, cancelled_by, reason, hours_before_departure, refund_percentage, created_at
            FROM cancellations WHERE trip_id = $1 ORDER BY created_at
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| -> StoreResult<Cancellation> {
                Ok(Cancellation {
                    id: row.id,
                    trip_id: row.trip_id,
                    reservation_id: row.reservation_id,
                    cancelled_by: parse(&row.cancelled_by)?,
                    reason: row.reason,
                    hours_before_departure: row.hours_before_departure,
                    refund_percentage: row.refund_percentage.map(|p| p.clamp(0, 100) as u8),
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn get_payment_refund(&self, payment_id: Uuid) -> StoreResult<Option<Refund>> {
        let row: Option<RefundRow> = sqlx::query_as(
            r#"
            SELECT id, payment_id, reservation_id, refund_amount_cents, driver_compensation_cents,
                   service_fee_retained_cents, refund_type, status, processed_at
            FROM refunds WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(Refund {
                id: row.id,
                payment_id: row.payment_id,
                reservation_id: row.reservation_id,
                refund_amount_cents: row.refund_amount_cents,
                driver_compensation_cents: row.driver_compensation_cents,
                service_fee_retained_cents: row.service_fee_retained_cents,
                refund_type: parse(&row.refund_type)?,
                status: parse(&row.status)?,
                processed_at: row.processed_at,
            })),
            None => Ok(None),
        }
    }

    async fn list_departed_active_trips(&self, now: DateTime<Utc>) -> StoreResult<Vec<Trip>> {
        let sql = format!(
            "{} WHERE status = 'ACTIVE' AND departure_time <= $1 ORDER BY departure_time",
            TRIP_SELECT
        );
        let rows: Vec<TripRow> = sqlx::query_as(&sql)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Trip::try_from).collect()
    }

    async fn get_trip_payout(&self, trip_id: Uuid) -> StoreResult<Option<DriverPayout>> {
        let row: Option<PayoutRow> = sqlx::query_as(
            r#"
            SELECT id, trip_id, driver_id, payout_amount_cents, total_received_cents, service_fee_cents,
                   late_cancellation_penalty_cents, currency, status, created_at
            FROM driver_payouts WHERE trip_id = $1
            "#,
        )
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(Some(DriverPayout {
                id: row.id,
                trip_id: row.trip_id,
                driver_id: row.driver_id,
                payout_amount_cents: row.payout_amount_cents,
                total_received_cents: row.total_received_cents,
                service_fee_cents: row.service_fee_cents,
                late_cancellation_penalty_cents: row.late_cancellation_penalty_cents,
                currency: row.currency,
                status: parse(&row.status)?,
                created_at: row.created_at,
            })),
            None => Ok(None),
        }
    }

    async fn apply_approval(&self, commit: &ApprovalCommit) -> StoreResult<Trip> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            "UPDATE reservations SET status = 'APPROVED', approved_at = $3, updated_at = $3 WHERE id = $1 AND trip_id = $2 AND status = $4",
        )
        .bind(commit.reservation_id)
        .bind(commit.trip_id)
        .bind(commit.approved_at)
        .bind(commit.expected_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!(
                "reservation {} is no longer {}",
                commit.reservation_id, commit.expected_status
            )));
        }

        // Guarded decrement: never read-modify-write the seat count
        let sql = format!(
            r#"
            UPDATE trips SET remaining_seats = remaining_seats - $2, is_full = (remaining_seats - $2 = 0), updated_at = $3
            WHERE id = $1 AND remaining_seats >= $2 AND status IN ('PENDING', 'ACTIVE')
            {}
            "#,
            TRIP_RETURNING
        );
        let row: Option<TripRow> = sqlx::query_as(&sql)
            .bind(commit.trip_id)
            .bind(commit.seats)
            .bind(commit.approved_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let trip: Trip = match row {
            Some(row) => row.try_into()?,
            None => {
                let current = Self::fetch_trip(&mut tx, commit.trip_id).await?;
                if current.status.is_terminal() {
                    return Err(conflict(format!("trip {} is {}", current.id, current.status)));
                }
                return Err(StoreError::CapacityExceeded {
                    requested: commit.seats,
                    available: current.remaining_seats,
                });
            }
        };

        let payment = &commit.payment;
        sqlx::query(
            r#"
            INSERT INTO payments (id, reservation_id, status, total_amount_cents, service_fee_cents, currency, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id)
        .bind(payment.reservation_id)
        .bind(payment.status.as_str())
        .bind(payment.total_amount_cents)
        .bind(payment.service_fee_cents)
        .bind(&payment.currency)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(trip)
    }

    async fn apply_rejection(&self, commit: &RejectionCommit) -> StoreResult<Trip> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = Utc::now();

        let result = sqlx::query(
            "UPDATE reservations SET status = 'REJECTED', approved_at = NULL, updated_at = $3 WHERE id = $1 AND trip_id = $2 AND status = $4",
        )
        .bind(commit.reservation_id)
        .bind(commit.trip_id)
        .bind(now)
        .bind(commit.expected_status.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!(
                "reservation {} is no longer {}",
                commit.reservation_id, commit.expected_status
            )));
        }

        Self::fail_pending_payments(&mut tx, &[commit.reservation_id], now).await?;

        let trip = Self::release_seats(&mut tx, commit.trip_id, commit.release_seats).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(trip)
    }

    async fn apply_transition(&self, transition: &ReservationTransition) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        Self::transition_reservation(&mut tx, transition.reservation_id, transition.expected_status, transition.new_status)
            .await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn apply_payment_settlement(&self, settlement: &PaymentSettlement) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query("UPDATE payments SET status = $2, updated_at = $3 WHERE id = $1 AND status = 'PENDING'")
            .bind(settlement.payment_id)
            .bind(settlement.new_status.as_str())
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(conflict(format!("payment {} is no longer PENDING", settlement.payment_id)));
        }

        if let Some(transition) = &settlement.reservation_transition {
            Self::transition_reservation(&mut tx, transition.reservation_id, transition.expected_status, transition.new_status)
                .await?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn apply_reservation_cancellation(&self, commit: &ReservationCancellationCommit) -> StoreResult<Trip> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let status = Self::lock_trip_status(&mut tx, commit.trip_id).await?;
        if status.is_terminal() {
            return Err(conflict(format!("trip {} is {}", commit.trip_id, status)));
        }
        Self::transition_reservation(&mut tx, commit.reservation_id, commit.expected_status, commit.new_status).await?;
        Self::insert_cancellation(&mut tx, &commit.cancellation).await?;
        if let Some(refund) = &commit.refund {
            Self::record_refund(&mut tx, refund).await?;
        }
        Self::fail_pending_payments(&mut tx, &[commit.reservation_id], commit.cancellation.created_at).await?;
        let trip = Self::release_seats(&mut tx, commit.trip_id, commit.release_seats).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(trip)
    }

    async fn apply_trip_cancellation(&self, commit: &TripCancellationCommit) -> StoreResult<Trip> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let status = Self::lock_trip_status(&mut tx, commit.trip_id).await?;
        if status != commit.expected_trip_status {
            return Err(conflict(format!(
                "trip {} is {}, expected {}",
                commit.trip_id, status, commit.expected_trip_status
            )));
        }

        let active: HashSet<Uuid> = Self::lock_trip_reservations(&mut tx, commit.trip_id)
            .await?
            .into_iter()
            .filter(|(_, s)| {
                matches!(s, ReservationStatus::PendingApproval | ReservationStatus::Approved | ReservationStatus::Confirmed)
            })
            .map(|(id, _)| id)
            .collect();
        let covered: HashSet<Uuid> = commit.reservations.iter().map(|r| r.reservation_id).collect();
        if active != covered {
            return Err(conflict(format!("reservations of trip {} changed", commit.trip_id)));
        }

        for settlement in &commit.reservations {
            Self::transition_reservation(&mut tx, settlement.reservation_id, settlement.expected_status, settlement.new_status)
                .await?;
            if let Some(refund) = &settlement.refund {
                Self::record_refund(&mut tx, refund).await?;
            }
        }
        let cancelled: Vec<Uuid> = commit.reservations.iter().map(|r| r.reservation_id).collect();
        Self::fail_pending_payments(&mut tx, &cancelled, commit.cancellation.created_at).await?;
        Self::insert_cancellation(&mut tx, &commit.cancellation).await?;

        let sql = format!("UPDATE trips SET status = 'CANCELLED', updated_at = $2 WHERE id = $1 {}", TRIP_RETURNING);
        let row: TripRow = sqlx::query_as(&sql)
            .bind(commit.trip_id)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        let trip = row.try_into()?;

        tx.commit().await.map_err(db_err)?;
        Ok(trip)
    }

    async fn apply_system_cancellation(&self, commit: &SystemCancellationCommit) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let status = Self::lock_trip_status(&mut tx, commit.trip_id).await?;
        if !matches!(status, TripStatus::Pending | TripStatus::Active) {
            return Err(conflict(format!("trip {} is {}", commit.trip_id, status)));
        }
        let reservations = Self::lock_trip_reservations(&mut tx, commit.trip_id).await?;
        if reservations.iter().any(|(_, s)| *s == ReservationStatus::Confirmed) {
            return Err(conflict(format!("trip {} has confirmed passengers", commit.trip_id)));
        }

        let now = Utc::now();
        let cancelled: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE reservations SET status = $2, updated_at = $3
            WHERE trip_id = $1 AND status IN ('PENDING_APPROVAL', 'APPROVED', 'WAITLISTED')
            RETURNING id
            "#,
        )
        .bind(commit.trip_id)
        .bind(commit.new_status.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;
        let cancelled: Vec<Uuid> = cancelled.into_iter().map(|(id,)| id).collect();
        Self::fail_pending_payments(&mut tx, &cancelled, now).await?;

        Self::insert_cancellation(&mut tx, &commit.cancellation).await?;
        sqlx::query("UPDATE trips SET status = 'CANCELLED', updated_at = $2 WHERE id = $1")
            .bind(commit.trip_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(cancelled.len())
    }

    async fn apply_trip_completion(&self, commit: &TripCompletionCommit) -> StoreResult<usize> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let status = Self::lock_trip_status(&mut tx, commit.trip_id).await?;
        if status != TripStatus::Active {
            return Err(conflict(format!("trip {} is {}", commit.trip_id, status)));
        }
        let reservations = Self::lock_trip_reservations(&mut tx, commit.trip_id).await?;
        if !reservations.iter().any(|(_, s)| *s == ReservationStatus::Confirmed) {
            return Err(conflict(format!("trip {} has no confirmed passengers", commit.trip_id)));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE reservations SET status = 'COMPLETED', updated_at = $2 WHERE trip_id = $1 AND status IN ('APPROVED', 'CONFIRMED')",
        )
        .bind(commit.trip_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query("UPDATE trips SET status = 'COMPLETED', updated_at = $2 WHERE id = $1")
            .bind(commit.trip_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected() as usize)
    }

    async fn insert_payout_if_absent(&self, payout: &DriverPayout) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO driver_payouts (id, trip_id, driver_id, payout_amount_cents, total_received_cents, service_fee_cents, late_cancellation_penalty_cents, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (trip_id) DO NOTHING
            "#,
        )
        .bind(payout.id)
        .bind(payout.trip_id)
        .bind(payout.driver_id)
        .bind(payout.payout_amount_cents)
        .bind(payout.total_received_cents)
        .bind(payout.service_fee_cents)
        .bind(payout.late_cancellation_penalty_cents)
        .bind(&payout.currency)
        .bind(payout.status.as_str())
        .bind(payout.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

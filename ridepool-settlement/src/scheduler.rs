use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use ridepool_core::repository::TripCompletionCommit;
use ridepool_core::{SettlementError, SettlementResult, TripLock};
use ridepool_shared::{ReservationStatus, SettlementEvent, Trip};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cancellation::CancellationService;
use crate::context::SettlementContext;
use crate::payout::PayoutCalculator;

const EXPIRY_REASON: &str = "Trip ended without confirmed passengers";

/// Aggregate result of one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub processed: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
    pub skipped: usize,
    pub payouts_created: usize,
    pub payouts_failed: usize,
}

#[derive(Debug)]
enum TripOutcome {
    Completed { payout_created: bool },
    Cancelled,
    /// Another worker holds the claim
    Skipped,
}

/// Per-trip work, cloned into each spawned task
#[derive(Clone)]
struct TripProcessor {
    ctx: SettlementContext,
    cancellations: CancellationService,
    payouts: PayoutCalculator,
    lock: Arc<dyn TripLock>,
}

impl TripProcessor {
    async fn process(&self, trip: Trip) -> SettlementResult<TripOutcome> {
        let claimed = self
            .lock
            .try_claim(trip.id, self.ctx.rules.trip_lock_ttl_seconds)
            .await
            .map_err(|e| SettlementError::DependencyUnavailable(format!("trip lock: {}", e)))?;
        if !claimed {
            info!("Trip {} is claimed by another worker, skipping", trip.id);
            return Ok(TripOutcome::Skipped);
        }

        let trip_id = trip.id;
        let outcome = self.settle(trip).await;
        if outcome.is_err() {
            if let Err(e) = self.lock.release(trip_id).await {
                warn!("Could not release the claim on trip {}: {}", trip_id, e);
            }
        }
        outcome
    }

    async fn settle(&self, trip: Trip) -> SettlementResult<TripOutcome> {
        let reservations = self.ctx.store.list_trip_reservations(trip.id).await?;
        let confirmed = reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed)
            .count();

        if confirmed == 0 {
            self.cancellations.expire_trip(trip.id, EXPIRY_REASON).await?;
            return Ok(TripOutcome::Cancelled);
        }

        let completed = self
            .ctx
            .store
            .apply_trip_completion(&TripCompletionCommit { trip_id: trip.id })
            .await?;
        info!("Trip {} completed with {} reservations", trip.id, completed);

        let now = self.ctx.now();
        self.ctx.effects.publish(SettlementEvent::TripCompleted { trip_id: trip.id, timestamp: now.timestamp() });
        self.ctx.effects.audit(
            "system".to_string(),
            "TRIP_COMPLETED",
            json!({ "trip_id": trip.id, "completed_reservations": completed }),
        );

        // Best effort: the completion stands even if the payout fails
        let payout_created = match self.payouts.create_driver_payout(trip.id).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Payout for completed trip {} failed, needs reconciliation: {}", trip.id, e);
                self.ctx.effects.audit_failure(
                    "system".to_string(),
                    "PAYOUT_CREATED",
                    json!({ "trip_id": trip.id, "error": e.to_string() }),
                );
                false
            }
        };
        Ok(TripOutcome::Completed { payout_created })
    }
}

/// Periodically advances ACTIVE trips whose service window has elapsed
#[derive(Clone)]
pub struct CompletionScheduler {
    processor: TripProcessor,
}

impl CompletionScheduler {
    pub fn new(
        ctx: SettlementContext,
        cancellations: CancellationService,
        payouts: PayoutCalculator,
        lock: Arc<dyn TripLock>,
    ) -> Self {
        Self { processor: TripProcessor { ctx, cancellations, payouts, lock } }
    }

    /// Run one pass. Trips are processed concurrently and every result is
    /// collected; one trip failing never stops the others.
    pub async fn complete_expired_trips(&self, now_override: Option<DateTime<Utc>>) -> SettlementResult<CompletionSummary> {
        let ctx = &self.processor.ctx;
        let now = now_override.unwrap_or_else(|| ctx.now());
        let buffer = Duration::seconds(ctx.rules.completion_buffer_seconds);

        let mut summary = CompletionSummary::default();
        let mut eligible = Vec::new();
        for trip in ctx.store.list_departed_active_trips(now).await? {
            match trip.scheduled_end() {
                None => {
                    warn!(
                        "Trip {} has no usable duration ({:?}), leaving it for manual review",
                        trip.id, trip.duration_seconds
                    );
                    summary.skipped += 1;
                }
                Some(end) if end + buffer <= now => eligible.push(trip),
                Some(_) => {}
            }
        }

        let handles: Vec<_> = eligible
            .into_iter()
            .map(|trip| {
                let processor = self.processor.clone();
                let trip_id = trip.id;
                (trip_id, tokio::spawn(async move { processor.process(trip).await }))
            })
            .collect();
        let (trip_ids, tasks): (Vec<Uuid>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(tasks).await;

        for (trip_id, result) in trip_ids.into_iter().zip(results) {
            summary.processed += 1;
            match result {
                Ok(Ok(TripOutcome::Completed { payout_created })) => {
                    summary.completed += 1;
                    if payout_created {
                        summary.payouts_created += 1;
                    } else {
                        summary.payouts_failed += 1;
                    }
                }
                Ok(Ok(TripOutcome::Cancelled)) => summary.cancelled += 1,
                Ok(Ok(TripOutcome::Skipped)) => summary.skipped += 1,
                Ok(Err(e)) => {
                    error!("Failed to settle trip {}: {}", trip_id, e);
                    summary.failed += 1;
                }
                Err(e) => {
                    error!("Settlement task for trip {} aborted: {}", trip_id, e);
                    summary.failed += 1;
                }
            }
        }

        info!(
            "Scheduler pass: processed={} completed={} cancelled={} failed={} skipped={} payouts_created={} payouts_failed={}",
            summary.processed,
            summary.completed,
            summary.cancelled,
            summary.failed,
            summary.skipped,
            summary.payouts_created,
            summary.payouts_failed
        );
        Ok(summary)
    }
}

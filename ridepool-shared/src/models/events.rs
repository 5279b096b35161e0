use uuid::Uuid;

/// Facts published after a settlement transition commits
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementEvent {
    ReservationApproved {
        reservation_id: Uuid,
        trip_id: Uuid,
        seats: i32,
        timestamp: i64,
    },
    ReservationCancelled {
        reservation_id: Uuid,
        trip_id: Uuid,
        status: String,
        refund_cents: Option<i64>,
        timestamp: i64,
    },
    TripCancelled {
        trip_id: Uuid,
        cancelled_by: String,
        affected_reservations: usize,
        timestamp: i64,
    },
    TripCompleted {
        trip_id: Uuid,
        timestamp: i64,
    },
    PayoutCreated {
        payout_id: Uuid,
        trip_id: Uuid,
        payout_amount_cents: i64,
        status: String,
        timestamp: i64,
    },
}

impl SettlementEvent {
    /// Partition key for the event stream
    pub fn trip_id(&self) -> Uuid {
        match self {
            SettlementEvent::ReservationApproved { trip_id, .. }
            | SettlementEvent::ReservationCancelled { trip_id, .. }
            | SettlementEvent::TripCancelled { trip_id, .. }
            | SettlementEvent::TripCompleted { trip_id, .. }
            | SettlementEvent::PayoutCreated { trip_id, .. } => *trip_id,
        }
    }
}

use std::sync::Arc;
use ridepool_settlement::SettlementEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SettlementEngine>,
}

impl AppState {
    pub fn new(engine: SettlementEngine) -> Self {
        Self { engine: Arc::new(engine) }
    }
}

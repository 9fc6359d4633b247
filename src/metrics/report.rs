use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use super::stats::StatsSnapshot;
use crate::middleware::Dispatcher;
use crate::server::AppState;
use crate::transport::ConnectionState;

/// What this host knows about its own telemetry delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    /// `None` when the sink is not a collector connection.
    pub connection: Option<ConnectionState>,
    pub authenticated: bool,
    pub host: Option<String>,
    pub stats: StatsSnapshot,
}

impl DeliveryReport {
    pub fn from_dispatcher(dispatcher: &Dispatcher) -> Self {
        Self {
            connection: dispatcher.connection_state(),
            authenticated: dispatcher.is_authenticated(),
            host: dispatcher.host().map(str::to_owned),
            stats: dispatcher.stats().snapshot(),
        }
    }
}

// ─── GET /api/metrics ────────────────────────────────────────────

pub async fn get_report(State(state): State<Arc<AppState>>) -> Json<DeliveryReport> {
    Json(DeliveryReport::from_dispatcher(&state.metrics))
}

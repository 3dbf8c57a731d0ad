//! Health check, statistics and Prometheus metrics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::delivery::{BrokerStats, DeadLetterEntry};
use crate::server::AppState;

/// Most recent dead-letter entries included in the stats payload.
const DEAD_LETTER_SAMPLE: usize = 20;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: ConnectionHealthResponse,
    pub delivery: DeliveryHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct ConnectionHealthResponse {
    pub online_users: usize,
}

#[derive(Debug, Serialize)]
pub struct DeliveryHealthResponse {
    pub accepting: bool,
    pub in_flight: usize,
    pub dead_letters: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionHealthResponse,
    pub broker: BrokerStats,
    pub recent_dead_letters: Vec<DeadLetterEntry>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker_stats = state.broker.stats();
    let accepting = !state.broker.is_closed();

    let status = if accepting { "healthy" } else { "draining" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: ConnectionHealthResponse {
            online_users: state.registry.online_count(),
        },
        delivery: DeliveryHealthResponse {
            accepting,
            in_flight: broker_stats.in_flight,
            dead_letters: broker_stats.dead_letters,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: ConnectionHealthResponse {
            online_users: state.registry.stats().online_users,
        },
        broker: state.broker.stats(),
        recent_dead_letters: state.broker.dead_letters(DEAD_LETTER_SAMPLE),
    })
}

pub async fn metrics() -> Result<String, StatusCode> {
    crate::metrics::encode_metrics().map_err(|e| {
        tracing::error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

//! Prometheus metrics for the realtime service.
//!
//! Covers the three core subsystems:
//! - Connection registry (active connections, supersedes, backpressure evictions)
//! - Delivery pipeline (enqueued, delivered, retried, dead-lettered)
//! - Matching transaction (commits, conflicts)

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ridehub";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of currently registered connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of currently registered WebSocket connections"
    ).unwrap();

    /// Total connections opened
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// Total connections closed
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// Connections torn down because a newer registration for the same user arrived
    pub static ref CONNECTIONS_SUPERSEDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_superseded_total", METRIC_PREFIX),
        "Connections replaced by a newer registration for the same user"
    ).unwrap();

    /// Connections evicted because their outbound queue filled up
    pub static ref BACKPRESSURE_EVICTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_backpressure_evictions_total", METRIC_PREFIX),
        "Connections disconnected because the outbound queue was full"
    ).unwrap();

    /// Sends that found the recipient offline (expected, not an error)
    pub static ref SEND_OFFLINE_TOTAL: IntCounter = register_int_counter!(
        format!("{}_send_offline_total", METRIC_PREFIX),
        "Registry sends that found no live connection for the recipient"
    ).unwrap();

    // ============================================================================
    // Delivery Pipeline Metrics
    // ============================================================================

    /// Intents enqueued per priority class
    pub static ref INTENTS_ENQUEUED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_intents_enqueued_total", METRIC_PREFIX),
        "Delivery intents enqueued",
        &["class"]
    ).unwrap();

    /// Intents acknowledged as delivered (or handled as offline no-ops)
    pub static ref INTENTS_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_intents_delivered_total", METRIC_PREFIX),
        "Delivery intents acknowledged by workers"
    ).unwrap();

    /// Retries scheduled after a failed attempt
    pub static ref INTENTS_RETRIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_intents_retried_total", METRIC_PREFIX),
        "Delivery intents rescheduled after a transient failure"
    ).unwrap();

    /// Intents dead-lettered after exhausting retries
    pub static ref INTENTS_DEAD_LETTERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_intents_dead_lettered_total", METRIC_PREFIX),
        "Delivery intents moved to the dead-letter store"
    ).unwrap();

    /// In-flight leases that expired and were made visible again
    pub static ref LEASES_EXPIRED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_leases_expired_total", METRIC_PREFIX),
        "In-flight intents requeued after their lease expired"
    ).unwrap();

    // ============================================================================
    // Matching Metrics
    // ============================================================================

    /// Committed ride matches
    pub static ref MATCH_COMMITS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_match_commits_total", METRIC_PREFIX),
        "Ride matching transactions committed"
    ).unwrap();

    /// Match attempts aborted because a side was already matched
    pub static ref MATCH_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_match_conflicts_total", METRIC_PREFIX),
        "Ride matching transactions aborted on an already-matched side"
    ).unwrap();

    // ============================================================================
    // Trigger Metrics
    // ============================================================================

    /// Redis subscriber reconnection attempts
    pub static ref REDIS_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_redis_reconnects_total", METRIC_PREFIX),
        "Redis delivery trigger reconnection attempts"
    ).unwrap();

    /// Delivery messages received over Redis pub/sub
    pub static ref REDIS_MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_redis_messages_received_total", METRIC_PREFIX),
        "Delivery messages received from Redis pub/sub"
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        CONNECTIONS_OPENED_TOTAL.inc();
        let output = encode_metrics().unwrap();
        assert!(output.contains("ridehub_connections_opened_total"));
    }
}

//! Connection registry: the single source of truth for who is online.
//!
//! The map is keyed by user ID and holds exactly one live connection per
//! user; a new registration supersedes the previous one, whose outbound
//! queue is closed so its writer loop terminates.
//!
//! Register, unregister and send are each atomic with respect to one
//! another: all three go through the sharded map, which serializes
//! operations per key, so a registration race can never double-register
//! or lose an entry. Sends never block; a full outbound queue means the
//! consumer cannot keep up and the connection is evicted rather than
//! allowed to grow memory or stall the caller.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::metrics::{
    BACKPRESSURE_EVICTIONS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_SUPERSEDED_TOTAL,
    SEND_OFFLINE_TOTAL,
};
use crate::websocket::ServerFrame;

/// Handle for a single live connection.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<ServerFrame>,
    close_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// Create a handle together with the receiving ends its writer loop owns:
    /// the outbound frame queue and the close signal.
    pub fn new(
        user_id: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerFrame>, watch::Receiver<bool>) {
        let (outbound, outbound_rx) = mpsc::channel(capacity);
        let (close_tx, close_rx) = watch::channel(false);

        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            connected_at: Utc::now(),
            outbound,
            close_tx,
        });

        (handle, outbound_rx, close_rx)
    }

    /// Non-blocking enqueue onto the outbound queue.
    fn try_send(&self, frame: ServerFrame) -> Result<(), mpsc::error::TrySendError<ServerFrame>> {
        self.outbound.try_send(frame)
    }

    /// Signal the writer loop to terminate. Idempotent.
    pub fn close(&self) {
        let _ = self.close_tx.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }
}

/// Outcome of a send that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame handed to the connection's outbound queue.
    Delivered,
    /// No live connection for this user. Expected and frequent; not an error.
    Offline,
}

/// Send failures. Both are transient from the producer's point of view and
/// subject to the delivery retry policy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("connection for {0} evicted: outbound queue full")]
    SlowConsumer(String),

    #[error("connection for {0} closed during send")]
    Closed(String),
}

/// Directory mapping online user IDs to writable connection handles.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection for its user, superseding any prior entry.
    ///
    /// The superseded connection's queue is closed first so its writer loop
    /// exits; its later unregister becomes a no-op thanks to the instance
    /// guard in [`unregister`](Self::unregister).
    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        let user_id = handle.user_id.clone();
        let connection_id = handle.id;

        if let Some(previous) = self.connections.insert(user_id.clone(), handle) {
            previous.close();
            CONNECTIONS_SUPERSEDED_TOTAL.inc();
            tracing::info!(
                user_id = %user_id,
                superseded_id = %previous.id,
                connection_id = %connection_id,
                "Superseded previous connection for user"
            );
        }

        CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
        tracing::info!(connection_id = %connection_id, user_id = %user_id, "Connection registered");
    }

    /// Remove the entry for this handle's user, but only if the stored entry
    /// is still this very instance. A stale unregister from a superseded
    /// connection must not evict its successor.
    pub fn unregister(&self, handle: &Arc<ConnectionHandle>) -> bool {
        let removed = self
            .connections
            .remove_if(&handle.user_id, |_, stored| Arc::ptr_eq(stored, handle))
            .is_some();

        if removed {
            CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
            tracing::info!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                "Connection unregistered"
            );
        }

        removed
    }

    /// Deliver an event frame to a user's live connection.
    ///
    /// Offline recipients are a non-error outcome. A full outbound queue
    /// evicts the connection (backpressure policy); a queue closed mid-send
    /// means delivery raced teardown. Both surface as [`SendError`] so the
    /// delivery pipeline can retry.
    pub fn send(
        &self,
        user_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<SendOutcome, SendError> {
        // Clone out of the shard before sending so eviction below cannot
        // deadlock on the same shard lock.
        let handle = match self.connections.get(user_id) {
            Some(entry) => entry.value().clone(),
            None => {
                SEND_OFFLINE_TOTAL.inc();
                tracing::debug!(user_id = %user_id, event_type = %event_type, "Recipient offline");
                return Ok(SendOutcome::Offline);
            }
        };

        match handle.try_send(ServerFrame::event(event_type, payload)) {
            Ok(()) => Ok(SendOutcome::Delivered),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.evict(&handle);
                BACKPRESSURE_EVICTIONS_TOTAL.inc();
                tracing::warn!(
                    connection_id = %handle.id,
                    user_id = %user_id,
                    "Outbound queue full, disconnecting slow consumer"
                );
                Err(SendError::SlowConsumer(user_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Teardown already in progress; make sure the entry is gone.
                self.evict(&handle);
                Err(SendError::Closed(user_id.to_string()))
            }
        }
    }

    fn evict(&self, handle: &Arc<ConnectionHandle>) {
        handle.close();
        self.connections
            .remove_if(&handle.user_id, |_, stored| Arc::ptr_eq(stored, handle));
        CONNECTIONS_ACTIVE.set(self.connections.len() as i64);
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.connections.len()
    }

    /// Get statistics for the stats endpoint.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            online_users: self.connections.len(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegistryStats {
    pub online_users: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_send_to_offline_user_is_not_an_error() {
        let registry = ConnectionRegistry::new();
        let outcome = registry.send("nobody", "ping", json!({}));
        assert_eq!(outcome, Ok(SendOutcome::Offline));
    }

    #[tokio::test]
    async fn test_register_supersedes_previous_connection() {
        let registry = ConnectionRegistry::new();

        let (first, _rx1, _close1) = ConnectionHandle::new("user-1", 8);
        let (second, mut rx2, _close2) = ConnectionHandle::new("user-1", 8);

        registry.register(first.clone());
        registry.register(second.clone());

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.online_count(), 1);

        // Delivery reaches the newer connection
        let outcome = registry.send("user-1", "ping", json!({}));
        assert_eq!(outcome, Ok(SendOutcome::Delivered));
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_evict_successor() {
        let registry = ConnectionRegistry::new();

        let (first, _rx1, _close1) = ConnectionHandle::new("user-1", 8);
        let (second, _rx2, _close2) = ConnectionHandle::new("user-1", 8);

        registry.register(first.clone());
        registry.register(second.clone());

        // The superseded connection unregisters on its way out
        assert!(!registry.unregister(&first));
        assert!(registry.is_online("user-1"));

        assert!(registry.unregister(&second));
        assert!(!registry.is_online("user-1"));
    }

    #[tokio::test]
    async fn test_full_queue_evicts_slow_consumer() {
        let registry = ConnectionRegistry::new();

        let (handle, _rx, _close) = ConnectionHandle::new("user-1", 2);
        registry.register(handle.clone());

        assert_eq!(
            registry.send("user-1", "e", json!(1)),
            Ok(SendOutcome::Delivered)
        );
        assert_eq!(
            registry.send("user-1", "e", json!(2)),
            Ok(SendOutcome::Delivered)
        );

        // Third send overflows the undrained queue
        let outcome = registry.send("user-1", "e", json!(3));
        assert_eq!(outcome, Err(SendError::SlowConsumer("user-1".to_string())));
        assert!(handle.is_closed());
        assert!(!registry.is_online("user-1"));

        // A fresh registration for the same user works cleanly
        let (fresh, _rx, _close) = ConnectionHandle::new("user-1", 2);
        registry.register(fresh);
        assert_eq!(
            registry.send("user-1", "e", json!(4)),
            Ok(SendOutcome::Delivered)
        );
    }

    #[tokio::test]
    async fn test_send_racing_teardown_is_retryable() {
        let registry = ConnectionRegistry::new();

        let (handle, rx, _close) = ConnectionHandle::new("user-1", 2);
        registry.register(handle.clone());

        // Receiver dropped: the connection is mid-teardown
        drop(rx);

        let outcome = registry.send("user-1", "e", json!({}));
        assert_eq!(outcome, Err(SendError::Closed("user-1".to_string())));
        assert!(!registry.is_online("user-1"));
    }
}

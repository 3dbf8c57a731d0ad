use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::registry::SendError;

use super::broker::{DeliveryBroker, FailureDisposition, LeasedIntent};
use super::intent::DeliveryIntent;

/// Result of a delivery attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The recipient has no live connection. Handled, not retried.
    RecipientOffline,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("socket delivery failed: {0}")]
    Socket(#[from] SendError),

    #[error("push delivery failed: {0}")]
    Push(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl DeliveryError {
    /// Producer errors cannot be fixed by redelivery and are rejected
    /// straight to the dead-letter store.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::InvalidPayload(_))
    }
}

/// A delivery mechanism for one or more event types.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, intent: &DeliveryIntent) -> Result<DeliveryOutcome, DeliveryError>;
}

/// Routing table from event type to delivery handler.
///
/// Unregistered event types fall through to the default handler
/// (live-socket delivery).
pub struct HandlerRegistry {
    routes: HashMap<String, Arc<dyn DeliveryHandler>>,
    fallback: Arc<dyn DeliveryHandler>,
}

impl HandlerRegistry {
    pub fn new(fallback: Arc<dyn DeliveryHandler>) -> Self {
        Self {
            routes: HashMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        self.routes.insert(event_type.into(), handler);
    }

    pub fn resolve(&self, event_type: &str) -> &Arc<dyn DeliveryHandler> {
        self.routes.get(event_type).unwrap_or(&self.fallback)
    }
}

/// Pool of delivery workers draining the broker.
pub struct WorkerPool {
    broker: Arc<DeliveryBroker>,
    handlers: Arc<HandlerRegistry>,
}

impl WorkerPool {
    pub fn new(broker: Arc<DeliveryBroker>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { broker, handlers }
    }

    /// Spawn `count` workers. They run until the broker is closed.
    pub fn spawn(&self, count: usize) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let broker = self.broker.clone();
                let handlers = self.handlers.clone();
                tokio::spawn(async move {
                    tracing::debug!(worker_id = worker_id, "Delivery worker started");
                    worker_loop(worker_id, broker, handlers).await;
                    tracing::debug!(worker_id = worker_id, "Delivery worker stopped");
                })
            })
            .collect()
    }
}

async fn worker_loop(
    worker_id: usize,
    broker: Arc<DeliveryBroker>,
    handlers: Arc<HandlerRegistry>,
) {
    while let Some(lease) = broker.reserve().await {
        let handler = handlers.resolve(&lease.intent.event_type);
        let result = handler.deliver(&lease.intent).await;
        resolve_attempt(worker_id, &broker, lease, result);
    }
}

fn resolve_attempt(
    worker_id: usize,
    broker: &DeliveryBroker,
    lease: LeasedIntent,
    result: Result<DeliveryOutcome, DeliveryError>,
) {
    match result {
        Ok(DeliveryOutcome::Delivered) => {
            tracing::debug!(
                worker_id = worker_id,
                intent_id = %lease.intent.id,
                recipient_id = %lease.intent.recipient_id,
                event_type = %lease.intent.event_type,
                "Intent delivered"
            );
            broker.ack(&lease);
        }
        Ok(DeliveryOutcome::RecipientOffline) => {
            // Expected and frequent; the intent is handled, not retried.
            tracing::debug!(
                worker_id = worker_id,
                intent_id = %lease.intent.id,
                recipient_id = %lease.intent.recipient_id,
                "Recipient offline, intent handled"
            );
            broker.ack(&lease);
        }
        Err(e) if e.is_retryable() => {
            let reason = e.to_string();
            if let FailureDisposition::Retried { attempts, delay } =
                broker.fail(lease, &reason)
            {
                tracing::debug!(
                    worker_id = worker_id,
                    attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Delivery attempt failed, retry scheduled"
                );
            }
        }
        Err(e) => {
            broker.reject(lease, &e.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CountingHandler;

    #[async_trait]
    impl DeliveryHandler for CountingHandler {
        async fn deliver(&self, _: &DeliveryIntent) -> Result<DeliveryOutcome, DeliveryError> {
            Ok(DeliveryOutcome::Delivered)
        }
    }

    struct RefusingHandler;

    #[async_trait]
    impl DeliveryHandler for RefusingHandler {
        async fn deliver(&self, _: &DeliveryIntent) -> Result<DeliveryOutcome, DeliveryError> {
            Err(DeliveryError::Push("provider down".to_string()))
        }
    }

    #[test]
    fn test_registry_routes_with_fallback() {
        let mut registry = HandlerRegistry::new(Arc::new(CountingHandler));
        registry.register("push.notification", Arc::new(RefusingHandler));

        let intent = DeliveryIntent::new("u", "push.notification", json!({}));
        let routed = registry.resolve(&intent.event_type);
        let fallback = registry.resolve("ride.matched");

        // The routed handler refuses; the fallback delivers.
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        assert!(rt.block_on(routed.deliver(&intent)).is_err());
        assert!(rt.block_on(fallback.deliver(&intent)).is_ok());
    }

    #[test]
    fn test_invalid_payload_is_not_retryable() {
        assert!(!DeliveryError::InvalidPayload("x".to_string()).is_retryable());
        assert!(DeliveryError::Push("x".to_string()).is_retryable());
    }
}

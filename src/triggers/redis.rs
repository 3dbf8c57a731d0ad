use std::sync::Arc;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::config::RedisConfig;
use crate::delivery::{DeliveryBroker, PriorityClass};
use crate::metrics::{REDIS_MESSAGES_RECEIVED_TOTAL, REDIS_RECONNECTS_TOTAL};

use super::backoff::ExponentialBackoff;

/// Message format other backend services publish on the delivery channel.
#[derive(Debug, Deserialize)]
pub struct DeliveryMessage {
    pub recipient_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: PriorityClass,
}

/// Redis Pub/Sub trigger: bridges delivery messages published by other
/// services into the local broker.
pub struct RedisIntentSubscriber {
    config: RedisConfig,
    broker: Arc<DeliveryBroker>,
    shutdown: broadcast::Sender<()>,
}

impl RedisIntentSubscriber {
    pub fn new(config: RedisConfig, broker: Arc<DeliveryBroker>) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            broker,
            shutdown,
        }
    }

    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown.clone()
    }

    /// Run the subscriber until shut down. Connection failures are retried
    /// with exponential backoff; a successful subscription resets the
    /// backoff so the next outage starts from the initial delay.
    pub async fn start(&self) -> anyhow::Result<()> {
        if self.config.url.is_empty() {
            tracing::info!("No Redis URL configured, skipping delivery trigger");
            return Ok(());
        }

        tracing::info!(
            channel = %self.config.intent_channel,
            "Starting Redis delivery trigger"
        );

        let mut backoff = ExponentialBackoff::new();

        loop {
            match self.run_subscription_loop(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Redis delivery trigger stopped gracefully");
                    break;
                }
                Err(e) => {
                    if self.broker.is_closed() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    REDIS_RECONNECTS_TOTAL.inc();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Redis subscription error, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Ok(())
    }

    async fn run_subscription_loop(
        &self,
        backoff: &mut ExponentialBackoff,
    ) -> anyhow::Result<()> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        pubsub.subscribe(&self.config.intent_channel).await?;
        backoff.reset();
        tracing::info!(
            channel = %self.config.intent_channel,
            "Redis subscription established"
        );

        let mut message_stream = pubsub.on_message();
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Redis delivery trigger received shutdown signal");
                    break;
                }
                msg = message_stream.next() => {
                    match msg {
                        Some(msg) => {
                            let payload: String = match msg.get_payload() {
                                Ok(p) => p,
                                Err(e) => {
                                    tracing::warn!(error = %e, "Failed to get message payload");
                                    continue;
                                }
                            };
                            self.handle_message(&payload);
                        }
                        None => {
                            anyhow::bail!("Redis message stream ended");
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn handle_message(&self, payload: &str) {
        REDIS_MESSAGES_RECEIVED_TOTAL.inc();

        let message: DeliveryMessage = match serde_json::from_str(payload) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    payload = %payload,
                    "Failed to parse delivery message"
                );
                return;
            }
        };

        let intent = crate::delivery::DeliveryIntent::new(
            message.recipient_id,
            message.event_type,
            message.payload,
        );

        if let Err(e) = self.broker.enqueue(intent, message.priority) {
            tracing::warn!(error = %e, "Failed to enqueue delivery message from Redis");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delivery_message() {
        let json = r#"{
            "recipient_id": "user-123",
            "event_type": "ride.offered",
            "payload": {"offer_id": "o-1"},
            "priority": "critical"
        }"#;

        let message: DeliveryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.recipient_id, "user-123");
        assert_eq!(message.event_type, "ride.offered");
        assert_eq!(message.priority, PriorityClass::Critical);
    }

    #[test]
    fn test_priority_defaults_when_absent() {
        let json = r#"{
            "recipient_id": "user-123",
            "event_type": "payment.result",
            "payload": {}
        }"#;

        let message: DeliveryMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.priority, PriorityClass::Default);
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::DeliveryConfig;
use crate::delivery::DeliveryBroker;

/// Background task that makes expired in-flight leases visible again.
///
/// A lease expires when a worker reserved an intent and never resolved it
/// (crash, stall). The sweeper returns such intents to their ready queues
/// so another worker picks them up.
pub struct LeaseSweeper {
    broker: Arc<DeliveryBroker>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LeaseSweeper {
    pub fn new(
        config: &DeliveryConfig,
        broker: Arc<DeliveryBroker>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            broker,
            interval: Duration::from_secs(config.sweep_interval_seconds),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.tick().await; // skip the immediate first tick

        tracing::info!(
            sweep_interval_secs = self.interval.as_secs(),
            "Lease sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Lease sweeper received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let requeued = self.broker.requeue_expired();
                    if requeued > 0 {
                        tracing::info!(requeued = requeued, "Requeued expired leases");
                    }
                }
            }
        }

        tracing::info!("Lease sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryIntent, PriorityClass};
    use serde_json::json;

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let config = DeliveryConfig::default();
        let broker = Arc::new(DeliveryBroker::new(&config));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let sweeper = LeaseSweeper::new(&config, broker, shutdown_rx);
        let handle = tokio::spawn(sweeper.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("sweeper should stop")
            .expect("sweeper should not panic");
    }

    #[tokio::test]
    async fn test_sweeper_requeues_expired_lease() {
        let config = DeliveryConfig {
            lease_seconds: 0,
            sweep_interval_seconds: 1,
            ..Default::default()
        };
        let broker = Arc::new(DeliveryBroker::new(&config));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        broker
            .enqueue(
                DeliveryIntent::new("user-1", "ride.matched", json!({})),
                PriorityClass::Default,
            )
            .unwrap();

        // Reserve and abandon the lease
        let lease = broker.reserve().await.unwrap();
        let intent_id = lease.intent.id;
        drop(lease);

        let sweeper = LeaseSweeper::new(&config, broker.clone(), shutdown_rx);
        let handle = tokio::spawn(sweeper.run());

        // After a sweep the intent is visible again
        let redelivered =
            tokio::time::timeout(Duration::from_secs(3), broker.reserve())
                .await
                .expect("intent should be redelivered")
                .unwrap();
        assert_eq!(redelivered.intent.id, intent_id);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }
}

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::delivery::DeliveryBroker;
use crate::matching::{MatchingService, RideStore};
use crate::registry::ConnectionRegistry;
use crate::websocket::InboundEvent;

/// Capacity of the shared inbound broadcast channel. Lagging subscribers
/// drop messages rather than block producers.
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<ConnectionRegistry>,
    pub broker: Arc<DeliveryBroker>,
    pub matching: Arc<MatchingService>,
    /// Fan-out path for events published by connected clients.
    pub inbound_tx: broadcast::Sender<InboundEvent>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, store: Arc<dyn RideStore>) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(ConnectionRegistry::new());
        let broker = Arc::new(DeliveryBroker::new(&settings.delivery));
        let matching = Arc::new(MatchingService::new(store, broker.clone()));
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            broker,
            matching,
            inbound_tx,
            start_time: Instant::now(),
        }
    }
}

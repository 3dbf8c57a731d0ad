use std::sync::Arc;

use async_trait::async_trait;

use crate::events::PushPayload;
use crate::push::PushSender;
use crate::registry::{ConnectionRegistry, SendOutcome};

use super::intent::DeliveryIntent;
use super::worker::{DeliveryError, DeliveryHandler, DeliveryOutcome};

/// Default handler: push the event to the recipient's live connection
/// through the connection registry.
pub struct SocketDeliveryHandler {
    registry: Arc<ConnectionRegistry>,
}

impl SocketDeliveryHandler {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DeliveryHandler for SocketDeliveryHandler {
    async fn deliver(&self, intent: &DeliveryIntent) -> Result<DeliveryOutcome, DeliveryError> {
        let outcome = self.registry.send(
            &intent.recipient_id,
            &intent.event_type,
            intent.payload.clone(),
        )?;

        Ok(match outcome {
            SendOutcome::Delivered => DeliveryOutcome::Delivered,
            SendOutcome::Offline => DeliveryOutcome::RecipientOffline,
        })
    }
}

/// Handler for `push.*` event types: hands the payload to the external
/// push-notification collaborator.
pub struct PushDeliveryHandler {
    push: Arc<dyn PushSender>,
}

impl PushDeliveryHandler {
    pub fn new(push: Arc<dyn PushSender>) -> Self {
        Self { push }
    }
}

#[async_trait]
impl DeliveryHandler for PushDeliveryHandler {
    async fn deliver(&self, intent: &DeliveryIntent) -> Result<DeliveryOutcome, DeliveryError> {
        let payload: PushPayload = serde_json::from_value(intent.payload.clone())
            .map_err(|e| DeliveryError::InvalidPayload(e.to_string()))?;

        self.push
            .send_push(&payload.device_token, &payload.title, &payload.body)
            .await
            .map_err(|e| DeliveryError::Push(e.to_string()))?;

        Ok(DeliveryOutcome::Delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use serde_json::json;

    #[tokio::test]
    async fn test_socket_handler_maps_offline_to_handled() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handler = SocketDeliveryHandler::new(registry.clone());

        let intent = DeliveryIntent::new("ghost", "ride.matched", json!({}));
        let outcome = handler.deliver(&intent).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::RecipientOffline);
    }

    #[tokio::test]
    async fn test_socket_handler_delivers_to_live_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (handle, mut rx, _close) = ConnectionHandle::new("user-1", 8);
        registry.register(handle);

        let handler = SocketDeliveryHandler::new(registry.clone());
        let intent = DeliveryIntent::new("user-1", "ride.matched", json!({"ride_id": "r1"}));

        let outcome = handler.deliver(&intent).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.frame_type, "ride.matched");
    }

    #[tokio::test]
    async fn test_push_handler_rejects_malformed_payload() {
        let handler = PushDeliveryHandler::new(Arc::new(crate::push::LoggingPushSender));
        let intent = DeliveryIntent::new("user-1", "push.notification", json!({"nope": true}));

        let err = handler.deliver(&intent).await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidPayload(_)));
    }
}

//! Typed catalogue of the events the delivery pipeline carries.
//!
//! Producers build a [`RideEvent`] and convert it into a delivery intent;
//! handlers deserialize the payload back against the same schema instead of
//! inspecting untyped JSON. The wire tag is the intent's `event_type`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::DeliveryIntent;

pub const RIDE_OFFERED: &str = "ride.offered";
pub const RIDE_REQUESTED: &str = "ride.requested";
pub const RIDE_MATCHED: &str = "ride.matched";
pub const RIDE_CANCELLED: &str = "ride.cancelled";
pub const PAYMENT_RESULT: &str = "payment.result";
pub const PUSH_NOTIFICATION: &str = "push.notification";

/// Events delivered to clients over the live socket or as push notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum RideEvent {
    #[serde(rename = "ride.offered")]
    RideOffered {
        offer_id: Uuid,
        driver_id: String,
        route_from: String,
        route_to: String,
    },
    #[serde(rename = "ride.requested")]
    RideRequested {
        request_id: Uuid,
        hitcher_id: String,
        route_from: String,
        route_to: String,
    },
    #[serde(rename = "ride.matched")]
    RideMatched {
        ride_id: Uuid,
        offer_id: Uuid,
        request_id: Uuid,
        driver_id: String,
        hitcher_id: String,
    },
    #[serde(rename = "ride.cancelled")]
    RideCancelled {
        offer_id: Option<Uuid>,
        request_id: Option<Uuid>,
        cancelled_by: String,
    },
    #[serde(rename = "payment.result")]
    PaymentResult {
        transaction_id: Uuid,
        ride_id: Uuid,
        status: String,
    },
    #[serde(rename = "push.notification")]
    PushNotification {
        device_token: String,
        title: String,
        body: String,
    },
}

impl RideEvent {
    /// Wire tag for this event; doubles as the handler-routing key.
    pub fn event_type(&self) -> &'static str {
        match self {
            RideEvent::RideOffered { .. } => RIDE_OFFERED,
            RideEvent::RideRequested { .. } => RIDE_REQUESTED,
            RideEvent::RideMatched { .. } => RIDE_MATCHED,
            RideEvent::RideCancelled { .. } => RIDE_CANCELLED,
            RideEvent::PaymentResult { .. } => PAYMENT_RESULT,
            RideEvent::PushNotification { .. } => PUSH_NOTIFICATION,
        }
    }

    /// Convert this event into a delivery intent for the given recipient.
    ///
    /// Only the `data` half of the tagged representation travels as the
    /// payload; the tag becomes the intent's `event_type`.
    pub fn into_intent(self, recipient_id: impl Into<String>) -> DeliveryIntent {
        let event_type = self.event_type();
        let payload = match serde_json::to_value(&self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("data").unwrap_or(serde_json::Value::Null)
            }
            _ => serde_json::Value::Null,
        };

        DeliveryIntent::new(recipient_id, event_type, payload)
    }
}

/// Payload schema for `push.notification` intents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushPayload {
    pub device_token: String,
    pub title: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_tags() {
        let event = RideEvent::RideMatched {
            ride_id: Uuid::new_v4(),
            offer_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            driver_id: "driver-1".to_string(),
            hitcher_id: "hitcher-1".to_string(),
        };
        assert_eq!(event.event_type(), "ride.matched");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ride.matched");
        assert!(json["data"]["ride_id"].is_string());
    }

    #[test]
    fn test_into_intent_splits_tag_and_payload() {
        let offer_id = Uuid::new_v4();
        let event = RideEvent::RideCancelled {
            offer_id: Some(offer_id),
            request_id: None,
            cancelled_by: "user-7".to_string(),
        };

        let intent = event.into_intent("user-9");
        assert_eq!(intent.recipient_id, "user-9");
        assert_eq!(intent.event_type, "ride.cancelled");
        assert_eq!(intent.payload["cancelled_by"], "user-7");
        assert_eq!(intent.attempts, 0);
    }

    #[test]
    fn test_push_payload_schema() {
        let event = RideEvent::PushNotification {
            device_token: "tok-1".to_string(),
            title: "Ride matched".to_string(),
            body: "Your ride is confirmed".to_string(),
        };
        let intent = event.into_intent("user-1");

        let payload: PushPayload = serde_json::from_value(intent.payload).unwrap();
        assert_eq!(payload.device_token, "tok-1");
    }

    #[test]
    fn test_deserialize_from_wire() {
        let wire = json!({
            "type": "payment.result",
            "data": {
                "transaction_id": Uuid::new_v4(),
                "ride_id": Uuid::new_v4(),
                "status": "captured"
            }
        });
        let event: RideEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(event.event_type(), "payment.result");
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A unit of work representing "send this event to this recipient".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryIntent {
    /// Unique intent ID; doubles as the lease key while in flight
    pub id: Uuid,
    /// User the event is addressed to
    pub recipient_id: String,
    /// Event type tag; selects the delivery handler
    pub event_type: String,
    /// Opaque structured payload, framed as `{type, data}` on delivery
    pub payload: Value,
    /// Delivery attempts so far
    pub attempts: u32,
    /// When the intent was first enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl DeliveryIntent {
    pub fn new(
        recipient_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_id: recipient_id.into(),
            event_type: event_type.into(),
            payload,
            attempts: 0,
            enqueued_at: Utc::now(),
        }
    }
}

/// Priority classes for delivery intents.
///
/// Classes are weighted for worker attention so critical intents are
/// serviced preferentially without starving the lower classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    Critical,
    #[default]
    Default,
    Low,
}

impl PriorityClass {
    pub const COUNT: usize = 3;

    pub fn index(self) -> usize {
        match self {
            PriorityClass::Critical => 0,
            PriorityClass::Default => 1,
            PriorityClass::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PriorityClass::Critical => "critical",
            PriorityClass::Default => "default",
            PriorityClass::Low => "low",
        }
    }
}

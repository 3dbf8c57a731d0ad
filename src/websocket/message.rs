use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientFrame {
    Ping,
    /// Application event republished to the shared inbound broadcast path.
    Event { event_type: String, data: Value },
}

/// Frame written to a live connection: `{type, data}`.
///
/// For delivered events `type` is the event type tag itself, so clients
/// dispatch on one field regardless of whether a frame is an event or a
/// control frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerFrame {
    pub fn event(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            frame_type: event_type.into(),
            data: Some(data),
        }
    }

    pub fn pong() -> Self {
        Self {
            frame_type: "pong".to_string(),
            data: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            frame_type: "error".to_string(),
            data: Some(serde_json::json!({
                "code": code.into(),
                "message": message.into(),
            })),
        }
    }
}

/// Inbound frame republished on the shared broadcast path, annotated with
/// the authenticated sender.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub user_id: String,
    pub event_type: String,
    pub data: Value,
}

//! Push-notification collaborator interface.
//!
//! The provider integration itself lives outside this service; the delivery
//! pipeline only needs "send push to token T" as an ordinary retryable
//! handler.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("push provider error: {0}")]
pub struct PushError(pub String);

#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send_push(&self, device_token: &str, title: &str, body: &str)
        -> Result<(), PushError>;
}

/// Development stand-in that logs instead of calling a provider.
pub struct LoggingPushSender;

#[async_trait]
impl PushSender for LoggingPushSender {
    async fn send_push(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
    ) -> Result<(), PushError> {
        tracing::info!(
            device_token = %device_token,
            title = %title,
            body = %body,
            "Push notification (logging sender)"
        );
        Ok(())
    }
}

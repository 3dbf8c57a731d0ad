//! External entry points that feed the delivery pipeline: the Redis
//! Pub/Sub channel other backend services publish on, plus the HTTP
//! trigger endpoints in `crate::api`.

mod backoff;
mod redis;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use redis::{DeliveryMessage, RedisIntentSubscriber};

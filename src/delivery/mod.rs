//! Asynchronous delivery pipeline.
//!
//! Producers enqueue delivery intents onto a weighted priority broker;
//! a worker pool consumes them and routes each intent to the handler
//! registered for its event type (live-socket delivery through the
//! connection registry, or the external push-notification collaborator).
//! Failures are retried with exponential backoff and dead-lettered once
//! retries are exhausted. Enqueue is fire-and-forget from the producer's
//! perspective: delivery errors are observed, never propagated back.

mod broker;
mod handlers;
mod intent;
mod retry;
mod worker;

pub use broker::{BrokerStats, DeadLetterEntry, DeliveryBroker, FailureDisposition, LeasedIntent, QueueError};
pub use handlers::{PushDeliveryHandler, SocketDeliveryHandler};
pub use intent::{DeliveryIntent, PriorityClass};
pub use retry::RetryPolicy;
pub use worker::{DeliveryError, DeliveryHandler, DeliveryOutcome, HandlerRegistry, WorkerPool};

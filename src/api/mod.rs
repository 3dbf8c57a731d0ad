//! HTTP surface: health, stats and metrics endpoints, plus the internal
//! trigger API other backend services call to enqueue deliveries and drive
//! the matching transaction.

mod handlers;
mod health;
mod routes;

pub use handlers::{
    accept_ride, cancel_offer, cancel_request, enqueue_delivery, AcceptRideRequest,
    EnqueueDeliveryRequest, EnqueueDeliveryResponse,
};
pub use health::{health, metrics, stats};
pub use routes::api_routes;

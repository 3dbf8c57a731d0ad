use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::handlers::{accept_ride, cancel_offer, cancel_request, enqueue_delivery};
use super::health::{health, metrics, stats};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Health & observability
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics))
        // Internal trigger endpoints (API-key protected when configured)
        .nest(
            "/api/v1",
            Router::new()
                .route("/deliveries", post(enqueue_delivery))
                .route("/rides/accept", post(accept_ride))
                .route("/offers/{id}/cancel", post(cancel_offer))
                .route("/requests/{id}/cancel", post(cancel_request))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::delivery::{DeliveryIntent, PriorityClass};
use crate::error::{AppError, Result};
use crate::matching::Ride;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct EnqueueDeliveryRequest {
    pub recipient_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: PriorityClass,
}

#[derive(Debug, Serialize)]
pub struct EnqueueDeliveryResponse {
    pub intent_id: Uuid,
}

/// Enqueue a delivery intent. Accepted means queued, not delivered; the
/// pipeline owns retries from here.
pub async fn enqueue_delivery(
    State(state): State<AppState>,
    Json(req): Json<EnqueueDeliveryRequest>,
) -> Result<(StatusCode, Json<EnqueueDeliveryResponse>)> {
    if req.recipient_id.is_empty() {
        return Err(AppError::Validation("recipient_id must not be empty".to_string()));
    }
    if req.event_type.is_empty() {
        return Err(AppError::Validation("event_type must not be empty".to_string()));
    }

    let intent = DeliveryIntent::new(req.recipient_id, req.event_type, req.payload);
    let intent_id = intent.id;

    state
        .broker
        .enqueue(intent, req.priority)
        .map_err(|e| AppError::Queue(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueDeliveryResponse { intent_id }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct AcceptRideRequest {
    pub offer_id: Uuid,
    pub request_id: Uuid,
    pub vehicle_id: Uuid,
}

/// Run the matching transaction for an offer/request pair.
pub async fn accept_ride(
    State(state): State<AppState>,
    Json(req): Json<AcceptRideRequest>,
) -> Result<(StatusCode, Json<Ride>)> {
    let ride = state
        .matching
        .accept_ride_request(req.offer_id, req.request_id, req.vehicle_id)
        .await?;

    Ok((StatusCode::CREATED, Json(ride)))
}

pub async fn cancel_offer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.matching.cancel_offer(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.matching.cancel_request(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Ride matching: offers, requests, and the exactly-once transaction that
//! converts an offer/request pair into a committed ride.

mod pg_store;
mod service;
mod store;

pub use pg_store::PgRideStore;
pub use service::MatchingService;
pub use store::{create_ride_store, MemoryRideStore, RideStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of a ride offer: created → active → matched | cancelled.
/// An offer is never both matched and cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Created,
    Active,
    Matched,
    Cancelled,
}

/// Lifecycle of a ride request; mirrors [`OfferStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Created,
    Active,
    Matched,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Captured,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Captured => "captured",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl OfferStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OfferStatus::Created => "created",
            OfferStatus::Active => "active",
            OfferStatus::Matched => "matched",
            OfferStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MatchError> {
        match s {
            "created" => Ok(OfferStatus::Created),
            "active" => Ok(OfferStatus::Active),
            "matched" => Ok(OfferStatus::Matched),
            "cancelled" => Ok(OfferStatus::Cancelled),
            other => Err(MatchError::Storage(format!(
                "unknown offer status: {other}"
            ))),
        }
    }
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Created => "created",
            RequestStatus::Active => "active",
            RequestStatus::Matched => "matched",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MatchError> {
        match s {
            "created" => Ok(RequestStatus::Created),
            "active" => Ok(RequestStatus::Active),
            "matched" => Ok(RequestStatus::Matched),
            "cancelled" => Ok(RequestStatus::Cancelled),
            other => Err(MatchError::Storage(format!(
                "unknown request status: {other}"
            ))),
        }
    }
}

impl RideStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RideStatus::Scheduled => "scheduled",
            RideStatus::Ongoing => "ongoing",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MatchError> {
        match s {
            "scheduled" => Ok(RideStatus::Scheduled),
            "ongoing" => Ok(RideStatus::Ongoing),
            "completed" => Ok(RideStatus::Completed),
            "cancelled" => Ok(RideStatus::Cancelled),
            other => Err(MatchError::Storage(format!("unknown ride status: {other}"))),
        }
    }
}

/// Driver-side intent to share a ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: Uuid,
    pub driver_id: String,
    pub status: OfferStatus,
    pub route_from: String,
    pub route_to: String,
    pub departure_at: DateTime<Utc>,
    pub seats: i32,
    pub fare_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Rider-side intent to join a ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub hitcher_id: String,
    pub status: RequestStatus,
    pub route_from: String,
    pub route_to: String,
    pub seats: i32,
    pub created_at: DateTime<Utc>,
}

/// A committed ride. Route/time/fare fields are a snapshot copied from the
/// offer at match time; later offer edits cannot change them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub offer_id: Uuid,
    pub request_id: Uuid,
    pub vehicle_id: Uuid,
    pub driver_id: String,
    pub hitcher_id: String,
    pub status: RideStatus,
    pub route_from: String,
    pub route_to: String,
    pub departure_at: DateTime<Utc>,
    pub fare_cents: i64,
    pub created_at: DateTime<Utc>,
}

impl Ride {
    /// Build the ride for a matched pair, snapshotting the offer's
    /// route/time/fare fields.
    pub fn from_match(offer: &Offer, request: &Request, vehicle_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            offer_id: offer.id,
            request_id: request.id,
            vehicle_id,
            driver_id: offer.driver_id.clone(),
            hitcher_id: request.hitcher_id.clone(),
            status: RideStatus::Scheduled,
            route_from: offer.route_from.clone(),
            route_to: offer.route_to.clone(),
            departure_at: offer.departure_at,
            fare_cents: offer.fare_cents,
            created_at: Utc::now(),
        }
    }
}

/// Financial record created alongside a ride; mutated later by the
/// payment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialTransaction {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub payer_id: String,
    pub receiver_id: String,
    pub amount_cents: i64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl FinancialTransaction {
    pub fn pending_for(ride: &Ride) -> Self {
        Self {
            id: Uuid::new_v4(),
            ride_id: ride.id,
            payer_id: ride.hitcher_id.clone(),
            receiver_id: ride.driver_id.clone(),
            amount_cents: ride.fare_cents,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Errors from the matching transaction.
///
/// "Already matched" distinguishes the offer and request sides so the
/// client knows which entity to refresh; it is terminal and never retried
/// automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("offer {0} not found")]
    OfferNotFound(Uuid),

    #[error("request {0} not found")]
    RequestNotFound(Uuid),

    #[error("offer {0} already matched")]
    OfferAlreadyMatched(Uuid),

    #[error("request {0} already matched")]
    RequestAlreadyMatched(Uuid),

    #[error("offer {id} is {status} and cannot be matched")]
    OfferUnavailable { id: Uuid, status: &'static str },

    #[error("request {id} is {status} and cannot be matched")]
    RequestUnavailable { id: Uuid, status: &'static str },

    #[error("matching transaction lost a commit-time conflict")]
    Conflict,

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for MatchError {
    fn from(e: sqlx::Error) -> Self {
        MatchError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> Offer {
        Offer {
            id: Uuid::new_v4(),
            driver_id: "driver-1".to_string(),
            status: OfferStatus::Active,
            route_from: "Kigali".to_string(),
            route_to: "Huye".to_string(),
            departure_at: Utc::now(),
            seats: 3,
            fare_cents: 4500,
            created_at: Utc::now(),
        }
    }

    fn request() -> Request {
        Request {
            id: Uuid::new_v4(),
            hitcher_id: "hitcher-1".to_string(),
            status: RequestStatus::Active,
            route_from: "Kigali".to_string(),
            route_to: "Huye".to_string(),
            seats: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ride_snapshots_offer_fields() {
        let offer = offer();
        let request = request();
        let ride = Ride::from_match(&offer, &request, Uuid::new_v4());

        assert_eq!(ride.status, RideStatus::Scheduled);
        assert_eq!(ride.route_from, offer.route_from);
        assert_eq!(ride.fare_cents, offer.fare_cents);
        assert_eq!(ride.driver_id, offer.driver_id);
        assert_eq!(ride.hitcher_id, request.hitcher_id);
    }

    #[test]
    fn test_transaction_links_payer_and_receiver() {
        let ride = Ride::from_match(&offer(), &request(), Uuid::new_v4());
        let tx = FinancialTransaction::pending_for(&ride);

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.payer_id, ride.hitcher_id);
        assert_eq!(tx.receiver_id, ride.driver_id);
        assert_eq!(tx.amount_cents, ride.fare_cents);
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            OfferStatus::Created,
            OfferStatus::Active,
            OfferStatus::Matched,
            OfferStatus::Cancelled,
        ] {
            assert_eq!(OfferStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OfferStatus::parse("bogus").is_err());
    }
}

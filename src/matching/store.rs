//! Persistence collaborator for the matching transaction.
//!
//! The trait's `accept_ride_request` is the atomic unit of work: load both
//! sides, check their statuses, create the ride snapshot, flip both sides
//! to matched, commit. Either every effect is visible or none is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use uuid::Uuid;

use crate::config::DatabaseConfig;

use super::{
    FinancialTransaction, MatchError, Offer, OfferStatus, PgRideStore, Request, RequestStatus,
    Ride,
};

#[async_trait]
pub trait RideStore: Send + Sync {
    /// The matching transaction (see module docs). Linearizable for any two
    /// conflicting calls on the same offer or request: one commits, the
    /// other observes "already matched".
    async fn accept_ride_request(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        vehicle_id: Uuid,
    ) -> Result<Ride, MatchError>;

    /// Cancel an offer that has not been matched. Guarded by the same
    /// atomicity as matching so a cancel cannot race a concurrent accept.
    async fn cancel_offer(&self, offer_id: Uuid) -> Result<(), MatchError>;

    /// Counterpart of [`cancel_offer`](Self::cancel_offer) for requests.
    async fn cancel_request(&self, request_id: Uuid) -> Result<(), MatchError>;

    /// Create the pending financial record for a committed ride. Runs after
    /// the match commits; its failure must not undo the match.
    async fn create_transaction(&self, ride: &Ride) -> Result<FinancialTransaction, MatchError>;

    async fn load_offer(&self, id: Uuid) -> Result<Offer, MatchError>;
    async fn load_request(&self, id: Uuid) -> Result<Request, MatchError>;
    async fn load_ride(&self, id: Uuid) -> Result<Ride, MatchError>;
}

/// Create a ride store based on configuration: PostgreSQL when a database
/// URL is configured, the in-memory store otherwise (single-node dev/test).
pub async fn create_ride_store(config: &DatabaseConfig) -> Result<Arc<dyn RideStore>, MatchError> {
    if config.url.is_empty() {
        tracing::info!(backend = "memory", "Creating in-memory ride store");
        return Ok(Arc::new(MemoryRideStore::new()));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds as u64))
        .connect(&config.url)
        .await?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| MatchError::Storage(e.to_string()))?;

    tracing::info!(
        backend = "postgres",
        pool_size = config.pool_size,
        "Creating PostgreSQL ride store"
    );
    Ok(Arc::new(PgRideStore::new(pool)))
}

#[derive(Default)]
struct MemoryInner {
    offers: HashMap<Uuid, Offer>,
    requests: HashMap<Uuid, Request>,
    rides: HashMap<Uuid, Ride>,
    transactions: HashMap<Uuid, FinancialTransaction>,
}

/// In-memory ride store.
///
/// A single mutex spans each unit of work, which makes every operation
/// serializable; the status guards below are the same ones the PostgreSQL
/// store expresses as conditional updates.
pub struct MemoryRideStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    pub fn insert_offer(&self, offer: Offer) {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .offers
            .insert(offer.id, offer);
    }

    pub fn insert_request(&self, request: Request) {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .requests
            .insert(request.id, request);
    }

    /// Edit an offer's route/fare fields in place. Used to exercise the
    /// snapshot guarantee: committed rides must not observe the edit.
    pub fn update_offer_route(
        &self,
        offer_id: Uuid,
        route_from: impl Into<String>,
        route_to: impl Into<String>,
        fare_cents: i64,
    ) -> Result<(), MatchError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let offer = inner
            .offers
            .get_mut(&offer_id)
            .ok_or(MatchError::OfferNotFound(offer_id))?;
        offer.route_from = route_from.into();
        offer.route_to = route_to.into();
        offer.fare_cents = fare_cents;
        Ok(())
    }

    pub fn transaction_for_ride(&self, ride_id: Uuid) -> Option<FinancialTransaction> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .transactions
            .values()
            .find(|tx| tx.ride_id == ride_id)
            .cloned()
    }
}

impl Default for MemoryRideStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RideStore for MemoryRideStore {
    async fn accept_ride_request(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        vehicle_id: Uuid,
    ) -> Result<Ride, MatchError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");

        let offer = inner
            .offers
            .get(&offer_id)
            .ok_or(MatchError::OfferNotFound(offer_id))?;
        match offer.status {
            OfferStatus::Active => {}
            OfferStatus::Matched => return Err(MatchError::OfferAlreadyMatched(offer_id)),
            status => {
                return Err(MatchError::OfferUnavailable {
                    id: offer_id,
                    status: status.as_str(),
                })
            }
        }

        let request = inner
            .requests
            .get(&request_id)
            .ok_or(MatchError::RequestNotFound(request_id))?;
        match request.status {
            RequestStatus::Active => {}
            RequestStatus::Matched => return Err(MatchError::RequestAlreadyMatched(request_id)),
            status => {
                return Err(MatchError::RequestUnavailable {
                    id: request_id,
                    status: status.as_str(),
                })
            }
        }

        let ride = Ride::from_match(offer, request, vehicle_id);

        // All guards passed: apply every effect before releasing the lock.
        inner.offers.get_mut(&offer_id).expect("checked above").status = OfferStatus::Matched;
        inner
            .requests
            .get_mut(&request_id)
            .expect("checked above")
            .status = RequestStatus::Matched;
        inner.rides.insert(ride.id, ride.clone());

        Ok(ride)
    }

    async fn cancel_offer(&self, offer_id: Uuid) -> Result<(), MatchError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let offer = inner
            .offers
            .get_mut(&offer_id)
            .ok_or(MatchError::OfferNotFound(offer_id))?;

        match offer.status {
            OfferStatus::Created | OfferStatus::Active => {
                offer.status = OfferStatus::Cancelled;
                Ok(())
            }
            OfferStatus::Matched => Err(MatchError::OfferAlreadyMatched(offer_id)),
            OfferStatus::Cancelled => Ok(()), // idempotent
        }
    }

    async fn cancel_request(&self, request_id: Uuid) -> Result<(), MatchError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let request = inner
            .requests
            .get_mut(&request_id)
            .ok_or(MatchError::RequestNotFound(request_id))?;

        match request.status {
            RequestStatus::Created | RequestStatus::Active => {
                request.status = RequestStatus::Cancelled;
                Ok(())
            }
            RequestStatus::Matched => Err(MatchError::RequestAlreadyMatched(request_id)),
            RequestStatus::Cancelled => Ok(()),
        }
    }

    async fn create_transaction(&self, ride: &Ride) -> Result<FinancialTransaction, MatchError> {
        let tx = FinancialTransaction::pending_for(ride);
        self.inner
            .lock()
            .expect("store lock poisoned")
            .transactions
            .insert(tx.id, tx.clone());
        Ok(tx)
    }

    async fn load_offer(&self, id: Uuid) -> Result<Offer, MatchError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .offers
            .get(&id)
            .cloned()
            .ok_or(MatchError::OfferNotFound(id))
    }

    async fn load_request(&self, id: Uuid) -> Result<Request, MatchError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .requests
            .get(&id)
            .cloned()
            .ok_or(MatchError::RequestNotFound(id))
    }

    async fn load_ride(&self, id: Uuid) -> Result<Ride, MatchError> {
        self.inner
            .lock()
            .expect("store lock poisoned")
            .rides
            .get(&id)
            .cloned()
            .ok_or(MatchError::Storage(format!("ride {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn seed(store: &MemoryRideStore) -> (Uuid, Uuid) {
        let offer = Offer {
            id: Uuid::new_v4(),
            driver_id: "driver-1".to_string(),
            status: OfferStatus::Active,
            route_from: "A".to_string(),
            route_to: "B".to_string(),
            departure_at: Utc::now(),
            seats: 2,
            fare_cents: 1000,
            created_at: Utc::now(),
        };
        let request = Request {
            id: Uuid::new_v4(),
            hitcher_id: "hitcher-1".to_string(),
            status: RequestStatus::Active,
            route_from: "A".to_string(),
            route_to: "B".to_string(),
            seats: 1,
            created_at: Utc::now(),
        };
        let ids = (offer.id, request.id);
        store.insert_offer(offer);
        store.insert_request(request);
        ids
    }

    #[tokio::test]
    async fn test_accept_flips_both_sides_to_matched() {
        let store = MemoryRideStore::new();
        let (offer_id, request_id) = seed(&store);

        let ride = store
            .accept_ride_request(offer_id, request_id, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(ride.offer_id, offer_id);
        assert_eq!(
            store.load_offer(offer_id).await.unwrap().status,
            OfferStatus::Matched
        );
        assert_eq!(
            store.load_request(request_id).await.unwrap().status,
            RequestStatus::Matched
        );
    }

    #[tokio::test]
    async fn test_second_accept_aborts_with_already_matched() {
        let store = MemoryRideStore::new();
        let (offer_id, request_id) = seed(&store);

        store
            .accept_ride_request(offer_id, request_id, Uuid::new_v4())
            .await
            .unwrap();

        let err = store
            .accept_ride_request(offer_id, request_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, MatchError::OfferAlreadyMatched(offer_id));
    }

    #[tokio::test]
    async fn test_failed_accept_leaves_no_partial_state() {
        let store = MemoryRideStore::new();
        let (offer_id, _) = seed(&store);
        let missing_request = Uuid::new_v4();

        let err = store
            .accept_ride_request(offer_id, missing_request, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err, MatchError::RequestNotFound(missing_request));

        // The offer must not have been touched
        assert_eq!(
            store.load_offer(offer_id).await.unwrap().status,
            OfferStatus::Active
        );
    }

    #[tokio::test]
    async fn test_cancel_guards_against_matched() {
        let store = MemoryRideStore::new();
        let (offer_id, request_id) = seed(&store);

        store
            .accept_ride_request(offer_id, request_id, Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(
            store.cancel_offer(offer_id).await.unwrap_err(),
            MatchError::OfferAlreadyMatched(offer_id)
        );
        assert_eq!(
            store.cancel_request(request_id).await.unwrap_err(),
            MatchError::RequestAlreadyMatched(request_id)
        );
    }

    #[tokio::test]
    async fn test_cancelled_offer_cannot_be_matched() {
        let store = MemoryRideStore::new();
        let (offer_id, request_id) = seed(&store);

        store.cancel_offer(offer_id).await.unwrap();

        let err = store
            .accept_ride_request(offer_id, request_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::OfferUnavailable {
                id: offer_id,
                status: "cancelled"
            }
        );
    }
}

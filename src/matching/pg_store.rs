//! PostgreSQL ride store.
//!
//! The matching transaction takes row locks on both sides with
//! `SELECT ... FOR UPDATE`, so two concurrent accepts touching the same
//! offer or request serialize at the database. The subsequent status flips
//! are still written as conditional updates (`WHERE status = 'active'`);
//! a zero row count there means another writer slipped in and the whole
//! transaction rolls back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::{FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::store::RideStore;
use super::{
    FinancialTransaction, MatchError, Offer, OfferStatus, Request, RequestStatus, Ride,
    RideStatus,
};

pub struct PgRideStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct OfferRow {
    id: Uuid,
    driver_id: String,
    status: String,
    route_from: String,
    route_to: String,
    departure_at: DateTime<Utc>,
    seats: i32,
    fare_cents: i64,
    created_at: DateTime<Utc>,
}

impl OfferRow {
    fn into_offer(self) -> Result<Offer, MatchError> {
        Ok(Offer {
            id: self.id,
            driver_id: self.driver_id,
            status: OfferStatus::parse(&self.status)?,
            route_from: self.route_from,
            route_to: self.route_to,
            departure_at: self.departure_at,
            seats: self.seats,
            fare_cents: self.fare_cents,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct RequestRow {
    id: Uuid,
    hitcher_id: String,
    status: String,
    route_from: String,
    route_to: String,
    seats: i32,
    created_at: DateTime<Utc>,
}

impl RequestRow {
    fn into_request(self) -> Result<Request, MatchError> {
        Ok(Request {
            id: self.id,
            hitcher_id: self.hitcher_id,
            status: RequestStatus::parse(&self.status)?,
            route_from: self.route_from,
            route_to: self.route_to,
            seats: self.seats,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct RideRow {
    id: Uuid,
    offer_id: Uuid,
    request_id: Uuid,
    vehicle_id: Uuid,
    driver_id: String,
    hitcher_id: String,
    status: String,
    route_from: String,
    route_to: String,
    departure_at: DateTime<Utc>,
    fare_cents: i64,
    created_at: DateTime<Utc>,
}

impl RideRow {
    fn into_ride(self) -> Result<Ride, MatchError> {
        Ok(Ride {
            id: self.id,
            offer_id: self.offer_id,
            request_id: self.request_id,
            vehicle_id: self.vehicle_id,
            driver_id: self.driver_id,
            hitcher_id: self.hitcher_id,
            status: RideStatus::parse(&self.status)?,
            route_from: self.route_from,
            route_to: self.route_to,
            departure_at: self.departure_at,
            fare_cents: self.fare_cents,
            created_at: self.created_at,
        })
    }
}

impl PgRideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_offer(
        tx: &mut Transaction<'_, Postgres>,
        offer_id: Uuid,
    ) -> Result<Offer, MatchError> {
        let row = sqlx::query_as::<_, OfferRow>(
            r#"
            SELECT id, driver_id, status, route_from, route_to,
                   departure_at, seats, fare_cents, created_at
            FROM ride_offers
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(offer_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(MatchError::OfferNotFound(offer_id))?;

        row.into_offer()
    }

    async fn lock_request(
        tx: &mut Transaction<'_, Postgres>,
        request_id: Uuid,
    ) -> Result<Request, MatchError> {
        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, hitcher_id, status, route_from, route_to,
                   seats, created_at
            FROM ride_requests
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(MatchError::RequestNotFound(request_id))?;

        row.into_request()
    }

    fn check_offer_matchable(offer: &Offer) -> Result<(), MatchError> {
        match offer.status {
            OfferStatus::Active => Ok(()),
            OfferStatus::Matched => Err(MatchError::OfferAlreadyMatched(offer.id)),
            status => Err(MatchError::OfferUnavailable {
                id: offer.id,
                status: status.as_str(),
            }),
        }
    }

    fn check_request_matchable(request: &Request) -> Result<(), MatchError> {
        match request.status {
            RequestStatus::Active => Ok(()),
            RequestStatus::Matched => Err(MatchError::RequestAlreadyMatched(request.id)),
            status => Err(MatchError::RequestUnavailable {
                id: request.id,
                status: status.as_str(),
            }),
        }
    }
}

#[async_trait]
impl RideStore for PgRideStore {
    async fn accept_ride_request(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        vehicle_id: Uuid,
    ) -> Result<Ride, MatchError> {
        let mut tx = self.pool.begin().await?;

        let offer = Self::lock_offer(&mut tx, offer_id).await?;
        Self::check_offer_matchable(&offer)?;

        let request = Self::lock_request(&mut tx, request_id).await?;
        Self::check_request_matchable(&request)?;

        let ride = Ride::from_match(&offer, &request, vehicle_id);

        sqlx::query(
            r#"
            INSERT INTO rides (id, offer_id, request_id, vehicle_id,
                               driver_id, hitcher_id, status, route_from,
                               route_to, departure_at, fare_cents, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(ride.id)
        .bind(ride.offer_id)
        .bind(ride.request_id)
        .bind(ride.vehicle_id)
        .bind(&ride.driver_id)
        .bind(&ride.hitcher_id)
        .bind(ride.status.as_str())
        .bind(&ride.route_from)
        .bind(&ride.route_to)
        .bind(ride.departure_at)
        .bind(ride.fare_cents)
        .bind(ride.created_at)
        .execute(&mut *tx)
        .await?;

        // Conditional flips; a zero row count means the row changed under
        // the lock, which only happens on storage misbehavior. Abort.
        let flipped = sqlx::query(
            "UPDATE ride_offers SET status = 'matched' WHERE id = $1 AND status = 'active'",
        )
        .bind(offer_id)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() != 1 {
            return Err(MatchError::Conflict);
        }

        let flipped = sqlx::query(
            "UPDATE ride_requests SET status = 'matched' WHERE id = $1 AND status = 'active'",
        )
        .bind(request_id)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() != 1 {
            return Err(MatchError::Conflict);
        }

        tx.commit().await?;
        Ok(ride)
    }

    async fn cancel_offer(&self, offer_id: Uuid) -> Result<(), MatchError> {
        let mut tx = self.pool.begin().await?;

        let offer = Self::lock_offer(&mut tx, offer_id).await?;
        match offer.status {
            OfferStatus::Created | OfferStatus::Active => {}
            OfferStatus::Matched => return Err(MatchError::OfferAlreadyMatched(offer_id)),
            OfferStatus::Cancelled => return Ok(()),
        }

        sqlx::query("UPDATE ride_offers SET status = 'cancelled' WHERE id = $1")
            .bind(offer_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn cancel_request(&self, request_id: Uuid) -> Result<(), MatchError> {
        let mut tx = self.pool.begin().await?;

        let request = Self::lock_request(&mut tx, request_id).await?;
        match request.status {
            RequestStatus::Created | RequestStatus::Active => {}
            RequestStatus::Matched => return Err(MatchError::RequestAlreadyMatched(request_id)),
            RequestStatus::Cancelled => return Ok(()),
        }

        sqlx::query("UPDATE ride_requests SET status = 'cancelled' WHERE id = $1")
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_transaction(&self, ride: &Ride) -> Result<FinancialTransaction, MatchError> {
        let record = FinancialTransaction::pending_for(ride);

        sqlx::query(
            r#"
            INSERT INTO transactions (id, ride_id, payer_id, receiver_id,
                                      amount_cents, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(record.ride_id)
        .bind(&record.payer_id)
        .bind(&record.receiver_id)
        .bind(record.amount_cents)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    async fn load_offer(&self, id: Uuid) -> Result<Offer, MatchError> {
        let row = sqlx::query_as::<_, OfferRow>(
            r#"
            SELECT id, driver_id, status, route_from, route_to,
                   departure_at, seats, fare_cents, created_at
            FROM ride_offers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MatchError::OfferNotFound(id))?;

        row.into_offer()
    }

    async fn load_request(&self, id: Uuid) -> Result<Request, MatchError> {
        let row = sqlx::query_as::<_, RequestRow>(
            r#"
            SELECT id, hitcher_id, status, route_from, route_to,
                   seats, created_at
            FROM ride_requests
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(MatchError::RequestNotFound(id))?;

        row.into_request()
    }

    async fn load_ride(&self, id: Uuid) -> Result<Ride, MatchError> {
        let row = sqlx::query_as::<_, RideRow>(
            r#"
            SELECT id, offer_id, request_id, vehicle_id, driver_id,
                   hitcher_id, status, route_from, route_to, departure_at,
                   fare_cents, created_at
            FROM rides
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| MatchError::Storage(format!("ride {id} not found")))?;

        row.into_ride()
    }
}

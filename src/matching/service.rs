use std::sync::Arc;

use uuid::Uuid;

use crate::delivery::{DeliveryBroker, PriorityClass};
use crate::events::RideEvent;
use crate::metrics::{MATCH_COMMITS_TOTAL, MATCH_CONFLICTS_TOTAL};

use super::{MatchError, Ride, RideStore};

/// Orchestrates the matching transaction and the notifications that follow.
///
/// Only the store call is load-bearing: once it commits, the match exists.
/// Transaction-record and notification failures are reported but never undo
/// a committed match; the delivery pipeline owns redelivery from there.
pub struct MatchingService {
    store: Arc<dyn RideStore>,
    broker: Arc<DeliveryBroker>,
}

impl MatchingService {
    pub fn new(store: Arc<dyn RideStore>, broker: Arc<DeliveryBroker>) -> Self {
        Self { store, broker }
    }

    pub async fn accept_ride_request(
        &self,
        offer_id: Uuid,
        request_id: Uuid,
        vehicle_id: Uuid,
    ) -> Result<Ride, MatchError> {
        let ride = match self
            .store
            .accept_ride_request(offer_id, request_id, vehicle_id)
            .await
        {
            Ok(ride) => ride,
            Err(e) => {
                if matches!(
                    e,
                    MatchError::OfferAlreadyMatched(_)
                        | MatchError::RequestAlreadyMatched(_)
                        | MatchError::Conflict
                ) {
                    MATCH_CONFLICTS_TOTAL.inc();
                }
                return Err(e);
            }
        };

        MATCH_COMMITS_TOTAL.inc();
        tracing::info!(
            ride_id = %ride.id,
            offer_id = %offer_id,
            request_id = %request_id,
            driver_id = %ride.driver_id,
            hitcher_id = %ride.hitcher_id,
            "Ride matched"
        );

        if let Err(e) = self.store.create_transaction(&ride).await {
            tracing::error!(
                ride_id = %ride.id,
                error = %e,
                "Failed to create financial transaction for matched ride"
            );
        }

        self.notify_matched(&ride);
        Ok(ride)
    }

    pub async fn cancel_offer(&self, offer_id: Uuid) -> Result<(), MatchError> {
        self.store.cancel_offer(offer_id).await
    }

    pub async fn cancel_request(&self, request_id: Uuid) -> Result<(), MatchError> {
        self.store.cancel_request(request_id).await
    }

    /// Enqueue `ride.matched` for both parties. Detached from the caller so
    /// the match response does not wait on queue contention.
    fn notify_matched(&self, ride: &Ride) {
        let broker = self.broker.clone();
        let ride = ride.clone();

        tokio::spawn(async move {
            for recipient in [ride.driver_id.clone(), ride.hitcher_id.clone()] {
                let event = RideEvent::RideMatched {
                    ride_id: ride.id,
                    offer_id: ride.offer_id,
                    request_id: ride.request_id,
                    driver_id: ride.driver_id.clone(),
                    hitcher_id: ride.hitcher_id.clone(),
                };
                let intent = event.into_intent(&recipient);

                if let Err(e) = broker.enqueue(intent, PriorityClass::Critical) {
                    tracing::warn!(
                        ride_id = %ride.id,
                        recipient_id = %recipient,
                        error = %e,
                        "Failed to enqueue match notification"
                    );
                }
            }
        });
    }
}

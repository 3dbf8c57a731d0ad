//! Integration tests for the matching transaction and the notification
//! pipeline that follows a committed match.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use ridehub_realtime_service::config::DeliveryConfig;
use ridehub_realtime_service::delivery::{
    DeliveryBroker, HandlerRegistry, SocketDeliveryHandler, WorkerPool,
};
use ridehub_realtime_service::matching::{
    MatchError, MatchingService, MemoryRideStore, Offer, OfferStatus, Request, RequestStatus,
    RideStore,
};
use ridehub_realtime_service::registry::{ConnectionHandle, ConnectionRegistry};

fn seeded_store() -> (Arc<MemoryRideStore>, Uuid, Uuid) {
    let store = Arc::new(MemoryRideStore::new());
    let offer_id = Uuid::new_v4();
    let request_id = Uuid::new_v4();

    store.insert_offer(Offer {
        id: offer_id,
        driver_id: "driver-1".to_string(),
        status: OfferStatus::Active,
        route_from: "Kigali".to_string(),
        route_to: "Huye".to_string(),
        departure_at: Utc::now(),
        seats: 3,
        fare_cents: 4500,
        created_at: Utc::now(),
    });
    store.insert_request(Request {
        id: request_id,
        hitcher_id: "hitcher-1".to_string(),
        status: RequestStatus::Active,
        route_from: "Kigali".to_string(),
        route_to: "Huye".to_string(),
        seats: 1,
        created_at: Utc::now(),
    });

    (store, offer_id, request_id)
}

#[tokio::test]
async fn test_concurrent_accepts_commit_exactly_once() {
    let (store, offer_id, request_id) = seeded_store();
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = Arc::new(MatchingService::new(store.clone(), broker));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .accept_ride_request(offer_id, request_id, Uuid::new_v4())
                .await
        }));
    }

    let mut commits = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => commits += 1,
            Err(
                MatchError::OfferAlreadyMatched(_) | MatchError::RequestAlreadyMatched(_),
            ) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(commits, 1);
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
async fn test_accept_races_with_requests_for_separate_offers() {
    // Two requests racing for two different offers both succeed; only
    // collisions on the same side conflict.
    let store = Arc::new(MemoryRideStore::new());
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = Arc::new(MatchingService::new(store.clone(), broker));

    let mut pairs = Vec::new();
    for i in 0..4 {
        let offer_id = Uuid::new_v4();
        let request_id = Uuid::new_v4();
        store.insert_offer(Offer {
            id: offer_id,
            driver_id: format!("driver-{i}"),
            status: OfferStatus::Active,
            route_from: "A".to_string(),
            route_to: "B".to_string(),
            departure_at: Utc::now(),
            seats: 2,
            fare_cents: 1000,
            created_at: Utc::now(),
        });
        store.insert_request(Request {
            id: request_id,
            hitcher_id: format!("hitcher-{i}"),
            status: RequestStatus::Active,
            route_from: "A".to_string(),
            route_to: "B".to_string(),
            seats: 1,
            created_at: Utc::now(),
        });
        pairs.push((offer_id, request_id));
    }

    let mut tasks = Vec::new();
    for (offer_id, request_id) in pairs {
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            service
                .accept_ride_request(offer_id, request_id, Uuid::new_v4())
                .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
}

#[tokio::test]
async fn test_cancelled_offer_cannot_be_accepted() {
    let (store, offer_id, request_id) = seeded_store();
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = MatchingService::new(store.clone(), broker);

    service.cancel_offer(offer_id).await.unwrap();

    let err = service
        .accept_ride_request(offer_id, request_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchError::OfferUnavailable { .. }));

    // The request side was not consumed by the failed attempt
    assert_eq!(
        store.load_request(request_id).await.unwrap().status,
        RequestStatus::Active
    );
}

#[tokio::test]
async fn test_matched_sides_cannot_be_cancelled() {
    let (store, offer_id, request_id) = seeded_store();
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = MatchingService::new(store, broker);

    service
        .accept_ride_request(offer_id, request_id, Uuid::new_v4())
        .await
        .unwrap();

    assert!(matches!(
        service.cancel_offer(offer_id).await.unwrap_err(),
        MatchError::OfferAlreadyMatched(_)
    ));
    assert!(matches!(
        service.cancel_request(request_id).await.unwrap_err(),
        MatchError::RequestAlreadyMatched(_)
    ));
}

#[tokio::test]
async fn test_ride_snapshot_survives_later_offer_edits() {
    let (store, offer_id, request_id) = seeded_store();
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = MatchingService::new(store.clone(), broker);

    let ride = service
        .accept_ride_request(offer_id, request_id, Uuid::new_v4())
        .await
        .unwrap();

    store
        .update_offer_route(offer_id, "Musanze", "Rubavu", 9999)
        .unwrap();

    let reloaded = store.load_ride(ride.id).await.unwrap();
    assert_eq!(reloaded.route_from, "Kigali");
    assert_eq!(reloaded.route_to, "Huye");
    assert_eq!(reloaded.fare_cents, 4500);
}

#[tokio::test]
async fn test_match_creates_pending_transaction() {
    let (store, offer_id, request_id) = seeded_store();
    let broker = Arc::new(DeliveryBroker::new(&DeliveryConfig::default()));
    let service = MatchingService::new(store.clone(), broker);

    let ride = service
        .accept_ride_request(offer_id, request_id, Uuid::new_v4())
        .await
        .unwrap();

    let tx = store.transaction_for_ride(ride.id).unwrap();
    assert_eq!(tx.payer_id, "hitcher-1");
    assert_eq!(tx.receiver_id, "driver-1");
    assert_eq!(tx.amount_cents, 4500);
}

#[tokio::test]
async fn test_match_notifies_both_parties_over_live_sockets() {
    let (store, offer_id, request_id) = seeded_store();
    let config = DeliveryConfig {
        base_delay_ms: 5,
        max_delay_ms: 50,
        ..Default::default()
    };
    let broker = Arc::new(DeliveryBroker::new(&config));
    let registry = Arc::new(ConnectionRegistry::new());

    let (driver_conn, mut driver_rx, _c1) = ConnectionHandle::new("driver-1", 16);
    let (hitcher_conn, mut hitcher_rx, _c2) = ConnectionHandle::new("hitcher-1", 16);
    registry.register(driver_conn);
    registry.register(hitcher_conn);

    let handlers = HandlerRegistry::new(Arc::new(SocketDeliveryHandler::new(registry.clone())));
    let pool = WorkerPool::new(broker.clone(), Arc::new(handlers));
    pool.spawn(2);

    let service = MatchingService::new(store, broker.clone());
    let ride = service
        .accept_ride_request(offer_id, request_id, Uuid::new_v4())
        .await
        .unwrap();

    for rx in [&mut driver_rx, &mut hitcher_rx] {
        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification should arrive")
            .expect("connection should stay open");

        assert_eq!(frame.frame_type, "ride.matched");
        let data = frame.data.unwrap();
        assert_eq!(data["ride_id"], json!(ride.id.to_string()));
        assert_eq!(data["driver_id"], "driver-1");
        assert_eq!(data["hitcher_id"], "hitcher-1");
    }

    broker.close();
}

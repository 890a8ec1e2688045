//! Integration tests for cross-instance cache invalidation.
//!
//! A committed purchase evicts the distributed entry, then fans an event out
//! to every instance - including the publisher - which evicts its local entry.

mod common;

use common::*;
use std::time::Duration;
use stockroom::InventoryConfig;
use tokio::time::timeout;

/// The publisher receives its own event and evicts its local entry.
#[tokio::test]
async fn test_publisher_self_delivery_evicts_local_entry() {
    let (_fixture, system) = setup_system().await;
    let service = system.service();

    let id = service.create_product(sample_product(5)).await.unwrap();
    service.get_product(id).await.unwrap(); // local + distributed populated

    service.buy_product(id, 2).await.unwrap();
    propagation_delay().await;

    let stats = service.stats();
    assert_eq!(stats.invalidations_published, 1);
    assert!(stats.invalidations_received >= 1, "fanout includes the publisher");

    // Stale copies are gone everywhere, so the read reaches the store.
    let product = service.get_product(id).await.unwrap().unwrap();
    assert_eq!(product.stock, 3);
    assert_eq!(service.stats().store_loads, 2);
}

/// Coherence bound: a remote instance reflects the new stock once the event
/// is delivered, well within one local TTL.
#[tokio::test]
async fn test_remote_instance_sees_updated_stock() {
    let fixture = MemoryFixture::new();
    let instance_a = fixture.system(InventoryConfig::default()).await;
    let instance_b = fixture.system(InventoryConfig::default()).await;

    let id = instance_a
        .service()
        .create_product(sample_product(10))
        .await
        .unwrap();

    // Both instances cache the record locally.
    instance_a.service().get_product(id).await.unwrap();
    instance_b.service().get_product(id).await.unwrap();

    instance_a.service().buy_product(id, 4).await.unwrap();
    propagation_delay().await;

    assert!(instance_b.service().stats().invalidations_received >= 1);
    let seen_by_b = instance_b.service().get_product(id).await.unwrap().unwrap();
    assert_eq!(seen_by_b.stock, 6, "remote local tier must have been evicted");
}

/// An aborted purchase leaves every instance's caches untouched.
#[tokio::test]
async fn test_aborted_purchase_emits_no_event() {
    let fixture = MemoryFixture::new();
    let instance_a = fixture.system(InventoryConfig::default()).await;
    let instance_b = fixture.system(InventoryConfig::default()).await;

    let id = instance_a
        .service()
        .create_product(sample_product(1))
        .await
        .unwrap();
    instance_b.service().get_product(id).await.unwrap();

    assert!(instance_a.service().buy_product(id, 2).await.is_err());
    propagation_delay().await;

    assert_eq!(instance_b.service().stats().invalidations_received, 0);
    // B's local copy is still live.
    instance_b.service().get_product(id).await.unwrap();
    assert_eq!(instance_b.service().stats().local_hits, 1);
}

/// Every instance holds its own subscription: three instances, one publish,
/// three deliveries.
#[tokio::test]
async fn test_fanout_reaches_every_instance() {
    let fixture = MemoryFixture::new();
    let instances = [
        fixture.system(InventoryConfig::default()).await,
        fixture.system(InventoryConfig::default()).await,
        fixture.system(InventoryConfig::default()).await,
    ];

    let id = instances[0]
        .service()
        .create_product(sample_product(5))
        .await
        .unwrap();

    instances[0].service().buy_product(id, 1).await.unwrap();
    propagation_delay().await;

    for instance in &instances {
        assert!(
            instance.service().stats().invalidations_received >= 1,
            "one publish must reach every live instance"
        );
    }
}

/// Shutdown stops the subscription task promptly.
#[tokio::test]
async fn test_shutdown_stops_subscriber() {
    let (_fixture, system) = setup_system().await;

    timeout(Duration::from_secs(1), system.shutdown())
        .await
        .expect("shutdown must complete promptly");
}

/// Shutting one instance down leaves sibling subscriptions on the shared bus
/// live.
#[tokio::test]
async fn test_shutdown_is_scoped_to_one_instance() {
    let fixture = MemoryFixture::new();
    let instance_a = fixture.system(InventoryConfig::default()).await;
    let instance_b = fixture.system(InventoryConfig::default()).await;

    let id = instance_b
        .service()
        .create_product(sample_product(5))
        .await
        .unwrap();

    instance_a.shutdown().await;

    instance_b.service().buy_product(id, 1).await.unwrap();
    propagation_delay().await;
    assert!(
        instance_b.service().stats().invalidations_received >= 1,
        "sibling subscription must keep receiving events"
    );
}

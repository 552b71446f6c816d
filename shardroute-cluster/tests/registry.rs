mod common;

use std::time::Duration;

use common::FakeNetwork;
use futures::future::join_all;
use shardroute_cluster::ErrorClass;

#[tokio::test(start_paused = true)]
async fn test_concurrent_first_use_connects_once() {
    let network = FakeNetwork::new().with_connect_delay(Duration::from_millis(100));
    network.add_master("10.0.0.1:6379");
    let registry = network.registry();

    let results = join_all((0..8).map(|_| registry.get("10.0.0.1:6379"))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(network.connects("10.0.0.1:6379"), 1);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_connection_is_reused() {
    let network = FakeNetwork::new();
    network.add_master("10.0.0.1:6379");
    let registry = network.registry();

    registry.get("10.0.0.1:6379").await.unwrap();
    registry.get("10.0.0.1:6379").await.unwrap();

    assert_eq!(network.connects("10.0.0.1:6379"), 1);
    assert!(registry.contains("10.0.0.1:6379"));
}

#[tokio::test]
async fn test_failed_connect_is_not_cached() {
    let network = FakeNetwork::new();
    network.add_master("10.0.0.1:6379");
    network.set_reachable("10.0.0.1:6379", false);
    let registry = network.registry();

    let Err(err) = registry.get("10.0.0.1:6379").await else {
        panic!("connect to an unreachable node succeeded");
    };
    assert_eq!(err.class(), ErrorClass::Unreachable);
    assert!(!registry.contains("10.0.0.1:6379"));
    assert!(registry.is_empty());

    network.set_reachable("10.0.0.1:6379", true);
    registry.get("10.0.0.1:6379").await.unwrap();

    assert_eq!(network.connects("10.0.0.1:6379"), 2);
    assert!(registry.contains("10.0.0.1:6379"));
}

#[tokio::test]
async fn test_distinct_addresses_get_distinct_connections() {
    let network = FakeNetwork::new();
    network.add_master("10.0.0.1:6379");
    network.add_replica("10.0.0.2:6379", "10.0.0.1:6379");
    let registry = network.registry();

    registry.get("10.0.0.1:6379").await.unwrap();
    registry.get("10.0.0.2:6379").await.unwrap();

    assert_eq!(registry.len(), 2);
    assert_eq!(network.connects("10.0.0.1:6379"), 1);
    assert_eq!(network.connects("10.0.0.2:6379"), 1);
}

//! Subscription queue tests: pushed events, duplicates and queue failover.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{entry_event, key_event, MockServer, ServerState};
use geode_client::{
    CacheConfig, ClientCache, EntryEvent, FnCacheListener, Operation, PoolConfig, Region,
    RegionConfig, ServerLocation,
};
use geode_core::protocol::constants::{
    CLEAR_REGION, CLIENT_MARKER, CLIENT_READY, LOCAL_CREATE, LOCAL_DESTROY, LOCAL_UPDATE,
    MAKE_PRIMARY, REGISTER_INTEREST,
};
use geode_core::protocol::{EventId, Message, Part};

type Seen = Arc<Mutex<Vec<(Operation, bool)>>>;

fn subscribed_pool(servers: &[ServerLocation], redundancy: i32) -> PoolConfig {
    let mut builder = PoolConfig::builder("default")
        .min_connections(0)
        .pr_single_hop_enabled(false)
        .subscription_enabled(true)
        .subscription_redundancy(redundancy)
        .subscription_ack_interval(Duration::from_millis(50))
        .read_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(1));
    for server in servers {
        builder = builder.add_server(server.clone());
    }
    builder.build().unwrap()
}

async fn subscribed_region(
    cache: &ClientCache,
    servers: &[ServerLocation],
    redundancy: i32,
) -> (Region<String, String>, Seen) {
    cache
        .create_pool(subscribed_pool(servers, redundancy))
        .await
        .unwrap();
    let region = cache
        .create_region::<String, String>(
            RegionConfig::builder("orders")
                .caching_enabled(true)
                .build()
                .unwrap(),
        )
        .unwrap();

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let entry = |seen: &Seen| {
        let seen = seen.clone();
        move |event: EntryEvent<String, String>| {
            seen.lock()
                .unwrap()
                .push((event.operation, event.origin_remote));
        }
    };
    let regions = seen.clone();
    region.add_listener(Arc::new(
        FnCacheListener::builder()
            .on_create(entry(&seen))
            .on_update(entry(&seen))
            .on_destroy(entry(&seen))
            .on_region_event(move |event| {
                regions
                    .lock()
                    .unwrap()
                    .push((event.operation, event.origin_remote));
            })
            .build(),
    ));
    region.register_interest_all().await.unwrap();
    (region, seen)
}

fn count(seen: &Seen, operation: Operation) -> usize {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|(op, _)| *op == operation)
        .count()
}

#[tokio::test]
async fn test_pushed_events_update_local_cache() {
    common::init_tracing();
    let server = MockServer::start().await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let (region, seen) = subscribed_region(&cache, &[server.location()], 0).await;
    assert_eq!(server.state().subscription_channels(), 1);
    assert_eq!(server.state().count(REGISTER_INTEREST), 1);

    assert_eq!(
        server
            .state()
            .push(entry_event(LOCAL_CREATE, "orders", "a", "1", 1)),
        1
    );
    assert!(common::eventually(|| region.get_local(&"a".to_string()).is_some()).await);
    assert!(common::eventually(|| count(&seen, Operation::Create) == 1).await);
    assert_eq!(*seen.lock().unwrap(), vec![(Operation::Create, true)]);

    server
        .state()
        .push(entry_event(LOCAL_UPDATE, "orders", "a", "2", 2));
    assert!(common::eventually(|| region.get_local(&"a".to_string()).as_deref() == Some("2")).await);

    server
        .state()
        .push(key_event(LOCAL_DESTROY, "orders", "a", 3));
    assert!(common::eventually(|| !region.contains_key_local(&"a".to_string())).await);
    assert_eq!(count(&seen, Operation::Update), 1);
    assert_eq!(count(&seen, Operation::Destroy), 1);

    server
        .state()
        .push(entry_event(LOCAL_CREATE, "orders", "b", "1", 4));
    assert!(common::eventually(|| region.local_size() == 1).await);
    server.state().push(
        Message::new(CLEAR_REGION)
            .with_part(Part::string("orders"))
            .with_part(EventId::new(vec![42], 1, 5).to_part().unwrap()),
    );
    assert!(common::eventually(|| count(&seen, Operation::RegionClear) == 1).await);
    assert_eq!(region.local_size(), 0);
    cache.close(false).await;
}

#[tokio::test]
async fn test_duplicate_events_are_delivered_once() {
    let state = Arc::new(ServerState::default());
    let a = MockServer::with_state(state.clone()).await;
    let b = MockServer::with_state(state.clone()).await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let (region, seen) = subscribed_region(&cache, &[a.location(), b.location()], 1).await;
    assert_eq!(state.subscription_channels(), 2);

    assert_eq!(state.push(entry_event(LOCAL_CREATE, "orders", "a", "1", 7)), 2);
    assert!(common::eventually(|| region.get_local(&"a".to_string()).is_some()).await);
    state.push(entry_event(LOCAL_CREATE, "orders", "a", "1", 7));
    state.push(entry_event(LOCAL_CREATE, "orders", "b", "1", 8));
    assert!(common::eventually(|| region.contains_key_local(&"b".to_string())).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count(&seen, Operation::Create), 2);

    // An older sequence from the same thread is stale.
    state.push(entry_event(LOCAL_UPDATE, "orders", "a", "old", 3));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(region.get_local(&"a".to_string()).as_deref(), Some("1"));
    cache.close(false).await;
}

#[tokio::test]
async fn test_marker_makes_region_live() {
    let server = MockServer::start().await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let (_region, seen) = subscribed_region(&cache, &[server.location()], 0).await;

    server.state().push(Message::new(CLIENT_MARKER));
    assert!(common::eventually(|| count(&seen, Operation::RegionLive) == 1).await);
    assert_eq!(*seen.lock().unwrap(), vec![(Operation::RegionLive, true)]);
    cache.close(false).await;
}

#[tokio::test]
async fn test_secondary_promoted_when_primary_lost() {
    common::init_tracing();
    let state = Arc::new(ServerState::default());
    let a = MockServer::with_state(state.clone()).await;
    let b = MockServer::with_state(state.clone()).await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let (region, _seen) = subscribed_region(&cache, &[a.location(), b.location()], 1).await;
    let pool = cache.pool("default").unwrap();
    let subscription = pool.subscription().unwrap().clone();
    assert_eq!(subscription.primary(), Some(a.location()));
    assert_eq!(subscription.queue_servers().len(), 2);

    a.stop();
    assert!(common::eventually(|| subscription.primary() == Some(b.location())).await);
    assert_eq!(state.count(MAKE_PRIMARY), 1);
    assert!(common::eventually(|| state.count(REGISTER_INTEREST) == 2).await);

    assert_eq!(state.push(entry_event(LOCAL_CREATE, "orders", "z", "9", 1)), 1);
    assert!(common::eventually(|| region.get_local(&"z".to_string()).is_some()).await);
    cache.close(false).await;
}

#[tokio::test]
async fn test_durable_client_announces_readiness() {
    let server = MockServer::start().await;
    let config = CacheConfig::builder()
        .durable_client_id("durable-1")
        .durable_client_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let cache = ClientCache::new(config).unwrap();
    let (_region, _seen) = subscribed_region(&cache, &[server.location()], 0).await;

    cache.ready_for_events().await.unwrap();
    assert!(common::eventually(|| server.state().count(CLIENT_READY) == 1).await);
    cache.close(true).await;
}

//! Pool integration tests against the in-process mock server.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use common::{cache_for, pool_config, unused_location, MockLocator, MockServer, ServerState};
use geode_client::{CacheConfig, ClientCache, GeodeError, PoolConfig, RegionConfig};
use geode_core::protocol::constants::PUT;
use geode_core::protocol::handshake::{
    REPLY_AUTHENTICATION_FAILED, REPLY_AUTHENTICATION_REQUIRED, REPLY_DUPLICATE_DURABLE_CLIENT,
};

#[tokio::test]
async fn test_connection_expiry_jitter_varies() {
    common::init_tracing();
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let pool = cache.pool("default").unwrap();

    let mut held = Vec::new();
    for _ in 0..100 {
        held.push(pool.acquire(&HashSet::new()).await.unwrap());
    }
    let variances: HashSet<i32> = held.iter().map(|c| c.expiry_variance()).collect();
    assert!(variances.len() > 1);
    assert!(variances.iter().all(|v| *v > -10 && *v < 10));
    assert_eq!(pool.stats().in_use, 100);

    drop(held);
    cache.close(false).await;
}

#[tokio::test]
async fn test_first_pool_stays_default() {
    let server = MockServer::start().await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    cache
        .create_pool(pool_config("first", &[server.location()]))
        .await
        .unwrap();
    cache
        .create_pool(pool_config("second", &[server.location()]))
        .await
        .unwrap();
    assert_eq!(cache.pool_manager().default_pool().unwrap().name(), "first");

    let duplicate = cache
        .create_pool(pool_config("second", &[server.location()]))
        .await
        .unwrap_err();
    assert!(matches!(duplicate, GeodeError::IllegalArgument(_)));

    let first = cache.pool_manager().remove("first").unwrap();
    first.destroy(false).await;
    assert!(cache.pool_manager().default_pool().is_none());

    let err = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap_err();
    assert!(matches!(err, GeodeError::IllegalState(_)));

    let region = cache
        .create_region::<String, String>(
            RegionConfig::builder("orders")
                .pool_name("second")
                .build()
                .unwrap(),
        )
        .unwrap();
    region.put("k".to_string(), "v".to_string()).await.unwrap();
    cache.close(false).await;
}

#[tokio::test]
async fn test_pool_exhaustion_times_out() {
    let server = MockServer::start().await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let config = PoolConfig::builder("small")
        .add_server(server.location())
        .min_connections(0)
        .max_connections(1)
        .free_connection_timeout(Duration::from_millis(200))
        .pr_single_hop_enabled(false)
        .build()
        .unwrap();
    let pool = cache.create_pool(config).await.unwrap();

    let held = pool.acquire(&HashSet::new()).await.unwrap();
    let err = pool.acquire(&HashSet::new()).await.unwrap_err();
    assert!(matches!(err, GeodeError::PoolExhausted(_)));

    drop(held);
    let again = pool.acquire(&HashSet::new()).await.unwrap();
    assert_eq!(again.endpoint(), &server.location());
    drop(again);
    cache.close(false).await;
}

#[tokio::test]
async fn test_requests_fail_over_to_live_server() {
    common::init_tracing();
    let state = Arc::new(ServerState::default());
    let a = MockServer::with_state(state.clone()).await;
    let b = MockServer::with_state(state.clone()).await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    cache
        .create_pool(pool_config("default", &[a.location(), b.location()]))
        .await
        .unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();

    for i in 0..4 {
        region
            .put(format!("k{}", i), "v".to_string())
            .await
            .unwrap();
    }
    a.stop();
    for i in 4..12 {
        region
            .put(format!("k{}", i), "v".to_string())
            .await
            .unwrap();
    }
    assert_eq!(state.size("orders"), 12);
    cache.close(false).await;
}

#[tokio::test]
async fn test_all_servers_down_is_not_connected() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();
    server.stop();
    let err = region
        .put("k".to_string(), "v".to_string())
        .await
        .unwrap_err();
    assert!(err.is_transient(), "unexpected error {:?}", err);
    cache.close(false).await;
}

#[tokio::test]
async fn test_dead_locator_is_skipped() {
    let server = MockServer::start().await;
    let locator = MockLocator::start(vec![server.location()]).await;
    let dead = unused_location().await;

    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let config = PoolConfig::builder("default")
        .add_locator(dead)
        .add_locator(locator.location())
        .min_connections(0)
        .pr_single_hop_enabled(false)
        .connect_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    cache.create_pool(config).await.unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();

    for i in 0..5 {
        region
            .put(format!("k{}", i), "v".to_string())
            .await
            .unwrap();
    }
    assert!(locator.queries() >= 1);
    assert_eq!(server.state().value("orders", "k3").as_deref(), Some("v"));
    cache.close(false).await;
}

#[tokio::test]
async fn test_no_locator_answers() {
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let config = PoolConfig::builder("default")
        .add_locator(unused_location().await)
        .min_connections(0)
        .retry_attempts(1)
        .pr_single_hop_enabled(false)
        .connect_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    cache.create_pool(config).await.unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();
    let err = region
        .put("k".to_string(), "v".to_string())
        .await
        .unwrap_err();
    assert!(
        matches!(err, GeodeError::NoAvailableLocators(_) | GeodeError::NotConnected(_)),
        "unexpected error {:?}",
        err
    );
    cache.close(false).await;
}

#[tokio::test]
async fn test_handshake_refusals_map_to_errors() {
    let cases: [(u8, fn(&GeodeError) -> bool); 3] = [
        (REPLY_AUTHENTICATION_REQUIRED, |e| {
            matches!(e, GeodeError::AuthenticationRequired(_))
        }),
        (REPLY_AUTHENTICATION_FAILED, |e| {
            matches!(e, GeodeError::AuthenticationFailed(_))
        }),
        (REPLY_DUPLICATE_DURABLE_CLIENT, |e| {
            matches!(e, GeodeError::DuplicateDurableClient(_))
        }),
    ];

    for (code, check) in cases {
        let server = MockServer::start().await;
        server.state().refuse_handshakes(code);
        let cache = cache_for(&server).await;
        let region = cache
            .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
            .unwrap();
        let err = region
            .put("k".to_string(), "v".to_string())
            .await
            .unwrap_err();
        assert!(check(&err), "code {} gave {:?}", code, err);
        assert!(err.is_security_failure() || code == REPLY_DUPLICATE_DURABLE_CLIENT);
        assert_eq!(server.state().count(PUT), 0);
        cache.close(false).await;
    }
}

#[tokio::test]
async fn test_slow_reply_times_out() {
    let server = MockServer::start().await;
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let config = PoolConfig::builder("default")
        .add_server(server.location())
        .min_connections(0)
        .pr_single_hop_enabled(false)
        .read_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    cache.create_pool(config).await.unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();

    server.state().set_delay(Duration::from_millis(600));
    let err = region
        .query::<String>("SELECT * FROM /orders")
        .await
        .unwrap_err();
    assert!(matches!(err, GeodeError::Timeout(_)), "unexpected error {:?}", err);

    server.state().set_delay(Duration::ZERO);
    region.put("k".to_string(), "v".to_string()).await.unwrap();
    cache.close(false).await;
}

#[tokio::test]
async fn test_destroy_interrupts_requests_in_flight() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let pool = cache.pool("default").unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("orders").build().unwrap())
        .unwrap();

    server.state().set_delay(Duration::from_millis(1500));
    let started = tokio::time::Instant::now();
    let in_flight = {
        let region = region.clone();
        tokio::spawn(async move { region.put("k".to_string(), "v".to_string()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.destroy(false).await;

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(matches!(err, GeodeError::CacheClosed(_)), "unexpected error {:?}", err);
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(pool.stats().total, 0);
    cache.close(false).await;
}

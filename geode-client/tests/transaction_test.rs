//! Transaction integration tests against the in-process mock server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{cache_for, MockLocator, MockServer, ServerState};
use geode_client::{
    CacheConfig, ClientCache, GeodeError, PoolConfig, RegionConfig, TransactionManager,
    TransactionState,
};
use geode_core::protocol::constants::{COMMIT, TX_FAILOVER};

fn caching(name: &str) -> RegionConfig {
    RegionConfig::builder(name)
        .caching_enabled(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_concurrent_writers_one_commit_conflicts() {
    common::init_tracing();
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();
    let manager = cache.transaction_manager();

    let first = manager.begin().unwrap();
    let second = manager.begin().unwrap();
    region
        .transactional(&first)
        .put("acct".to_string(), "first".to_string())
        .await
        .unwrap();
    region
        .transactional(&second)
        .put("acct".to_string(), "second".to_string())
        .await
        .unwrap();

    let outcomes = [first.commit().await, second.commit().await];
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(GeodeError::CommitConflict(_))))
        .count();
    assert_eq!(conflicts, 1, "{:?}", outcomes);
    assert!(outcomes[0].is_ok());
    assert_eq!(first.state(), TransactionState::Committed);
    assert_eq!(second.state(), TransactionState::Failed);
    assert_eq!(server.state().value("accounts", "acct").as_deref(), Some("first"));
    assert_eq!(server.state().count(COMMIT), 2);

    let retry = manager.begin().unwrap();
    region
        .transactional(&retry)
        .put("acct".to_string(), "second".to_string())
        .await
        .unwrap();
    retry.commit().await.unwrap();
    assert_eq!(server.state().value("accounts", "acct").as_deref(), Some("second"));
    cache.close(false).await;
}

#[tokio::test]
async fn test_local_effects_wait_for_commit() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();
    let tx = cache.transaction_manager().begin().unwrap();
    let view = region.transactional(&tx);

    view.put("a".to_string(), "1".to_string()).await.unwrap();
    assert_eq!(view.get(&"a".to_string()).await.unwrap(), Some("1".to_string()));
    assert!(view.contains_key_on_server(&"a".to_string()).await.unwrap());
    assert_eq!(region.get_local(&"a".to_string()), None);
    assert_eq!(region.get(&"a".to_string()).await.unwrap(), None);
    assert_eq!(tx.pool_name().await.as_deref(), Some("default"));

    tx.commit().await.unwrap();
    assert_eq!(region.get_local(&"a".to_string()), Some("1".to_string()));
    assert_eq!(server.state().value("accounts", "a").as_deref(), Some("1"));

    let err = view.put("b".to_string(), "2".to_string()).await.unwrap_err();
    assert!(matches!(err, GeodeError::IllegalState(_)));
    cache.close(false).await;
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();
    region.put("a".to_string(), "1".to_string()).await.unwrap();

    let tx = cache.transaction_manager().begin().unwrap();
    let view = region.transactional(&tx);
    view.put("b".to_string(), "2".to_string()).await.unwrap();
    view.remove(&"a".to_string()).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(region.get_local(&"a".to_string()), Some("1".to_string()));
    assert!(!region.contains_key_local(&"b".to_string()));
    assert_eq!(server.state().value("accounts", "a").as_deref(), Some("1"));
    assert_eq!(server.state().value("accounts", "b"), None);
    cache.close(false).await;
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();
    let manager = cache.transaction_manager().clone();

    let tx = manager.begin().unwrap();
    region
        .transactional(&tx)
        .put("a".to_string(), "1".to_string())
        .await
        .unwrap();
    let handle = tx.clone();
    let id = manager.suspend(tx).unwrap();
    assert!(manager.is_suspended(id));
    assert!(handle.is_suspended());
    let err = region
        .transactional(&handle)
        .put("b".to_string(), "2".to_string())
        .await
        .unwrap_err();
    assert!(matches!(err, GeodeError::IllegalState(_)));

    let resumed = manager.resume(id).unwrap();
    assert!(TransactionManager::same_transaction(&resumed, &handle));
    assert!(!manager.is_suspended(id));
    assert!(manager.resume(id).is_err());
    resumed.commit().await.unwrap();
    assert_eq!(server.state().value("accounts", "a").as_deref(), Some("1"));
    cache.close(false).await;
}

#[tokio::test]
async fn test_try_resume_waits_for_suspend() {
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let manager = cache.transaction_manager().clone();
    let tx = manager.begin().unwrap();
    let id = tx.id();

    assert!(manager
        .try_resume(id, Duration::from_millis(50))
        .await
        .is_none());

    let suspender = {
        let manager = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            manager.suspend(tx).unwrap();
        })
    };
    let resumed = manager.try_resume(id, Duration::from_secs(2)).await.unwrap();
    suspender.await.unwrap();
    assert_eq!(resumed.id(), id);
    assert!(!resumed.is_suspended());

    resumed.commit().await.unwrap();
    assert!(!manager.exists(id));
    let started = tokio::time::Instant::now();
    assert!(manager
        .try_resume(id, Duration::from_secs(5))
        .await
        .is_none());
    assert!(started.elapsed() < Duration::from_secs(1));
    cache.close(false).await;
}

#[tokio::test]
async fn test_transaction_fails_over_to_replica() {
    common::init_tracing();
    let state = Arc::new(ServerState::default());
    let primary = MockServer::with_state(state.clone()).await;
    let replica = MockServer::with_state(state.clone()).await;
    let locator = MockLocator::start(vec![primary.location(), replica.location()]).await;

    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    let config = PoolConfig::builder("default")
        .add_locator(locator.location())
        .min_connections(0)
        .pr_single_hop_enabled(false)
        .read_timeout(Duration::from_secs(2))
        .connect_timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    cache.create_pool(config).await.unwrap();
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();

    let tx = cache.transaction_manager().begin().unwrap();
    let view = region.transactional(&tx);
    view.put("a".to_string(), "1".to_string()).await.unwrap();
    primary.stop();
    view.put("b".to_string(), "2".to_string()).await.unwrap();
    assert_eq!(state.count(TX_FAILOVER), 1);

    tx.commit().await.unwrap();
    assert_eq!(state.value("accounts", "a").as_deref(), Some("1"));
    assert_eq!(state.value("accounts", "b").as_deref(), Some("2"));
    assert_eq!(region.get_local(&"b".to_string()), Some("2".to_string()));
    cache.close(false).await;
}

#[tokio::test]
async fn test_closing_cache_rolls_back_suspended() {
    let server = MockServer::start().await;
    let cache = cache_for(&server).await;
    let region = cache.create_region::<String, String>(caching("accounts")).unwrap();
    let manager = cache.transaction_manager().clone();

    let tx = manager.begin().unwrap();
    region
        .transactional(&tx)
        .put("a".to_string(), "1".to_string())
        .await
        .unwrap();
    let handle = tx.clone();
    manager.suspend(tx).unwrap();

    cache.close(false).await;
    assert_eq!(handle.state(), TransactionState::RolledBack);
    assert_eq!(server.state().value("accounts", "a"), None);
    assert!(matches!(
        manager.begin().unwrap_err(),
        GeodeError::CacheClosed(_)
    ));
}

#[tokio::test]
async fn test_timed_out_operation_fails_transaction() {
    let server = MockServer::start().await;
    server.state().insert("accounts", "seed", "s");
    let cache = ClientCache::new(CacheConfig::default()).unwrap();
    cache
        .create_pool(
            PoolConfig::builder("default")
                .min_connections(0)
                .pr_single_hop_enabled(false)
                .read_timeout(Duration::from_millis(300))
                .add_server(server.location())
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    let region = cache
        .create_region::<String, String>(RegionConfig::builder("accounts").build().unwrap())
        .unwrap();
    let tx = cache.transaction_manager().begin().unwrap();
    let view = region.transactional(&tx);
    assert_eq!(view.get(&"seed".to_string()).await.unwrap(), Some("s".to_string()));

    server.state().set_delay(Duration::from_millis(600));
    let err = view.put("a".to_string(), "1".to_string()).await.unwrap_err();
    assert!(matches!(err, GeodeError::Timeout(_)), "{:?}", err);
    assert_eq!(tx.state(), TransactionState::Failed);
    assert_eq!(cache.pool("default").unwrap().stats().total, 0);

    server.state().set_delay(Duration::ZERO);
    let err = view.get(&"seed".to_string()).await.unwrap_err();
    assert!(matches!(err, GeodeError::IllegalState(_)), "{:?}", err);

    // The late reply to the timed-out put must not answer a later request.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(region.get(&"seed".to_string()).await.unwrap(), Some("s".to_string()));
    assert_eq!(region.get(&"a".to_string()).await.unwrap(), None);
    cache.close(false).await;
}

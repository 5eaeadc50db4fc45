use std::sync::Arc;
use std::time::Duration;

use connector_pool::ConnectorPoolError;
use connector_pool::config::PoolConfig;
use connector_pool::pool::{PartitionKey, PoolManager, SlotCounts};
use connector_pool::statistics::PoolStatistics;
use connector_pool::test_utils::MockConnectionFactory;

const WAIT: Duration = Duration::from_millis(200);

#[tokio::test(flavor = "current_thread")]
async fn broken_connection_is_destroyed_on_release() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder().max_size(2).build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let mut conn = manager.acquire(&key, WAIT).await?;
    let broken_id = conn.id;
    conn.broken = true;
    manager.release(conn).await?;

    assert_eq!(manager.factory().destroyed(), 1);
    let counters = manager.partition_statistics(&key).expect("partition exists");
    assert_eq!(counters.created_count, 1);
    assert_eq!(counters.destroyed_count, 1);
    assert_eq!(counters.active_count, 0);

    let fresh = manager.acquire(&key, WAIT).await?;
    assert_ne!(fresh.id, broken_id);
    manager.release(fresh).await?;
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn validate_on_match_replaces_stale_idle_connection() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder()
        .max_size(2)
        .validate_on_match(true)
        .build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    let stale_id = conn.id;
    manager.release(conn).await?;
    let pool = manager.partition(&key).expect("partition exists");
    assert_eq!(pool.slot_counts().idle, 1);

    // the idle connection goes bad while parked
    manager.factory().set_validation_fails(true);
    let conn = manager.acquire(&key, WAIT).await?;
    assert_ne!(conn.id, stale_id);
    assert_eq!(manager.factory().destroyed(), 1);
    assert_eq!(pool.slot_counts().active, 1);
    assert_eq!(pool.slot_counts().idle, 0);

    manager.factory().set_validation_fails(false);
    manager.release(conn).await?;

    let counters = pool.statistics().counters();
    assert_eq!(counters.created_count, 2);
    assert_eq!(counters.destroyed_count, 1);
    assert_eq!(counters.active_count, 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn create_failures_are_retried_then_exhausted() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder()
        .max_size(1)
        .allocation_retry(2, Duration::from_millis(5))
        .build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    manager.factory().fail_next_creates(2);
    let conn = manager.acquire(&key, WAIT).await?;
    assert_eq!(manager.factory().created(), 1);
    manager.release(conn).await?;

    let other = PartitionKey::for_subject("tiger");
    manager.factory().fail_next_creates(3);
    let err = manager.acquire(&other, WAIT).await.unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ExhaustedError(_)));

    // the failed acquire gave its permit back
    manager.factory().fail_next_creates(0);
    let conn = manager.acquire(&other, WAIT).await?;
    manager.release(conn).await?;
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn dropped_handle_is_destroyed_and_frees_capacity() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder().max_size(1).build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    drop(conn);

    let again = manager.acquire(&key, WAIT).await?;
    assert_eq!(manager.factory().created(), 2);
    manager.release(again).await?;

    // the destroy runs on a spawned task
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.factory().destroyed(), 1);
    let counters = manager.statistics().counters();
    assert_eq!(counters.destroyed_count, 1);
    assert_eq!(counters.active_count, 0);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn release_after_shutdown_reports_not_found() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder().max_size(2).build()?;
    let manager = Arc::new(PoolManager::new(config, MockConnectionFactory::new())?);
    let key = PartitionKey::for_subject("scott");

    let idle = manager.acquire(&key, WAIT).await?;
    let held = manager.acquire(&key, WAIT).await?;
    manager.release(idle).await?;

    let report = manager.shutdown().await;
    assert_eq!(report.destroyed, 1);
    assert_eq!(report.deferred, 1);
    assert!(report.errors.is_empty());
    assert_eq!(manager.partition_count(), 0);

    let err = manager.release(held).await.unwrap_err();
    assert!(matches!(err, ConnectorPoolError::NotFoundError(_)));
    assert_eq!(manager.factory().destroyed(), 2);

    let err = manager.acquire(&key, WAIT).await.unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ShutdownError(_)));
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn destroy_errors_do_not_abort_shutdown() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder().max_size(3).build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;

    for subject in ["a", "b", "c"] {
        let key = PartitionKey::for_subject(subject);
        let conn = manager.acquire(&key, WAIT).await?;
        manager.release(conn).await?;
    }
    manager.factory().set_destroy_fails(true);

    let report = manager.shutdown().await;
    assert_eq!(report.destroyed, 3);
    assert_eq!(report.errors.len(), 3);
    assert_eq!(manager.factory().destroyed(), 3);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn cancelled_release_still_destroys_through_factory() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder().max_size(1).build()?;
    let factory = MockConnectionFactory::new().with_validate_delay(Duration::from_millis(50));
    let manager = PoolManager::new(config, factory)?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    // give up on the release while the connection is being validated
    let cancelled = tokio::time::timeout(Duration::from_millis(5), manager.release(conn)).await;
    assert!(cancelled.is_err());

    // the destroy runs on a spawned task
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.factory().destroyed(), 1);
    let pool = manager.partition(&key).expect("partition exists");
    assert_eq!(pool.slot_counts(), SlotCounts::default());
    let counters = pool.statistics().counters();
    assert_eq!(counters.destroyed_count, 1);
    assert_eq!(counters.active_count, 0);

    // the permit came back too
    let conn = manager.acquire(&key, WAIT).await?;
    assert_eq!(manager.factory().created(), 2);
    manager.release(conn).await?;
    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use connector_pool::ConnectorPoolError;
use connector_pool::config::PoolConfig;
use connector_pool::pool::{PartitionKey, PoolManager};
use connector_pool::test_utils::MockConnectionFactory;

const WAIT: Duration = Duration::from_millis(200);

fn short_lived(min_size: usize) -> Result<PoolConfig, ConnectorPoolError> {
    PoolConfig::builder()
        .min_size(min_size)
        .max_size(4)
        .idle_timeout(Duration::from_millis(20))
        .partition_idle_window(Duration::ZERO)
        .eviction_interval(Duration::from_millis(25))
        .build()
}

#[tokio::test(flavor = "current_thread")]
async fn expired_idle_connections_are_evicted() -> Result<(), ConnectorPoolError> {
    let manager = PoolManager::new(short_lived(0)?, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let a = manager.acquire(&key, WAIT).await?;
    let b = manager.acquire(&key, WAIT).await?;
    manager.release(a).await?;

    // nothing has expired yet
    let report = manager.evict_idle().await;
    assert_eq!(report.evicted, 0);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let report = manager.evict_idle().await;
    assert_eq!(report.evicted, 1);
    assert!(report.errors.is_empty());
    assert_eq!(manager.factory().destroyed(), 1);

    // leased connections are never evicted
    let pool = manager.partition(&key).expect("partition exists");
    assert_eq!(pool.slot_counts().active, 1);
    manager.release(b).await?;

    let counters = pool.statistics().counters();
    assert_eq!(counters.created_count, 2);
    assert_eq!(counters.destroyed_count, 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn eviction_refills_to_min_size() -> Result<(), ConnectorPoolError> {
    let manager = PoolManager::new(short_lived(2)?, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    manager.release(conn).await?;

    tokio::time::sleep(Duration::from_millis(40)).await;
    let report = manager.evict_idle().await;
    assert_eq!(report.evicted, 1);
    assert_eq!(report.refilled, 2);

    let pool = manager.partition(&key).expect("partition exists");
    assert_eq!(pool.slot_counts().idle, 2);
    assert_eq!(manager.factory().live(), 2);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn prefill_opens_min_size_on_first_use() -> Result<(), ConnectorPoolError> {
    let config = PoolConfig::builder()
        .min_size(3)
        .max_size(4)
        .prefill(true)
        .build()?;
    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    assert_eq!(manager.factory().created(), 3);
    let pool = manager.partition(&key).expect("partition exists");
    assert_eq!(pool.slot_counts().idle, 2);
    manager.release(conn).await?;
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn empty_partitions_are_removed() -> Result<(), ConnectorPoolError> {
    let manager = PoolManager::new(short_lived(0)?, MockConnectionFactory::new())?;
    let busy = PartitionKey::for_subject("busy");
    let quiet = PartitionKey::for_subject("quiet");

    let held = manager.acquire(&busy, WAIT).await?;
    let conn = manager.acquire(&quiet, WAIT).await?;
    manager.release(conn).await?;
    assert_eq!(manager.partition_count(), 2);

    // an idle connection keeps its partition alive
    assert_eq!(manager.remove_idle_partitions(), 0);

    tokio::time::sleep(Duration::from_millis(40)).await;
    let (report, removed) = manager.sweep().await;
    assert_eq!(report.evicted, 1);
    assert_eq!(removed, 1);
    assert_eq!(manager.partition_keys(), vec![busy.clone()]);

    manager.release(held).await?;
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn removed_partition_is_recreated_on_demand() -> Result<(), ConnectorPoolError> {
    let manager = PoolManager::new(short_lived(0)?, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    let conn = manager.acquire(&key, WAIT).await?;
    manager.release(conn).await?;
    tokio::time::sleep(Duration::from_millis(40)).await;
    manager.sweep().await;
    assert_eq!(manager.partition_count(), 0);

    let conn = manager.acquire(&key, WAIT).await?;
    let counters = manager.partition_statistics(&key).expect("partition exists");
    assert_eq!(counters.created_count, 1);
    assert_eq!(counters.active_count, 1);
    manager.release(conn).await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reaper_sweeps_in_the_background() -> Result<(), ConnectorPoolError> {
    let manager = Arc::new(PoolManager::new(short_lived(0)?, MockConnectionFactory::new())?);
    let key = PartitionKey::for_subject("scott");
    let conn = manager.acquire(&key, WAIT).await?;
    manager.release(conn).await?;

    manager.start_reaper();
    manager.start_reaper();

    let mut removed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if manager.partition_count() == 0 {
            removed = true;
            break;
        }
    }
    manager.stop_reaper().await;

    assert!(removed, "reaper never removed the idle partition");
    assert_eq!(manager.factory().destroyed(), 1);
    Ok(())
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::PooledConnection;
use super::key::PartitionKey;
use super::sub_pool::{EvictionReport, PendingAcquire, ShutdownReport, SubPool};
use crate::config::PoolConfig;
use crate::error::ConnectorPoolError;
use crate::factory::ConnectionFactory;
use crate::statistics::{PoolCounters, PoolStatisticsAggregator};

pub(crate) type PartitionMap<F> = DashMap<PartitionKey, Arc<SubPool<F>>>;

struct Reaper {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Routes every request to the partition of its [`PartitionKey`], creating
/// partitions on first use and dropping them once they sit empty.
///
/// ```rust,no_run
/// use std::time::Duration;
/// use connector_pool::prelude::*;
/// use connector_pool::test_utils::MockConnectionFactory;
///
/// # async fn demo() -> Result<(), ConnectorPoolError> {
/// let config = PoolConfig::builder().max_size(4).build()?;
/// let manager = PoolManager::new(config, MockConnectionFactory::new())?;
///
/// let key = PartitionKey::for_subject("scott");
/// let conn = manager.acquire(&key, Duration::from_millis(500)).await?;
/// manager.release(conn).await?;
/// # Ok(())
/// # }
/// ```
pub struct PoolManager<F: ConnectionFactory> {
    config: Arc<PoolConfig>,
    factory: Arc<F>,
    partitions: Arc<PartitionMap<F>>,
    statistics_enabled: Arc<AtomicBool>,
    reaper: Mutex<Option<Reaper>>,
    shut_down: AtomicBool,
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("partitions", &self.partitions.len())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> PoolManager<F> {
    /// # Errors
    /// Returns `ConnectorPoolError::ConfigError` if `config` is invalid.
    pub fn new(config: PoolConfig, factory: F) -> Result<Self, ConnectorPoolError> {
        Self::with_shared_factory(config, Arc::new(factory))
    }

    /// Like [`Self::new`] for a factory the caller keeps a handle to.
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ConfigError` if `config` is invalid.
    pub fn with_shared_factory(
        config: PoolConfig,
        factory: Arc<F>,
    ) -> Result<Self, ConnectorPoolError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            factory,
            partitions: Arc::new(DashMap::new()),
            statistics_enabled: Arc::new(AtomicBool::new(true)),
            reaper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// Find or create the partition for `key` and mark an acquire in flight
    /// before the map entry is let go, so the partition cannot be removed
    /// underneath the caller.
    fn enter_partition(&self, key: &PartitionKey) -> (PendingAcquire<F>, bool) {
        if let Some(entry) = self.partitions.get(key) {
            return (entry.value().begin_acquire(), false);
        }
        let mut created = false;
        let entry = self.partitions.entry(key.clone()).or_insert_with(|| {
            created = true;
            SubPool::new(
                key.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.factory),
                self.statistics_enabled.load(Ordering::Acquire),
            )
        });
        (entry.value().begin_acquire(), created)
    }

    /// Lease a connection from `key`'s partition, waiting at most `timeout`.
    ///
    /// # Errors
    /// `TimedOut` if capacity does not free up in time, `ExhaustedError`
    /// when connections cannot be created or keep failing validation,
    /// `ShutdownError` after [`Self::shutdown`].
    pub async fn acquire(
        &self,
        key: &PartitionKey,
        timeout: Duration,
    ) -> Result<PooledConnection<F::Connection>, ConnectorPoolError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(ConnectorPoolError::ShutdownError(
                "pool manager is shut down".to_string(),
            ));
        }
        let (pending, created) = self.enter_partition(key);
        if created {
            info!(partition = %key, "created partition");
            if self.config.prefill && self.config.min_size > 0 {
                if let Err(e) = pending.pool().fill_to_min().await {
                    warn!(partition = %key, "prefill failed: {e}");
                }
            }
        }
        pending.pool().acquire(timeout).await
    }

    /// [`Self::acquire`] with the configured blocking timeout.
    ///
    /// # Errors
    /// See [`Self::acquire`].
    pub async fn get(
        &self,
        key: &PartitionKey,
    ) -> Result<PooledConnection<F::Connection>, ConnectorPoolError> {
        self.acquire(key, self.config.blocking_timeout).await
    }

    /// Return a leased connection to its partition.
    ///
    /// # Errors
    /// `NotFoundError` when the partition no longer exists; the connection is
    /// destroyed in that case.
    pub async fn release(
        &self,
        handle: PooledConnection<F::Connection>,
    ) -> Result<(), ConnectorPoolError> {
        let pool = self
            .partitions
            .get(handle.key())
            .map(|entry| Arc::clone(entry.value()));
        if let Some(pool) = pool {
            return pool.release(handle).await;
        }

        let Some((key, _lease, conn)) = handle.into_parts() else {
            return Ok(());
        };
        warn!(partition = %key, "released connection has no partition, destroying it");
        if let Err(e) = self.factory.destroy(conn).await {
            warn!(partition = %key, "failed to destroy orphaned connection: {e}");
        }
        Err(ConnectorPoolError::NotFoundError(key.to_string()))
    }

    /// Drop partitions that hold no connections, have no acquire in flight
    /// and saw no activity during the configured idle window. Returns how
    /// many were removed.
    pub fn remove_idle_partitions(&self) -> usize {
        let window = self.config.partition_idle_window;
        let candidates: Vec<PartitionKey> = self
            .partitions
            .iter()
            .filter(|entry| entry.value().looks_idle(window))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            if self
                .partitions
                .remove_if(&key, |_, pool| pool.retire_if_idle(window))
                .is_some()
            {
                info!(partition = %key, "removed idle partition");
                removed += 1;
            }
        }
        removed
    }

    /// Run the idle sweep over every partition.
    pub async fn evict_idle(&self) -> EvictionReport {
        let pools = self.snapshot();
        let mut report = EvictionReport::default();
        for partial in join_all(pools.iter().map(|pool| pool.evict_idle())).await {
            report.merge(partial);
        }
        report
    }

    /// One reaper pass: evict idle connections, then drop idle partitions.
    pub async fn sweep(&self) -> (EvictionReport, usize) {
        let report = self.evict_idle().await;
        let removed = self.remove_idle_partitions();
        if report.evicted > 0 || removed > 0 {
            info!(
                evicted = report.evicted,
                refilled = report.refilled,
                removed_partitions = removed,
                "pool sweep finished"
            );
        }
        (report, removed)
    }

    /// Start the background sweep every `eviction_interval`. Does nothing if
    /// it is already running. The task holds only a weak reference, so it
    /// ends by itself once the manager is dropped.
    pub fn start_reaper(self: &Arc<Self>) {
        let mut slot = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let period = self.config.eviction_interval;
        let manager: Weak<Self> = Arc::downgrade(self);
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.sweep().await;
            }
            debug!("pool reaper stopped");
        });
        *slot = Some(Reaper { token, handle });
    }

    /// Stop the background sweep and wait for it to finish its current pass.
    pub async fn stop_reaper(&self) {
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.token.cancel();
            if let Err(e) = reaper.handle.await {
                warn!("pool reaper task failed: {e}");
            }
        }
    }

    /// Shut every partition down and forget it. Later acquires fail with
    /// `ShutdownError`.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shut_down.store(true, Ordering::Release);
        self.stop_reaper().await;
        let keys: Vec<PartitionKey> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let pools: Vec<Arc<SubPool<F>>> = keys
            .iter()
            .filter_map(|key| self.partitions.remove(key).map(|(_, pool)| pool))
            .collect();

        let mut report = ShutdownReport::default();
        for partial in join_all(pools.iter().map(|pool| pool.shutdown())).await {
            report.merge(partial);
        }
        info!(
            partitions = pools.len(),
            destroyed = report.destroyed,
            deferred = report.deferred,
            "pool manager shut down"
        );
        report
    }

    /// Statistics over every partition, live as partitions come and go.
    #[must_use]
    pub fn statistics(&self) -> PoolStatisticsAggregator<F> {
        PoolStatisticsAggregator::new(
            Arc::clone(&self.partitions),
            Arc::clone(&self.statistics_enabled),
        )
    }

    #[must_use]
    pub fn partition(&self, key: &PartitionKey) -> Option<Arc<SubPool<F>>> {
        self.partitions.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Counters of one partition, `None` if it does not exist.
    #[must_use]
    pub fn partition_statistics(&self, key: &PartitionKey) -> Option<PoolCounters> {
        self.partitions
            .get(key)
            .map(|entry| entry.value().statistics().counters())
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    #[must_use]
    pub fn partition_keys(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .partitions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn snapshot(&self) -> Vec<Arc<SubPool<F>>> {
        self.partitions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl<F: ConnectionFactory> Drop for PoolManager<F> {
    fn drop(&mut self) {
        let reaper = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.token.cancel();
        }
    }
}

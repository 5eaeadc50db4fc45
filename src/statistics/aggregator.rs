use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::factory::ConnectionFactory;
use crate::pool::manager::PartitionMap;

use super::{MetricValue, PoolCounters, PoolMetric, PoolStatistics};

/// Pool-wide statistics: every read folds over the partitions that exist
/// at that moment.
///
/// `set_enabled` records the flag before broadcasting it. A partition created
/// concurrently reads the flag while the partition map shard is locked, so it
/// either sees the new value or is already in the map when the broadcast
/// reaches it.
pub struct PoolStatisticsAggregator<F: ConnectionFactory> {
    partitions: Arc<PartitionMap<F>>,
    enabled: Arc<AtomicBool>,
}

impl<F: ConnectionFactory> PoolStatisticsAggregator<F> {
    pub(crate) fn new(partitions: Arc<PartitionMap<F>>, enabled: Arc<AtomicBool>) -> Self {
        Self {
            partitions,
            enabled,
        }
    }

    /// Partitions contributing to the totals right now.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

impl<F: ConnectionFactory> Clone for PoolStatisticsAggregator<F> {
    fn clone(&self) -> Self {
        Self {
            partitions: Arc::clone(&self.partitions),
            enabled: Arc::clone(&self.enabled),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PoolStatisticsAggregator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolStatisticsAggregator")
            .field("partitions", &self.partitions.len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl<F: ConnectionFactory> PoolStatistics for PoolStatisticsAggregator<F> {
    fn metric(&self, metric: PoolMetric) -> MetricValue {
        self.counters().metric(metric)
    }

    fn counters(&self) -> PoolCounters {
        self.partitions
            .iter()
            .map(|entry| entry.value().statistics().counters())
            .fold(PoolCounters::default(), PoolCounters::combine)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        for entry in self.partitions.iter() {
            entry.value().statistics().set_enabled(enabled);
        }
    }

    fn clear(&self) {
        for entry in self.partitions.iter() {
            entry.value().statistics().clear();
        }
    }
}

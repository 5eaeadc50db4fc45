use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{MetricValue, PoolMetric, PoolStatistics};

/// Plain values of the six stored counters of one partition, or of a fold
/// over several partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCounters {
    pub active_count: u64,
    pub created_count: u64,
    pub destroyed_count: u64,
    pub timed_out: u64,
    pub total_blocking_time_millis: u64,
    pub max_wait_time_millis: u64,
}

impl PoolCounters {
    /// `total_blocking_time / created_count`, or 0 before anything was created.
    #[must_use]
    pub fn average_blocking_time_millis(&self) -> u64 {
        if self.created_count == 0 {
            0
        } else {
            self.total_blocking_time_millis / self.created_count
        }
    }

    /// Fold two partitions: sums, except the wait time which takes the max.
    #[must_use]
    pub fn combine(self, other: PoolCounters) -> PoolCounters {
        PoolCounters {
            active_count: self.active_count + other.active_count,
            created_count: self.created_count + other.created_count,
            destroyed_count: self.destroyed_count + other.destroyed_count,
            timed_out: self.timed_out + other.timed_out,
            total_blocking_time_millis: self.total_blocking_time_millis
                + other.total_blocking_time_millis,
            max_wait_time_millis: self.max_wait_time_millis.max(other.max_wait_time_millis),
        }
    }

    #[must_use]
    pub fn metric(&self, metric: PoolMetric) -> MetricValue {
        match metric {
            PoolMetric::ActiveCount => MetricValue::Count(self.active_count),
            PoolMetric::AverageBlockingTime => {
                MetricValue::Millis(self.average_blocking_time_millis())
            }
            PoolMetric::CreatedCount => MetricValue::Count(self.created_count),
            PoolMetric::DestroyedCount => MetricValue::Count(self.destroyed_count),
            PoolMetric::MaxWaitTime => MetricValue::Millis(self.max_wait_time_millis),
            PoolMetric::TimedOut => MetricValue::Count(self.timed_out),
            PoolMetric::TotalBlockingTime => MetricValue::Millis(self.total_blocking_time_millis),
        }
    }
}

const EPOCH_SHIFT: u32 = 48;
const COUNT_MASK: u64 = (1 << EPOCH_SHIFT) - 1;
const EPOCH_MASK: u64 = u64::MAX >> EPOCH_SHIFT;

/// A counter tagged with the epoch it counts in: the top 16 bits hold the
/// epoch, the rest the count. Checking the epoch and moving the count is one
/// compare-and-swap, so a concurrent `clear` either sees an update or wipes
/// it, never half of it.
#[derive(Debug)]
struct EpochCounter(AtomicU64);

impl EpochCounter {
    fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    fn epoch_of(packed: u64) -> u64 {
        packed >> EPOCH_SHIFT
    }

    /// Count one, returning the epoch the increment landed in.
    fn increment(&self) -> u64 {
        let previous = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                if v & COUNT_MASK == COUNT_MASK {
                    Some(v)
                } else {
                    Some(v + 1)
                }
            })
            .unwrap_or_else(|v| v);
        Self::epoch_of(previous)
    }

    /// Count one, but only while the counter is still in `epoch`.
    fn increment_in(&self, epoch: u64) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (Self::epoch_of(v) == epoch && v & COUNT_MASK < COUNT_MASK).then(|| v + 1)
            })
            .is_ok()
    }

    /// Uncount one, but only while the counter is still in `epoch`.
    fn decrement_in(&self, epoch: u64) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (Self::epoch_of(v) == epoch && v & COUNT_MASK > 0).then(|| v - 1)
            })
            .is_ok()
    }

    fn reset(&self, epoch: u64) {
        self.0.store(epoch << EPOCH_SHIFT, Ordering::Release);
    }

    /// The count if the counter is in `epoch`; a counter `clear` has not
    /// reached yet reads as zero.
    fn load_in(&self, epoch: u64) -> u64 {
        let v = self.0.load(Ordering::Acquire);
        if Self::epoch_of(v) == epoch {
            v & COUNT_MASK
        } else {
            0
        }
    }
}

/// Live counters of a single partition.
///
/// Every update is a single atomic operation so the acquire/release path never
/// takes a lock for bookkeeping. `clear` starts a new epoch: slots and leases
/// stamped with an older epoch no longer move `active_count` or
/// `destroyed_count`, which keeps `created >= destroyed` and
/// `active <= max_size` true after a reset. Epochs wrap after 65536 clears;
/// a lease held across that many clears may move the wrong generation.
#[derive(Debug)]
pub struct SubPoolStatistics {
    active: EpochCounter,
    created: EpochCounter,
    destroyed: EpochCounter,
    timed_out: AtomicU64,
    total_blocking: AtomicU64,
    max_wait: AtomicU64,
    epoch: AtomicU64,
    enabled: AtomicBool,
    // snapshot served while disabled
    frozen: Mutex<Option<PoolCounters>>,
}

impl SubPoolStatistics {
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self {
            active: EpochCounter::new(),
            created: EpochCounter::new(),
            destroyed: EpochCounter::new(),
            timed_out: AtomicU64::new(0),
            total_blocking: AtomicU64::new(0),
            max_wait: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            enabled: AtomicBool::new(enabled),
            frozen: Mutex::new(if enabled {
                None
            } else {
                Some(PoolCounters::default())
            }),
        }
    }

    /// Generation number, bumped by every `clear`.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Count a new connection and return the epoch to stamp on its slot.
    pub(crate) fn record_created(&self) -> u64 {
        self.created.increment()
    }

    /// A slot created in an older epoch was never counted by the current
    /// `created`, so its destruction is not counted either.
    pub(crate) fn record_destroyed(&self, slot_epoch: u64) {
        self.destroyed.increment_in(slot_epoch);
    }

    /// Count a successful acquire and return the epoch to stamp on the lease.
    pub(crate) fn record_leased(&self, waited: Duration) -> u64 {
        let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
        self.total_blocking.fetch_add(waited_ms, Ordering::Relaxed);
        self.max_wait.fetch_max(waited_ms, Ordering::Relaxed);
        self.active.increment()
    }

    pub(crate) fn record_returned(&self, lease_epoch: u64) {
        self.active.decrement_in(lease_epoch);
    }

    pub(crate) fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values, or the values frozen when collection was disabled.
    #[must_use]
    pub fn counters(&self) -> PoolCounters {
        if !self.enabled.load(Ordering::Acquire) {
            let frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(values) = *frozen {
                return values;
            }
        }
        self.live()
    }

    fn live(&self) -> PoolCounters {
        // retry when a clear lands mid-read; destroyed is read before
        // created so the pair never shows more destroyed than created
        loop {
            let epoch = self.epoch();
            let masked = epoch & EPOCH_MASK;
            let destroyed_count = self.destroyed.load_in(masked);
            let active_count = self.active.load_in(masked);
            let created_count = self.created.load_in(masked);
            if self.epoch() != epoch {
                continue;
            }
            return PoolCounters {
                active_count,
                created_count,
                destroyed_count,
                timed_out: self.timed_out.load(Ordering::Relaxed),
                total_blocking_time_millis: self.total_blocking.load(Ordering::Relaxed),
                max_wait_time_millis: self.max_wait.load(Ordering::Relaxed),
            };
        }
    }
}

impl PoolStatistics for SubPoolStatistics {
    fn metric(&self, metric: PoolMetric) -> MetricValue {
        self.counters().metric(metric)
    }

    fn counters(&self) -> PoolCounters {
        SubPoolStatistics::counters(self)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        let mut frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
        let was_enabled = self.enabled.swap(enabled, Ordering::AcqRel);
        if enabled {
            *frozen = None;
        } else if was_enabled {
            *frozen = Some(self.live());
        }
    }

    fn clear(&self) {
        let mut frozen = self.frozen.lock().unwrap_or_else(PoisonError::into_inner);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
            & EPOCH_MASK;
        // destroyed before created, so no reader sees more destroyed than created
        self.destroyed.reset(epoch);
        self.active.reset(epoch);
        self.created.reset(epoch);
        self.timed_out.store(0, Ordering::Relaxed);
        self.total_blocking.store(0, Ordering::Relaxed);
        self.max_wait.store(0, Ordering::Relaxed);
        if frozen.is_some() {
            *frozen = Some(PoolCounters::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_records_wait_and_running_max() {
        let stats = SubPoolStatistics::new(true);
        stats.record_created();
        stats.record_created();
        stats.record_leased(Duration::from_millis(30));
        stats.record_leased(Duration::from_millis(10));

        let c = stats.counters();
        assert_eq!(c.active_count, 2);
        assert_eq!(c.created_count, 2);
        assert_eq!(c.total_blocking_time_millis, 40);
        assert_eq!(c.max_wait_time_millis, 30);
        assert_eq!(c.average_blocking_time_millis(), 20);
    }

    #[test]
    fn average_is_zero_without_creations() {
        let stats = SubPoolStatistics::new(true);
        stats.record_leased(Duration::from_millis(99));
        assert_eq!(stats.counters().average_blocking_time_millis(), 0);
    }

    #[test]
    fn disabled_reads_are_frozen_until_enabled() {
        let stats = SubPoolStatistics::new(true);
        stats.record_created();
        stats.set_enabled(false);
        stats.record_created();
        assert_eq!(stats.counters().created_count, 1);

        stats.set_enabled(true);
        assert_eq!(stats.counters().created_count, 2);
    }

    #[test]
    fn clear_starts_a_new_epoch() {
        let stats = SubPoolStatistics::new(true);
        let slot_epoch = stats.record_created();
        let lease_epoch = stats.record_leased(Duration::ZERO);

        stats.clear();
        assert_eq!(stats.counters(), PoolCounters::default());

        // updates stamped before the clear leave the new counters alone
        stats.record_returned(lease_epoch);
        stats.record_destroyed(slot_epoch);
        assert_eq!(stats.counters(), PoolCounters::default());

        let fresh = stats.record_created();
        stats.record_destroyed(fresh);
        assert_eq!(stats.counters().created_count, 1);
        assert_eq!(stats.counters().destroyed_count, 1);
    }

    #[test]
    fn clear_racing_updates_never_strands_counts() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicBool;

        let stats = Arc::new(SubPoolStatistics::new(true));
        let done = Arc::new(AtomicBool::new(false));
        let clearer = {
            let stats = Arc::clone(&stats);
            let done = Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    stats.clear();
                }
            })
        };
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        let slot = stats.record_created();
                        let lease = stats.record_leased(Duration::ZERO);
                        let c = stats.counters();
                        assert!(c.created_count >= c.destroyed_count, "{c:?}");
                        stats.record_returned(lease);
                        stats.record_destroyed(slot);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        done.store(true, Ordering::Release);
        clearer.join().expect("clearer panicked");

        let c = stats.counters();
        assert_eq!(c.active_count, 0);
        assert_eq!(c.created_count, c.destroyed_count);
    }

    #[test]
    fn combine_sums_and_maxes() {
        let a = PoolCounters {
            active_count: 1,
            created_count: 2,
            destroyed_count: 1,
            timed_out: 0,
            total_blocking_time_millis: 10,
            max_wait_time_millis: 7,
        };
        let b = PoolCounters {
            active_count: 2,
            created_count: 3,
            destroyed_count: 0,
            timed_out: 4,
            total_blocking_time_millis: 5,
            max_wait_time_millis: 3,
        };
        let c = a.combine(b);
        assert_eq!(c.active_count, 3);
        assert_eq!(c.created_count, 5);
        assert_eq!(c.timed_out, 4);
        assert_eq!(c.total_blocking_time_millis, 15);
        assert_eq!(c.max_wait_time_millis, 7);
        assert_eq!(c.average_blocking_time_millis(), 3);
    }
}

//! Pool metrics exposed through a self-describing contract.
//!
//! Monitoring code does not need to know the metric schema up front: it can
//! list [`PoolStatistics::names`], ask for each metric's kind and localized
//! description, and read its current value.

pub mod aggregator;
pub mod counters;
pub mod descriptions;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorPoolError;

pub use aggregator::PoolStatisticsAggregator;
pub use counters::{PoolCounters, SubPoolStatistics};
pub use descriptions::{DEFAULT_LOCALE, Locale};

/// The seven metrics every pool statistics source offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolMetric {
    ActiveCount,
    AverageBlockingTime,
    CreatedCount,
    DestroyedCount,
    MaxWaitTime,
    TimedOut,
    TotalBlockingTime,
}

impl PoolMetric {
    pub const ALL: [PoolMetric; 7] = [
        PoolMetric::ActiveCount,
        PoolMetric::AverageBlockingTime,
        PoolMetric::CreatedCount,
        PoolMetric::DestroyedCount,
        PoolMetric::MaxWaitTime,
        PoolMetric::TimedOut,
        PoolMetric::TotalBlockingTime,
    ];

    pub const NAMES: [&'static str; 7] = [
        "ActiveCount",
        "AverageBlockingTime",
        "CreatedCount",
        "DestroyedCount",
        "MaxWaitTime",
        "TimedOut",
        "TotalBlockingTime",
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PoolMetric::ActiveCount => "ActiveCount",
            PoolMetric::AverageBlockingTime => "AverageBlockingTime",
            PoolMetric::CreatedCount => "CreatedCount",
            PoolMetric::DestroyedCount => "DestroyedCount",
            PoolMetric::MaxWaitTime => "MaxWaitTime",
            PoolMetric::TimedOut => "TimedOut",
            PoolMetric::TotalBlockingTime => "TotalBlockingTime",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        PoolMetric::ALL.into_iter().find(|m| m.name() == name)
    }

    #[must_use]
    pub fn kind(self) -> MetricKind {
        match self {
            PoolMetric::ActiveCount => MetricKind::Gauge,
            PoolMetric::CreatedCount | PoolMetric::DestroyedCount | PoolMetric::TimedOut => {
                MetricKind::Counter
            }
            PoolMetric::AverageBlockingTime
            | PoolMetric::MaxWaitTime
            | PoolMetric::TotalBlockingTime => MetricKind::Duration,
        }
    }
}

/// What a metric's number means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Monotonic count, reset only by `clear`
    Counter,
    /// Milliseconds
    Duration,
    /// Instantaneous level
    Gauge,
}

/// A metric reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricValue {
    Count(u64),
    Millis(u64),
}

impl MetricValue {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        match self {
            MetricValue::Count(v) | MetricValue::Millis(v) => v,
        }
    }
}

/// All metrics at one instant, ready to hand to an external monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub enabled: bool,
    pub active_count: u64,
    pub average_blocking_time_millis: u64,
    pub created_count: u64,
    pub destroyed_count: u64,
    pub max_wait_time_millis: u64,
    pub timed_out: u64,
    pub total_blocking_time_millis: u64,
}

impl StatisticsSnapshot {
    #[must_use]
    pub fn from_counters(counters: PoolCounters, enabled: bool) -> Self {
        Self {
            taken_at: Utc::now(),
            enabled,
            active_count: counters.active_count,
            average_blocking_time_millis: counters.average_blocking_time_millis(),
            created_count: counters.created_count,
            destroyed_count: counters.destroyed_count,
            max_wait_time_millis: counters.max_wait_time_millis,
            timed_out: counters.timed_out,
            total_blocking_time_millis: counters.total_blocking_time_millis,
        }
    }

    /// # Errors
    /// Returns `ConnectorPoolError::JsonError` if serialization fails.
    pub fn to_json(&self) -> Result<String, ConnectorPoolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Introspectable metrics surface, implemented per partition and across
/// all partitions.
pub trait PoolStatistics: Send + Sync {
    /// Value of one metric, computed when called.
    fn metric(&self, metric: PoolMetric) -> MetricValue;

    /// All stored counters at once.
    fn counters(&self) -> PoolCounters;

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    /// Reset every counter to zero.
    fn clear(&self);

    fn names(&self) -> &'static [&'static str] {
        &PoolMetric::NAMES
    }

    /// Kind of metric `name`, `None` if there is no such metric.
    fn metric_type(&self, name: &str) -> Option<MetricKind> {
        PoolMetric::from_name(name).map(PoolMetric::kind)
    }

    /// Localized description; empty when nothing is registered for `name`.
    fn description(&self, name: &str, locale: &Locale) -> String {
        descriptions::describe(name, locale)
    }

    fn description_default(&self, name: &str) -> String {
        self.description(name, &Locale::default_locale())
    }

    /// Current value of metric `name`, `None` if there is no such metric.
    fn value(&self, name: &str) -> Option<MetricValue> {
        PoolMetric::from_name(name).map(|m| self.metric(m))
    }

    fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot::from_counters(self.counters(), self.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_and_kinds_line_up() {
        for (metric, name) in PoolMetric::ALL.iter().zip(PoolMetric::NAMES) {
            assert_eq!(metric.name(), name);
            assert_eq!(PoolMetric::from_name(name), Some(*metric));
        }
        assert_eq!(PoolMetric::from_name("Uptime"), None);
        assert_eq!(PoolMetric::ActiveCount.kind(), MetricKind::Gauge);
        assert_eq!(PoolMetric::TimedOut.kind(), MetricKind::Counter);
        assert_eq!(PoolMetric::MaxWaitTime.kind(), MetricKind::Duration);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let snapshot = StatisticsSnapshot::from_counters(
            PoolCounters {
                created_count: 4,
                total_blocking_time_millis: 10,
                ..Default::default()
            },
            true,
        );
        assert_eq!(snapshot.average_blocking_time_millis, 2);
        let json = snapshot.to_json().unwrap();
        assert!(json.contains("\"created_count\":4"));
    }
}

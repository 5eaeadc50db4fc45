//! Convenient imports for common functionality.
//!
//! ```rust
//! use connector_pool::prelude::*;
//! ```

pub use crate::config::{PoolConfig, PoolConfigBuilder, PoolConfigFile};
pub use crate::error::ConnectorPoolError;
pub use crate::factory::ConnectionFactory;
pub use crate::metadata::{OutboundResourceAdapter, TimeoutSettings, TransactionSupport};
pub use crate::pool::{
    EvictionReport, PartitionKey, PoolManager, PooledConnection, ShutdownReport, SubPool,
};
pub use crate::recovery::{
    NoopXaResourceRecovery, RecoveryCoordinator, RecoveryState, RecoveryUnit, XaResource,
    XaResourceFactory, XaResourceRecovery, Xid,
};
pub use crate::statistics::{
    Locale, MetricKind, MetricValue, PoolCounters, PoolMetric, PoolStatistics,
    PoolStatisticsAggregator, StatisticsSnapshot,
};

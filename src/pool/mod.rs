//! Partitioned connection pooling.
//!
//! A [`PoolManager`] owns one [`SubPool`] per [`PartitionKey`]. Connections
//! never move between partitions.

pub mod connection;
pub mod key;
pub mod manager;
pub mod slot;
pub mod sub_pool;

pub use connection::PooledConnection;
pub use key::PartitionKey;
pub use manager::PoolManager;
pub use slot::{SlotCounts, SlotState};
pub use sub_pool::{EvictionReport, PendingAcquire, ShutdownReport, SubPool};

//! Partitioned connection pooling for resource adapters.
//!
//! Connections are grouped by [`pool::PartitionKey`]: callers with different
//! identities or request parameters never share a physical connection. The
//! crate also carries the introspectable [`statistics`] surface, the
//! [`recovery`] coordinator queried during transaction crash recovery and the
//! [`metadata`] value objects read from adapter descriptors.

pub mod config;
pub mod error;
pub mod factory;
pub mod metadata;
pub mod pool;
pub mod prelude;
pub mod recovery;
pub mod statistics;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::PoolConfig;
pub use error::ConnectorPoolError;
pub use factory::ConnectionFactory;
pub use pool::{PartitionKey, PoolManager, PooledConnection};

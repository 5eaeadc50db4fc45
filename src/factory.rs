use async_trait::async_trait;

use crate::error::ConnectorPoolError;
use crate::pool::PartitionKey;

/// Opens, closes and checks physical connections for the pool.
///
/// The pool never looks inside a connection; everything it needs goes
/// through these three calls.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new physical connection for `key`.
    ///
    /// # Errors
    /// Any error is treated as a failed allocation and may be retried.
    async fn create(&self, key: &PartitionKey) -> Result<Self::Connection, ConnectorPoolError>;

    /// Close a physical connection.
    ///
    /// # Errors
    /// Errors are collected and logged by the pool, never propagated to callers
    /// of `release`, eviction or shutdown.
    async fn destroy(&self, conn: Self::Connection) -> Result<(), ConnectorPoolError>;

    /// Check that a connection is still usable.
    async fn validate(&self, conn: &mut Self::Connection) -> bool;
}

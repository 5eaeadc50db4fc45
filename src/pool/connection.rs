use std::fmt;
use std::sync::Weak;

use super::key::PartitionKey;

/// Identity of one lease, carried from acquire to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lease {
    pub(crate) pool_id: u64,
    pub(crate) slot_id: u64,
    /// statistics epoch of the slot's creation
    pub(crate) slot_epoch: u64,
    /// statistics epoch of the acquire
    pub(crate) lease_epoch: u64,
}

/// Where a dropped, unreleased connection goes.
pub(crate) trait LeaseOwner<C>: Send + Sync {
    fn abandon(&self, lease: Lease, conn: C);
}

/// A connection leased from a partition.
///
/// Hand it back with [`crate::pool::PoolManager::release`]. Dropping it
/// without releasing frees the lease and destroys the connection.
pub struct PooledConnection<C: Send + 'static> {
    key: PartitionKey,
    lease: Lease,
    conn: Option<C>,
    owner: Weak<dyn LeaseOwner<C>>,
}

impl<C: Send + 'static> PooledConnection<C> {
    pub(crate) fn new(
        key: PartitionKey,
        lease: Lease,
        conn: C,
        owner: Weak<dyn LeaseOwner<C>>,
    ) -> Self {
        Self {
            key,
            lease,
            conn: Some(conn),
            owner,
        }
    }

    /// Partition this connection belongs to.
    #[must_use]
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// Slot id, unique within the partition.
    #[must_use]
    pub fn slot_id(&self) -> u64 {
        self.lease.slot_id
    }

    /// Take the pieces out; the handle's `Drop` then has nothing to do.
    pub(crate) fn into_parts(mut self) -> Option<(PartitionKey, Lease, C)> {
        let conn = self.conn.take()?;
        Some((std::mem::take(&mut self.key), self.lease, conn))
    }
}

impl<C: Send + 'static> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl<C: Send + 'static> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl<C: Send + 'static> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("slot_id", &self.lease.slot_id)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Some(owner) = self.owner.upgrade() {
                owner.abandon(self.lease, conn);
            }
        }
    }
}

//! Crash-recovery surface for transactional resource adapters.
//!
//! A transaction manager's recovery pass asks the [`RecoveryCoordinator`]
//! for every live [`XaResource`] and then drives `recover`/`commit`/
//! `rollback` on each. Recovery itself lives in the transaction manager.

pub mod coordinator;
pub mod unit;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ConnectorPoolError;

pub use coordinator::RecoveryCoordinator;
pub use unit::{NoXaResources, NoopXaResourceRecovery, RecoveryUnit};

/// Global transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    #[must_use]
    pub fn new(format_id: i32, global_transaction_id: &[u8], branch_qualifier: &[u8]) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.to_vec(),
            branch_qualifier: branch_qualifier.to_vec(),
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Scan position for [`XaResource::recover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoverScan {
    Start,
    End,
    StartEnd,
    Continue,
}

/// One transactional resource as seen by the transaction manager.
#[async_trait]
pub trait XaResource: Send + Sync + fmt::Debug {
    fn resource_name(&self) -> &str;

    /// In-doubt branches this resource still holds.
    async fn recover(&self, scan: RecoverScan) -> Result<Vec<Xid>, ConnectorPoolError>;

    async fn commit(&self, xid: &Xid, one_phase: bool) -> Result<(), ConnectorPoolError>;

    async fn rollback(&self, xid: &Xid) -> Result<(), ConnectorPoolError>;

    async fn forget(&self, xid: &Xid) -> Result<(), ConnectorPoolError>;
}

pub type XaResourceHandle = Arc<dyn XaResource>;

/// Opens and closes the resources of one recovery unit.
#[async_trait]
pub trait XaResourceFactory: Send + Sync + 'static {
    /// # Errors
    /// Any error leaves the unit uninitialized; it may be retried.
    async fn open(
        &self,
        jndi_name: Option<&str>,
    ) -> Result<Vec<XaResourceHandle>, ConnectorPoolError>;

    /// # Errors
    /// Errors are logged; the unit is shut down regardless.
    async fn close(&self, resources: Vec<XaResourceHandle>) -> Result<(), ConnectorPoolError>;
}

/// Where a recovery unit is in its lifecycle. `Shutdown` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryState {
    Uninitialized,
    Active,
    Shutdown,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryState::Uninitialized => "uninitialized",
            RecoveryState::Active => "active",
            RecoveryState::Shutdown => "shutdown",
        })
    }
}

/// Per-adapter object the transaction manager queries during recovery.
#[async_trait]
pub trait XaResourceRecovery: Send + Sync {
    /// Obtain resources. A no-op once active.
    ///
    /// # Errors
    /// `InitializationError` when resources cannot be obtained (the unit
    /// stays uninitialized), `ShutdownError` after [`Self::shutdown`].
    async fn initialize(&self) -> Result<(), ConnectorPoolError>;

    /// Release held resources. Repeated calls do nothing.
    ///
    /// # Errors
    /// The resource close error of the first call, after the unit is
    /// already shut down.
    async fn shutdown(&self) -> Result<(), ConnectorPoolError>;

    /// Held resources when active, empty otherwise. Never blocks.
    fn get_xa_resources(&self) -> Vec<XaResourceHandle>;

    fn set_jndi_name(&self, name: &str);

    fn jndi_name(&self) -> Option<String>;

    fn state(&self) -> RecoveryState;
}

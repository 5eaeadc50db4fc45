use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{RecoveryState, XaResourceFactory, XaResourceHandle, XaResourceRecovery};
use crate::error::ConnectorPoolError;

#[derive(Debug)]
struct UnitState {
    state: RecoveryState,
    resources: Vec<XaResourceHandle>,
    jndi_name: Option<String>,
}

/// Recovery unit backed by an [`XaResourceFactory`].
///
/// Lifecycle calls are serialized by an async mutex; the state itself sits
/// behind a short-held `std::sync::Mutex` so `get_xa_resources` never waits
/// for an initialization in progress.
pub struct RecoveryUnit<R: XaResourceFactory> {
    factory: R,
    lifecycle: tokio::sync::Mutex<()>,
    inner: Mutex<UnitState>,
}

/// Recovery unit for adapters without XA support: never holds a resource.
pub type NoopXaResourceRecovery = RecoveryUnit<NoXaResources>;

/// Factory that opens nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoXaResources;

#[async_trait]
impl XaResourceFactory for NoXaResources {
    async fn open(
        &self,
        _jndi_name: Option<&str>,
    ) -> Result<Vec<XaResourceHandle>, ConnectorPoolError> {
        Ok(Vec::new())
    }

    async fn close(&self, _resources: Vec<XaResourceHandle>) -> Result<(), ConnectorPoolError> {
        Ok(())
    }
}

impl RecoveryUnit<NoXaResources> {
    #[must_use]
    pub fn noop() -> Self {
        Self::new(NoXaResources)
    }
}

impl<R: XaResourceFactory> RecoveryUnit<R> {
    #[must_use]
    pub fn new(factory: R) -> Self {
        Self {
            factory,
            lifecycle: tokio::sync::Mutex::new(()),
            inner: Mutex::new(UnitState {
                state: RecoveryState::Uninitialized,
                resources: Vec::new(),
                jndi_name: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UnitState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn display_name(&self) -> String {
        self.lock()
            .jndi_name
            .clone()
            .unwrap_or_else(|| "<unnamed>".to_string())
    }
}

impl<R: XaResourceFactory> std::fmt::Debug for RecoveryUnit<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("RecoveryUnit")
            .field("jndi_name", &inner.jndi_name)
            .field("state", &inner.state)
            .field("resources", &inner.resources.len())
            .finish()
    }
}

#[async_trait]
impl<R: XaResourceFactory> XaResourceRecovery for RecoveryUnit<R> {
    async fn initialize(&self) -> Result<(), ConnectorPoolError> {
        let _lifecycle = self.lifecycle.lock().await;
        let jndi_name = {
            let inner = self.lock();
            match inner.state {
                RecoveryState::Active => return Ok(()),
                RecoveryState::Shutdown => {
                    return Err(ConnectorPoolError::ShutdownError(format!(
                        "recovery unit {} is shut down",
                        inner.jndi_name.as_deref().unwrap_or("<unnamed>")
                    )));
                }
                RecoveryState::Uninitialized => inner.jndi_name.clone(),
            }
        };

        match self.factory.open(jndi_name.as_deref()).await {
            Ok(resources) => {
                let count = resources.len();
                let mut inner = self.lock();
                inner.resources = resources;
                inner.state = RecoveryState::Active;
                info!(
                    unit = jndi_name.as_deref().unwrap_or("<unnamed>"),
                    resources = count,
                    "recovery unit active"
                );
                Ok(())
            }
            Err(e) => {
                let name = jndi_name.as_deref().unwrap_or("<unnamed>");
                warn!(unit = name, "recovery unit failed to initialize: {e}");
                Err(ConnectorPoolError::InitializationError(format!(
                    "recovery unit {name}: {e}"
                )))
            }
        }
    }

    async fn shutdown(&self) -> Result<(), ConnectorPoolError> {
        let _lifecycle = self.lifecycle.lock().await;
        let resources = {
            let mut inner = self.lock();
            if inner.state == RecoveryState::Shutdown {
                return Ok(());
            }
            inner.state = RecoveryState::Shutdown;
            std::mem::take(&mut inner.resources)
        };
        debug!(unit = %self.display_name(), released = resources.len(), "recovery unit shut down");
        if resources.is_empty() {
            return Ok(());
        }
        self.factory.close(resources).await.inspect_err(|e| {
            warn!(unit = %self.display_name(), "failed to release recovery resources: {e}");
        })
    }

    fn get_xa_resources(&self) -> Vec<XaResourceHandle> {
        let inner = self.lock();
        match inner.state {
            RecoveryState::Active => inner.resources.clone(),
            RecoveryState::Uninitialized | RecoveryState::Shutdown => Vec::new(),
        }
    }

    fn set_jndi_name(&self, name: &str) {
        self.lock().jndi_name = Some(name.to_string());
    }

    fn jndi_name(&self) -> Option<String> {
        self.lock().jndi_name.clone()
    }

    fn state(&self) -> RecoveryState {
        self.lock().state
    }
}

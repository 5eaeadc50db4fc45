use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::{NoopXaResourceRecovery, RecoveryState, XaResourceHandle, XaResourceRecovery};
use crate::error::ConnectorPoolError;
use crate::metadata::OutboundResourceAdapter;

struct Registered {
    jndi_name: String,
    unit: Arc<dyn XaResourceRecovery>,
}

/// Tracks one recovery unit per deployed resource adapter, in registration
/// order.
#[derive(Default)]
pub struct RecoveryCoordinator {
    units: RwLock<Vec<Registered>>,
}

impl std::fmt::Debug for RecoveryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("units", &self.units())
            .finish()
    }
}

impl RecoveryCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, jndi_name: &str) -> Option<Arc<dyn XaResourceRecovery>> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.jndi_name == jndi_name)
            .map(|r| Arc::clone(&r.unit))
    }

    /// Name the unit, add it, then initialize it. A unit that fails to
    /// initialize stays registered so [`Self::retry_uninitialized`] can pick
    /// it up later.
    ///
    /// # Errors
    /// `ConfigError` if `jndi_name` is already registered; otherwise the
    /// unit's initialization error.
    pub async fn register(
        &self,
        jndi_name: &str,
        unit: Arc<dyn XaResourceRecovery>,
    ) -> Result<(), ConnectorPoolError> {
        {
            let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
            if units.iter().any(|r| r.jndi_name == jndi_name) {
                return Err(ConnectorPoolError::ConfigError(format!(
                    "recovery unit {jndi_name} is already registered"
                )));
            }
            unit.set_jndi_name(jndi_name);
            units.push(Registered {
                jndi_name: jndi_name.to_string(),
                unit: Arc::clone(&unit),
            });
        }
        debug!(unit = jndi_name, "registered recovery unit");
        unit.initialize().await
    }

    /// Register the recovery unit for a deployed adapter. Adapters with XA
    /// transaction support need `unit`; every other adapter gets a no-op unit.
    ///
    /// # Errors
    /// `ValidationError` for an adapter that fails validation,
    /// `ConfigError` for an XA adapter without a unit, plus anything
    /// [`Self::register`] reports.
    pub async fn activate_adapter(
        &self,
        jndi_name: &str,
        adapter: &OutboundResourceAdapter,
        unit: Option<Arc<dyn XaResourceRecovery>>,
    ) -> Result<(), ConnectorPoolError> {
        if !adapter.validation_as_boolean() {
            return Err(ConnectorPoolError::ValidationError(format!(
                "resource adapter {jndi_name} has no usable connection definition"
            )));
        }
        let unit = if adapter.transaction_support().needs_recovery() {
            unit.ok_or_else(|| {
                ConnectorPoolError::ConfigError(format!(
                    "XA resource adapter {jndi_name} needs a recovery unit"
                ))
            })?
        } else {
            if unit.is_some() {
                debug!(
                    unit = jndi_name,
                    support = adapter.transaction_support().as_str(),
                    "adapter needs no recovery, using a no-op unit"
                );
            }
            Arc::new(NoopXaResourceRecovery::noop())
        };
        self.register(jndi_name, unit).await
    }

    /// Shut the unit down and forget it.
    ///
    /// # Errors
    /// `NotFoundError` for an unknown name; otherwise the unit's shutdown error
    /// (the unit is removed either way).
    pub async fn deregister(&self, jndi_name: &str) -> Result<(), ConnectorPoolError> {
        let removed = {
            let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
            let idx = units.iter().position(|r| r.jndi_name == jndi_name);
            idx.map(|idx| units.remove(idx))
        };
        let Some(registered) = removed else {
            return Err(ConnectorPoolError::NotFoundError(format!(
                "recovery unit {jndi_name}"
            )));
        };
        debug!(unit = jndi_name, "deregistered recovery unit");
        registered.unit.shutdown().await
    }

    /// Initialize every unit still uninitialized. Returns the ones that
    /// failed again.
    pub async fn retry_uninitialized(&self) -> Vec<(String, ConnectorPoolError)> {
        let pending: Vec<(String, Arc<dyn XaResourceRecovery>)> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.unit.state() == RecoveryState::Uninitialized)
            .map(|r| (r.jndi_name.clone(), Arc::clone(&r.unit)))
            .collect();

        let mut failures = Vec::new();
        for (name, unit) in pending {
            if let Err(e) = unit.initialize().await {
                failures.push((name, e));
            }
        }
        failures
    }

    /// Resources of every active unit, in registration order.
    #[must_use]
    pub fn get_resources(&self) -> Vec<XaResourceHandle> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|r| r.unit.get_xa_resources())
            .collect()
    }

    #[must_use]
    pub fn unit(&self, jndi_name: &str) -> Option<Arc<dyn XaResourceRecovery>> {
        self.find(jndi_name)
    }

    /// Name and state of every unit, in registration order.
    #[must_use]
    pub fn units(&self) -> Vec<(String, RecoveryState)> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|r| (r.jndi_name.clone(), r.unit.state()))
            .collect()
    }

    /// Shut down and remove every unit. Returns the shutdown errors.
    pub async fn shutdown_all(&self) -> Vec<(String, ConnectorPoolError)> {
        let drained: Vec<Registered> = std::mem::take(
            &mut *self.units.write().unwrap_or_else(PoisonError::into_inner),
        );
        let count = drained.len();
        let mut failures = Vec::new();
        for registered in drained {
            if let Err(e) = registered.unit.shutdown().await {
                warn!(unit = %registered.jndi_name, "recovery unit shutdown failed: {e}");
                failures.push((registered.jndi_name, e));
            }
        }
        info!(units = count, failed = failures.len(), "recovery coordinator shut down");
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveryUnit;
    use crate::test_utils::MockXaResourceFactory;

    #[tokio::test]
    async fn duplicate_names_are_rejected() -> Result<(), ConnectorPoolError> {
        let coordinator = RecoveryCoordinator::new();
        coordinator
            .register("java:/eis/A", Arc::new(NoopXaResourceRecovery::noop()))
            .await?;
        let err = coordinator
            .register("java:/eis/A", Arc::new(NoopXaResourceRecovery::noop()))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectorPoolError::ConfigError(_)));
        assert_eq!(coordinator.units().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn deregister_shuts_the_unit_down() -> Result<(), ConnectorPoolError> {
        let coordinator = RecoveryCoordinator::new();
        let unit = Arc::new(RecoveryUnit::new(MockXaResourceFactory::with_resources(1)));
        coordinator.register("java:/eis/B", unit.clone()).await?;
        assert_eq!(coordinator.get_resources().len(), 1);

        coordinator.deregister("java:/eis/B").await?;
        assert_eq!(unit.state(), RecoveryState::Shutdown);
        assert!(coordinator.get_resources().is_empty());
        assert!(matches!(
            coordinator.deregister("java:/eis/B").await,
            Err(ConnectorPoolError::NotFoundError(_))
        ));
        Ok(())
    }
}

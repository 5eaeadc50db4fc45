use std::sync::Arc;

use connector_pool::ConnectorPoolError;
use connector_pool::metadata::{ConnectionDefinition, OutboundResourceAdapter, TransactionSupport};
use connector_pool::recovery::{
    NoopXaResourceRecovery, RecoverScan, RecoveryCoordinator, RecoveryState, RecoveryUnit,
    XaResource, XaResourceRecovery,
};
use connector_pool::test_utils::MockXaResourceFactory;

fn adapter(support: Option<TransactionSupport>) -> OutboundResourceAdapter {
    OutboundResourceAdapter {
        connection_definitions: vec![ConnectionDefinition {
            id: None,
            managed_connection_factory_class: "org.example.OrdersMcf".into(),
            connection_factory_interface: "org.example.OrdersFactory".into(),
            connection_interface: "org.example.OrdersConnection".into(),
        }],
        transaction_support: support,
        ..OutboundResourceAdapter::default()
    }
}

#[tokio::test(flavor = "current_thread")]
async fn uninitialized_unit_returns_no_resources() {
    let unit = RecoveryUnit::new(MockXaResourceFactory::with_resources(3));
    assert_eq!(unit.state(), RecoveryState::Uninitialized);
    assert!(unit.get_xa_resources().is_empty());
    assert!(unit.get_xa_resources().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn noop_unit_stays_empty_and_shuts_down_twice() -> Result<(), ConnectorPoolError> {
    let unit = NoopXaResourceRecovery::noop();
    unit.initialize().await?;
    assert!(unit.get_xa_resources().is_empty());
    unit.shutdown().await?;
    unit.shutdown().await?;
    assert_eq!(unit.state(), RecoveryState::Shutdown);
    assert!(unit.get_xa_resources().is_empty());
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn resources_come_back_in_registration_order() -> Result<(), ConnectorPoolError> {
    let coordinator = RecoveryCoordinator::new();
    coordinator
        .register(
            "java:/eis/Orders",
            Arc::new(RecoveryUnit::new(MockXaResourceFactory::with_resources(2))),
        )
        .await?;
    coordinator
        .register("java:/eis/Mail", Arc::new(NoopXaResourceRecovery::noop()))
        .await?;
    coordinator
        .register(
            "java:/eis/Billing",
            Arc::new(RecoveryUnit::new(MockXaResourceFactory::with_resources(1))),
        )
        .await?;

    let names: Vec<String> = coordinator
        .get_resources()
        .iter()
        .map(|r| r.resource_name().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "java:/eis/Orders#0",
            "java:/eis/Orders#1",
            "java:/eis/Billing#0"
        ]
    );

    // a recovery pass resolves the in-doubt branches
    for resource in coordinator.get_resources() {
        for xid in resource.recover(RecoverScan::StartEnd).await? {
            resource.rollback(&xid).await?;
        }
        assert!(resource.recover(RecoverScan::StartEnd).await?.is_empty());
    }
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn failed_registration_is_retried_later() -> Result<(), ConnectorPoolError> {
    let coordinator = RecoveryCoordinator::new();
    let factory = MockXaResourceFactory::with_resources(1);
    factory.fail_next_opens(1);

    let err = coordinator
        .register("java:/eis/Orders", Arc::new(RecoveryUnit::new(factory)))
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorPoolError::InitializationError(_)));
    assert_eq!(
        coordinator.units(),
        vec![("java:/eis/Orders".to_string(), RecoveryState::Uninitialized)]
    );
    assert!(coordinator.get_resources().is_empty());

    let failures = coordinator.retry_uninitialized().await;
    assert!(failures.is_empty());
    assert_eq!(coordinator.get_resources().len(), 1);
    assert_eq!(
        coordinator.unit("java:/eis/Orders").map(|u| u.state()),
        Some(RecoveryState::Active)
    );
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn adapters_get_units_by_transaction_support() -> Result<(), ConnectorPoolError> {
    let coordinator = RecoveryCoordinator::new();

    let xa_unit: Arc<dyn XaResourceRecovery> =
        Arc::new(RecoveryUnit::new(MockXaResourceFactory::with_resources(2)));
    coordinator
        .activate_adapter(
            "java:/eis/Xa",
            &adapter(Some(TransactionSupport::XaTransaction)),
            Some(xa_unit),
        )
        .await?;

    // a local-only adapter ignores the unit it is given
    let ignored: Arc<dyn XaResourceRecovery> =
        Arc::new(RecoveryUnit::new(MockXaResourceFactory::with_resources(5)));
    coordinator
        .activate_adapter(
            "java:/eis/Local",
            &adapter(Some(TransactionSupport::LocalTransaction)),
            Some(ignored),
        )
        .await?;
    coordinator
        .activate_adapter("java:/eis/Plain", &adapter(None), None)
        .await?;
    assert_eq!(coordinator.get_resources().len(), 2);

    let err = coordinator
        .activate_adapter(
            "java:/eis/Broken",
            &adapter(Some(TransactionSupport::XaTransaction)),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ConfigError(_)));

    let err = coordinator
        .activate_adapter(
            "java:/eis/Empty",
            &OutboundResourceAdapter::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ValidationError(_)));

    let failures = coordinator.shutdown_all().await;
    assert!(failures.is_empty());
    assert!(coordinator.units().is_empty());
    assert!(coordinator.get_resources().is_empty());
    Ok(())
}

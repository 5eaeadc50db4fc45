use std::time::Duration;

use connector_pool::ConnectorPoolError;
use connector_pool::config::PoolConfig;
use connector_pool::metadata::TimeoutSettings;
use connector_pool::pool::{PartitionKey, PoolManager};
use connector_pool::test_utils::MockConnectionFactory;

#[tokio::test(flavor = "current_thread")]
async fn descriptor_timeouts_drive_the_pool() -> Result<(), ConnectorPoolError> {
    let settings = TimeoutSettings::from_elements([
        ("blocking-timeout-millis", "40"),
        ("idle-timeout-minutes", "5"),
        ("allocation-retry", "1"),
        ("allocation-retry-wait-millis", "5"),
        ("vendor-extension", "ignored"),
    ])?;
    let mut config = PoolConfig::from_timeout_settings(&settings);
    config.max_size = 1;
    assert_eq!(config.idle_timeout, Duration::from_secs(300));
    assert_eq!(config.eviction_interval, Duration::from_secs(150));

    let manager = PoolManager::new(config, MockConnectionFactory::new())?;
    let key = PartitionKey::for_subject("scott");

    // one failed create is absorbed by the single retry
    manager.factory().fail_next_creates(1);
    let held = manager.get(&key).await?;

    // the descriptor's blocking timeout bounds `get`
    let err = manager.get(&key).await.unwrap_err();
    assert!(err.is_timed_out());
    manager.release(held).await?;
    Ok(())
}

#[test]
fn json_config_rejects_bad_values() {
    let err = PoolConfig::from_json_str(r#"{ "min_size": 5, "max_size": 2 }"#).unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ConfigError(_)));

    let err = PoolConfig::from_json_str(r#"{ "max_pool": 2 }"#).unwrap_err();
    assert!(matches!(err, ConnectorPoolError::JsonError(_)));

    let err = PoolManager::new(
        PoolConfig::builder().max_size(0).finish(),
        MockConnectionFactory::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ConfigError(_)));
}

#[test]
fn malformed_timeout_element_is_a_validation_error() {
    let err = TimeoutSettings::from_elements([("blocking-timeout-millis", "soon")]).unwrap_err();
    assert!(matches!(err, ConnectorPoolError::ValidationError(_)));
}

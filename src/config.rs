use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorPoolError;
use crate::metadata::TimeoutSettings;

/// Per-partition pool settings, shared read-only by every SubPool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections a partition keeps open even when idle
    pub min_size: usize,
    /// Upper bound on connections per partition
    pub max_size: usize,
    /// Default wait bound for [`crate::pool::PoolManager::get`]
    pub blocking_timeout: Duration,
    /// Idle connections older than this are destroyed by the sweep
    pub idle_timeout: Duration,
    /// Validate an idle connection before handing it out
    pub validate_on_match: bool,
    /// Extra attempts after a failed `ConnectionFactory::create`
    pub allocation_retry: u32,
    /// Pause between create attempts
    pub allocation_retry_wait: Duration,
    /// An empty partition untouched for this long is dropped
    pub partition_idle_window: Duration,
    /// Period of the background sweep
    pub eviction_interval: Duration,
    /// Open `min_size` connections as soon as a partition is created
    pub prefill: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 20,
            blocking_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30 * 60),
            validate_on_match: false,
            allocation_retry: 0,
            allocation_retry_wait: Duration::from_millis(5000),
            partition_idle_window: Duration::from_secs(30 * 60),
            eviction_interval: Duration::from_secs(15 * 60),
            prefill: false,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Reject settings no pool can honour.
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ConfigError` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConnectorPoolError> {
        if self.max_size == 0 {
            return Err(ConnectorPoolError::ConfigError(
                "max_size must be at least 1".into(),
            ));
        }
        if self.min_size > self.max_size {
            return Err(ConnectorPoolError::ConfigError(format!(
                "min_size {} exceeds max_size {}",
                self.min_size, self.max_size
            )));
        }
        if self.blocking_timeout.is_zero() {
            return Err(ConnectorPoolError::ConfigError(
                "blocking_timeout must be greater than zero".into(),
            ));
        }
        if self.eviction_interval.is_zero() {
            return Err(ConnectorPoolError::ConfigError(
                "eviction_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Overlay descriptor timeout settings on the defaults.
    ///
    /// The sweep runs at half the idle timeout, but never more often than once
    /// a second.
    #[must_use]
    pub fn from_timeout_settings(settings: &TimeoutSettings) -> Self {
        let mut config = Self::default();
        if let Some(ms) = settings.blocking_timeout_millis {
            config.blocking_timeout = Duration::from_millis(ms);
        }
        if let Some(minutes) = settings.idle_timeout_minutes {
            config.idle_timeout = Duration::from_secs(minutes.saturating_mul(60));
            config.partition_idle_window = config.idle_timeout;
            config.eviction_interval = (config.idle_timeout / 2).max(Duration::from_secs(1));
        }
        if let Some(retry) = settings.allocation_retry {
            config.allocation_retry = retry;
        }
        if let Some(ms) = settings.allocation_retry_wait_millis {
            config.allocation_retry_wait = Duration::from_millis(ms);
        }
        config
    }

    /// Load a configuration from JSON. Durations are given in milliseconds and
    /// every field is optional.
    ///
    /// ```rust
    /// use connector_pool::config::PoolConfig;
    ///
    /// let cfg = PoolConfig::from_json_str(r#"{ "max_size": 4, "blocking_timeout_millis": 250 }"#)?;
    /// assert_eq!(cfg.max_size, 4);
    /// # Ok::<(), connector_pool::ConnectorPoolError>(())
    /// ```
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::JsonError` for malformed input and
    /// `ConnectorPoolError::ConfigError` if the values fail [`Self::validate`].
    pub fn from_json_str(json: &str) -> Result<Self, ConnectorPoolError> {
        let file: PoolConfigFile = serde_json::from_str(json)?;
        let config = Self::from(file);
        config.validate()?;
        Ok(config)
    }
}

/// On-disk shape of [`PoolConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfigFile {
    pub min_size: usize,
    pub max_size: usize,
    pub blocking_timeout_millis: u64,
    pub idle_timeout_millis: u64,
    pub validate_on_match: bool,
    pub allocation_retry: u32,
    pub allocation_retry_wait_millis: u64,
    pub partition_idle_window_millis: u64,
    pub eviction_interval_millis: u64,
    pub prefill: bool,
}

impl Default for PoolConfigFile {
    fn default() -> Self {
        PoolConfig::default().into()
    }
}

impl From<PoolConfigFile> for PoolConfig {
    fn from(file: PoolConfigFile) -> Self {
        Self {
            min_size: file.min_size,
            max_size: file.max_size,
            blocking_timeout: Duration::from_millis(file.blocking_timeout_millis),
            idle_timeout: Duration::from_millis(file.idle_timeout_millis),
            validate_on_match: file.validate_on_match,
            allocation_retry: file.allocation_retry,
            allocation_retry_wait: Duration::from_millis(file.allocation_retry_wait_millis),
            partition_idle_window: Duration::from_millis(file.partition_idle_window_millis),
            eviction_interval: Duration::from_millis(file.eviction_interval_millis),
            prefill: file.prefill,
        }
    }
}

impl From<PoolConfig> for PoolConfigFile {
    fn from(config: PoolConfig) -> Self {
        Self {
            min_size: config.min_size,
            max_size: config.max_size,
            blocking_timeout_millis: millis(config.blocking_timeout),
            idle_timeout_millis: millis(config.idle_timeout),
            validate_on_match: config.validate_on_match,
            allocation_retry: config.allocation_retry,
            allocation_retry_wait_millis: millis(config.allocation_retry_wait),
            partition_idle_window_millis: millis(config.partition_idle_window),
            eviction_interval_millis: millis(config.eviction_interval),
            prefill: config.prefill,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Fluent builder for [`PoolConfig`].
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn min_size(mut self, size: usize) -> Self {
        self.config.min_size = size;
        self
    }

    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    #[must_use]
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.config.blocking_timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn validate_on_match(mut self, validate: bool) -> Self {
        self.config.validate_on_match = validate;
        self
    }

    #[must_use]
    pub fn allocation_retry(mut self, retries: u32, wait: Duration) -> Self {
        self.config.allocation_retry = retries;
        self.config.allocation_retry_wait = wait;
        self
    }

    #[must_use]
    pub fn partition_idle_window(mut self, window: Duration) -> Self {
        self.config.partition_idle_window = window;
        self
    }

    #[must_use]
    pub fn eviction_interval(mut self, interval: Duration) -> Self {
        self.config.eviction_interval = interval;
        self
    }

    #[must_use]
    pub fn prefill(mut self, prefill: bool) -> Self {
        self.config.prefill = prefill;
        self
    }

    /// Return the configuration without validating it.
    #[must_use]
    pub fn finish(self) -> PoolConfig {
        self.config
    }

    /// Return the configuration after [`PoolConfig::validate`].
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ConfigError` for invalid settings.
    pub fn build(self) -> Result<PoolConfig, ConnectorPoolError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

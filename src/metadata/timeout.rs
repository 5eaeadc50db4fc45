use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConnectorPoolError;

/// Element names of a `timeout` descriptor section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutTag {
    /// Any element name this crate does not know.
    Unknown,
    BlockingTimeoutMillis,
    IdleTimeoutMinutes,
    SetTxQueryTimeout,
    QueryTimeout,
    UseTryLock,
    AllocationRetry,
    XaResourceTimeout,
    AllocationRetryWaitMillis,
}

impl TimeoutTag {
    /// Every known tag, in descriptor order.
    pub const KNOWN: [TimeoutTag; 8] = [
        TimeoutTag::BlockingTimeoutMillis,
        TimeoutTag::IdleTimeoutMinutes,
        TimeoutTag::SetTxQueryTimeout,
        TimeoutTag::QueryTimeout,
        TimeoutTag::UseTryLock,
        TimeoutTag::AllocationRetry,
        TimeoutTag::XaResourceTimeout,
        TimeoutTag::AllocationRetryWaitMillis,
    ];

    /// The descriptor element name, `None` for [`TimeoutTag::Unknown`].
    #[must_use]
    pub fn local_name(self) -> Option<&'static str> {
        match self {
            TimeoutTag::Unknown => None,
            TimeoutTag::BlockingTimeoutMillis => Some("blocking-timeout-millis"),
            TimeoutTag::IdleTimeoutMinutes => Some("idle-timeout-minutes"),
            TimeoutTag::SetTxQueryTimeout => Some("set-tx-query-timeout"),
            TimeoutTag::QueryTimeout => Some("query-timeout"),
            TimeoutTag::UseTryLock => Some("use-try-lock"),
            TimeoutTag::AllocationRetry => Some("allocation-retry"),
            TimeoutTag::XaResourceTimeout => Some("xa-resource-timeout"),
            TimeoutTag::AllocationRetryWaitMillis => Some("allocation-retry-wait-millis"),
        }
    }

    /// Reverse lookup; unmapped names yield [`TimeoutTag::Unknown`].
    #[must_use]
    pub fn for_name(local_name: &str) -> Self {
        match local_name {
            "blocking-timeout-millis" => TimeoutTag::BlockingTimeoutMillis,
            "idle-timeout-minutes" => TimeoutTag::IdleTimeoutMinutes,
            "set-tx-query-timeout" => TimeoutTag::SetTxQueryTimeout,
            "query-timeout" => TimeoutTag::QueryTimeout,
            "use-try-lock" => TimeoutTag::UseTryLock,
            "allocation-retry" => TimeoutTag::AllocationRetry,
            "xa-resource-timeout" => TimeoutTag::XaResourceTimeout,
            "allocation-retry-wait-millis" => TimeoutTag::AllocationRetryWaitMillis,
            _ => TimeoutTag::Unknown,
        }
    }
}

impl fmt::Display for TimeoutTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.local_name().unwrap_or(""))
    }
}

/// Immutable timeout settings of one connection definition.
///
/// Fields left as `None` fall back to the pool defaults when converted with
/// [`crate::config::PoolConfig::from_timeout_settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    pub blocking_timeout_millis: Option<u64>,
    pub idle_timeout_minutes: Option<u64>,
    pub set_tx_query_timeout: bool,
    /// Seconds.
    pub query_timeout: Option<u64>,
    /// Seconds.
    pub use_try_lock: Option<u64>,
    pub allocation_retry: Option<u32>,
    pub allocation_retry_wait_millis: Option<u64>,
    /// Seconds.
    pub xa_resource_timeout: Option<u64>,
}

impl TimeoutSettings {
    /// Build settings from already-parsed `(element name, text)` pairs.
    ///
    /// Unknown element names are skipped.
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ValidationError` if a known element carries
    /// text that is not a valid value, or if the result fails [`Self::validate`].
    pub fn from_elements<'a, I>(elements: I) -> Result<Self, ConnectorPoolError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();
        for (name, text) in elements {
            let tag = TimeoutTag::for_name(name);
            if !settings.set(tag, text)? {
                tracing::debug!(element = name, "skipping unknown timeout element");
            }
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Apply one element. Returns `false` when `tag` is [`TimeoutTag::Unknown`].
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ValidationError` if `text` cannot be parsed.
    pub fn set(&mut self, tag: TimeoutTag, text: &str) -> Result<bool, ConnectorPoolError> {
        let text = text.trim();
        match tag {
            TimeoutTag::Unknown => return Ok(false),
            TimeoutTag::BlockingTimeoutMillis => {
                self.blocking_timeout_millis = Some(parse_number(tag, text)?);
            }
            TimeoutTag::IdleTimeoutMinutes => {
                self.idle_timeout_minutes = Some(parse_number(tag, text)?);
            }
            TimeoutTag::SetTxQueryTimeout => {
                // an empty element switches the flag on
                self.set_tx_query_timeout = match text {
                    "" | "true" => true,
                    "false" => false,
                    other => {
                        return Err(ConnectorPoolError::ValidationError(format!(
                            "{tag}: expected a boolean, got {other:?}"
                        )));
                    }
                };
            }
            TimeoutTag::QueryTimeout => self.query_timeout = Some(parse_number(tag, text)?),
            TimeoutTag::UseTryLock => self.use_try_lock = Some(parse_number(tag, text)?),
            TimeoutTag::AllocationRetry => {
                let retries: u64 = parse_number(tag, text)?;
                let retries = u32::try_from(retries).map_err(|_| {
                    ConnectorPoolError::ValidationError(format!("{tag}: {retries} is too large"))
                })?;
                self.allocation_retry = Some(retries);
            }
            TimeoutTag::XaResourceTimeout => {
                self.xa_resource_timeout = Some(parse_number(tag, text)?);
            }
            TimeoutTag::AllocationRetryWaitMillis => {
                self.allocation_retry_wait_millis = Some(parse_number(tag, text)?);
            }
        }
        Ok(true)
    }

    /// Check the settings for values no pool can honour.
    ///
    /// # Errors
    /// Returns `ConnectorPoolError::ValidationError` naming the offending element.
    pub fn validate(&self) -> Result<(), ConnectorPoolError> {
        if self.blocking_timeout_millis == Some(0) {
            return Err(ConnectorPoolError::ValidationError(format!(
                "{} must be greater than zero",
                TimeoutTag::BlockingTimeoutMillis
            )));
        }
        if self.allocation_retry_wait_millis == Some(0) && self.allocation_retry.unwrap_or(0) > 0 {
            return Err(ConnectorPoolError::ValidationError(format!(
                "{} must be greater than zero when {} is set",
                TimeoutTag::AllocationRetryWaitMillis,
                TimeoutTag::AllocationRetry
            )));
        }
        Ok(())
    }
}

fn parse_number(tag: TimeoutTag, text: &str) -> Result<u64, ConnectorPoolError> {
    text.parse::<u64>().map_err(|e| {
        ConnectorPoolError::ValidationError(format!("{tag}: invalid number {text:?}: {e}"))
    })
}

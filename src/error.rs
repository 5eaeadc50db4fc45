use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorPoolError {
    #[error("Timed out after {waited_ms}ms waiting for a connection in partition {partition}")]
    TimedOut { partition: String, waited_ms: u64 },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Pool exhausted: {0}")]
    ExhaustedError(String),

    #[error("Partition not found: {0}")]
    NotFoundError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shut down: {0}")]
    ShutdownError(String),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl ConnectorPoolError {
    /// True for the error an acquire reports when its wait bound elapsed.
    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

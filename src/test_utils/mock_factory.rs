use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ConnectorPoolError;
use crate::factory::ConnectionFactory;
use crate::pool::PartitionKey;

/// Fake physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConnection {
    pub id: u64,
    pub key: PartitionKey,
    /// Set to make the next validation fail
    pub broken: bool,
}

/// Counts every factory call and fails on demand.
#[derive(Debug, Default)]
pub struct MockConnectionFactory {
    next_id: AtomicU64,
    created: AtomicU64,
    destroyed: AtomicU64,
    validations: AtomicU64,
    failing_creates: AtomicUsize,
    fail_validation: AtomicBool,
    fail_destroy: AtomicBool,
    create_delay: Option<Duration>,
    validate_delay: Option<Duration>,
}

impl MockConnectionFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `create` sleeps for `delay` first.
    #[must_use]
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// Every `validate` sleeps for `delay` first.
    #[must_use]
    pub fn with_validate_delay(mut self, delay: Duration) -> Self {
        self.validate_delay = Some(delay);
        self
    }

    /// The next `n` calls to `create` fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn set_validation_fails(&self, fails: bool) {
        self.fail_validation.store(fails, Ordering::SeqCst);
    }

    pub fn set_destroy_fails(&self, fails: bool) {
        self.fail_destroy.store(fails, Ordering::SeqCst);
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// Calls to `destroy`, failed ones included.
    #[must_use]
    pub fn destroyed(&self) -> u64 {
        self.destroyed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn validations(&self) -> u64 {
        self.validations.load(Ordering::SeqCst)
    }

    /// Connections created and not yet destroyed.
    #[must_use]
    pub fn live(&self) -> u64 {
        self.created().saturating_sub(self.destroyed())
    }
}

#[async_trait]
impl ConnectionFactory for MockConnectionFactory {
    type Connection = MockConnection;

    async fn create(&self, key: &PartitionKey) -> Result<MockConnection, ConnectorPoolError> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ConnectorPoolError::ConnectionError(format!(
                "refusing to connect {key}"
            )));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            key: key.clone(),
            broken: false,
        })
    }

    async fn destroy(&self, conn: MockConnection) -> Result<(), ConnectorPoolError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            return Err(ConnectorPoolError::ConnectionError(format!(
                "close of connection {} failed",
                conn.id
            )));
        }
        Ok(())
    }

    async fn validate(&self, conn: &mut MockConnection) -> bool {
        if let Some(delay) = self.validate_delay {
            tokio::time::sleep(delay).await;
        }
        self.validations.fetch_add(1, Ordering::SeqCst);
        !conn.broken && !self.fail_validation.load(Ordering::SeqCst)
    }
}

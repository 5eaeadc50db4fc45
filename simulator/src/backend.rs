use std::time::Duration;

use connector_pool::ConnectorPoolError;
use connector_pool::config::PoolConfig;
use connector_pool::pool::{PartitionKey, PoolManager, PooledConnection};
use connector_pool::statistics::PoolStatistics;
use connector_pool::test_utils::{MockConnection, MockConnectionFactory};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::args::SimConfig;
use crate::model::{Op, PoolModel, TaskState};

/// Long enough to take an idle slot, short enough that a full partition
/// fails fast instead of stalling the run.
const ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub(crate) enum SimError {
    TimedOut,
    Exhausted,
    Pool(String),
}

impl From<ConnectorPoolError> for SimError {
    fn from(err: ConnectorPoolError) -> Self {
        match err {
            ConnectorPoolError::TimedOut { .. } => SimError::TimedOut,
            ConnectorPoolError::ExhaustedError(_) => SimError::Exhausted,
            other => SimError::Pool(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StepOutcome {
    pub(crate) result: Result<(), SimError>,
    pub(crate) conn_id: Option<u64>,
}

impl StepOutcome {
    fn ok(conn_id: Option<u64>) -> Self {
        Self {
            result: Ok(()),
            conn_id,
        }
    }
}

/// Drives a real [`PoolManager`] over the in-memory factory and mirrors
/// every successful step into a [`PoolModel`].
pub(crate) struct BackendShim {
    pub(crate) manager: PoolManager<MockConnectionFactory>,
    pub(crate) keys: Vec<PartitionKey>,
    pub(crate) model: PoolModel,
    handles: Vec<Option<PooledConnection<MockConnection>>>,
    config: SimConfig,
}

impl BackendShim {
    pub(crate) fn new(config: SimConfig) -> Result<Self, ConnectorPoolError> {
        let pool_config = PoolConfig::builder()
            .min_size(config.min_size)
            .max_size(config.pool_size)
            .idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .partition_idle_window(Duration::ZERO)
            .validate_on_match(config.validate_on_match)
            .build()?;
        let manager = PoolManager::new(pool_config, MockConnectionFactory::new())?;
        let keys = (0..config.partitions)
            .map(|i| PartitionKey::for_subject(format!("subject-{i}")))
            .collect();
        Ok(Self {
            manager,
            keys,
            model: PoolModel::new(config.partitions),
            handles: (0..config.tasks).map(|_| None).collect(),
            config,
        })
    }

    pub(crate) fn handle(&self, task_id: usize) -> Option<&PooledConnection<MockConnection>> {
        self.handles.get(task_id).and_then(Option::as_ref)
    }

    pub(crate) async fn apply(
        &mut self,
        task: &mut TaskState,
        op: Op,
        rng: &mut ChaCha8Rng,
    ) -> Result<StepOutcome, String> {
        match op {
            Op::Sleep(_) => Ok(StepOutcome::ok(self.conn_id(task))),
            Op::Acquire(partition) => self.acquire(task, partition, rng).await,
            Op::Release => self.release(task, false).await,
            Op::ReleaseBroken => self.release(task, true).await,
            Op::Abandon => self.abandon(task),
            Op::Evict => {
                let report = self.manager.evict_idle().await;
                tracing::debug!(
                    evicted = report.evicted,
                    refilled = report.refilled,
                    "evict"
                );
                Ok(StepOutcome::ok(None))
            }
            Op::Sweep => {
                let (_, removed) = self.manager.sweep().await;
                tracing::debug!(removed, "sweep");
                Ok(StepOutcome::ok(None))
            }
            Op::ToggleStatistics => {
                self.model.statistics_enabled = !self.model.statistics_enabled;
                self.manager
                    .statistics()
                    .set_enabled(self.model.statistics_enabled);
                Ok(StepOutcome::ok(None))
            }
            Op::ClearStatistics => {
                self.manager.statistics().clear();
                Ok(StepOutcome::ok(None))
            }
        }
    }

    fn conn_id(&self, task: &TaskState) -> Option<u64> {
        self.handle(task.id).map(|conn| conn.id)
    }

    async fn acquire(
        &mut self,
        task: &mut TaskState,
        partition: usize,
        rng: &mut ChaCha8Rng,
    ) -> Result<StepOutcome, String> {
        if task.partition.is_some() {
            return Err(format!("task {} attempted double checkout", task.id));
        }
        let key = self
            .keys
            .get(partition)
            .ok_or_else(|| format!("partition {partition} out of range"))?;
        if rng.random::<f64>() < self.config.create_failure_rate {
            self.manager.factory().fail_next_creates(1);
        }
        let conn = match self.manager.acquire(key, ACQUIRE_TIMEOUT).await {
            Ok(conn) => conn,
            Err(err) => {
                self.manager.factory().fail_next_creates(0);
                return Ok(StepOutcome {
                    result: Err(err.into()),
                    conn_id: None,
                });
            }
        };
        self.manager.factory().fail_next_creates(0);
        if conn.key() != key {
            return Err(format!("lease for {key} came from {}", conn.key()));
        }
        let conn_id = conn.id;
        self.handles[task.id] = Some(conn);
        self.model.lease(task, partition);
        Ok(StepOutcome::ok(Some(conn_id)))
    }

    async fn release(&mut self, task: &mut TaskState, broken: bool) -> Result<StepOutcome, String> {
        let mut conn = self.handles[task.id]
            .take()
            .ok_or_else(|| format!("task {} released without a checkout", task.id))?;
        self.model.unlease(task);
        conn.broken = broken;
        let conn_id = conn.id;
        let result = self.manager.release(conn).await.map_err(SimError::from);
        if let Err(err) = &result {
            // the handle still had an active slot, so its partition must exist
            return Err(format!("release of conn {conn_id} failed: {err:?}"));
        }
        Ok(StepOutcome {
            result,
            conn_id: Some(conn_id),
        })
    }

    fn abandon(&mut self, task: &mut TaskState) -> Result<StepOutcome, String> {
        let conn = self.handles[task.id]
            .take()
            .ok_or_else(|| format!("task {} abandoned without a checkout", task.id))?;
        self.model.unlease(task);
        let conn_id = conn.id;
        drop(conn);
        Ok(StepOutcome::ok(Some(conn_id)))
    }
}

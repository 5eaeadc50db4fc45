use connector_pool::statistics::PoolStatistics;

use crate::backend::BackendShim;
use crate::model::TaskState;

pub(crate) struct Oracle;

impl Oracle {
    pub(crate) fn check(tasks: &[TaskState], backend: &BackendShim) -> Result<(), String> {
        let manager = &backend.manager;
        let max_size = manager.config().max_size;
        let mut parked = 0u64;

        for (partition, key) in backend.keys.iter().enumerate() {
            let expected = backend.model.held[partition];
            let Some(pool) = manager.partition(key) else {
                if expected > 0 {
                    return Err(format!(
                        "partition {key} removed while {expected} leases are out"
                    ));
                }
                continue;
            };
            let counts = pool.slot_counts();
            if counts.live() > max_size {
                return Err(format!(
                    "partition {key} holds {} live connections, max is {max_size}",
                    counts.live()
                ));
            }
            if counts.active != expected {
                return Err(format!(
                    "partition {key} reports {} active, {expected} handles are out",
                    counts.active
                ));
            }
            if pool.statistics().is_enabled() != backend.model.statistics_enabled {
                return Err(format!("partition {key} missed a statistics toggle"));
            }
            parked += (counts.idle + counts.active) as u64;
        }

        let factory = manager.factory();
        if factory.created() < factory.destroyed() {
            return Err(format!(
                "destroyed {} connections but only created {}",
                factory.destroyed(),
                factory.created()
            ));
        }
        if factory.live() < parked {
            return Err(format!(
                "pool tracks {parked} connections, factory has {} open",
                factory.live()
            ));
        }
        if manager.statistics().is_enabled() != backend.model.statistics_enabled {
            return Err("aggregate statistics flag out of sync".to_string());
        }

        for task in tasks {
            match (task.partition, backend.handle(task.id)) {
                (Some(partition), Some(conn)) => {
                    if conn.key() != &backend.keys[partition] {
                        return Err(format!(
                            "task {} holds conn {} from {}, expected {}",
                            task.id,
                            conn.id,
                            conn.key(),
                            backend.keys[partition]
                        ));
                    }
                }
                (None, None) => {}
                (Some(_), None) => {
                    return Err(format!("task {} lost its handle", task.id));
                }
                (None, Some(conn)) => {
                    return Err(format!(
                        "task {} holds conn {} it never leased",
                        task.id, conn.id
                    ));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Acquire(usize),
    Release,
    /// Mark the leased connection broken, then release it
    ReleaseBroken,
    /// Drop the handle without releasing it
    Abandon,
    Evict,
    Sweep,
    ToggleStatistics,
    ClearStatistics,
    Sleep(u64),
}

#[derive(Debug, Clone)]
pub(crate) struct TaskState {
    pub(crate) id: usize,
    /// Partition the task currently holds a lease in
    pub(crate) partition: Option<usize>,
}

/// What the pool should look like from the outside.
#[derive(Debug, Clone)]
pub(crate) struct PoolModel {
    pub(crate) held: Vec<usize>,
    pub(crate) statistics_enabled: bool,
}

impl PoolModel {
    pub(crate) fn new(partitions: usize) -> Self {
        Self {
            held: vec![0; partitions],
            statistics_enabled: true,
        }
    }

    pub(crate) fn lease(&mut self, task: &mut TaskState, partition: usize) {
        self.held[partition] += 1;
        task.partition = Some(partition);
    }

    pub(crate) fn unlease(&mut self, task: &mut TaskState) -> Option<usize> {
        let partition = task.partition.take()?;
        self.held[partition] = self.held[partition].saturating_sub(1);
        Some(partition)
    }
}

use std::collections::BTreeMap;

use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Picks which task runs next. Time is simulated: sleeping tasks are parked
/// until the clock reaches their wake-up time, nothing actually sleeps.
pub(crate) struct Scheduler {
    ready: Vec<usize>,
    parked: BTreeMap<u64, Vec<usize>>,
    pub(crate) now_ms: u64,
}

impl Scheduler {
    pub(crate) fn new(task_count: usize) -> Self {
        Self {
            ready: (0..task_count).collect(),
            parked: BTreeMap::new(),
            now_ms: 0,
        }
    }

    pub(crate) fn sleep(&mut self, task_id: usize, duration_ms: u64) {
        let wake_at = self.now_ms.saturating_add(duration_ms.max(1));
        self.parked.entry(wake_at).or_default().push(task_id);
    }

    pub(crate) fn advance_time(&mut self, elapsed_ms: u64) {
        self.now_ms = self.now_ms.saturating_add(elapsed_ms.max(1));
        self.wake_due();
    }

    pub(crate) fn next_ready(&mut self, rng: &mut ChaCha8Rng) -> Option<usize> {
        if self.ready.is_empty() {
            let (wake_at, mut tasks) = self.parked.pop_first()?;
            self.now_ms = self.now_ms.max(wake_at);
            self.ready.append(&mut tasks);
            self.wake_due();
        }
        let idx = rng.random_range(0..self.ready.len());
        Some(self.ready.swap_remove(idx))
    }

    pub(crate) fn mark_ready(&mut self, task_id: usize) {
        self.ready.push(task_id);
    }

    fn wake_due(&mut self) {
        while let Some(entry) = self.parked.first_entry() {
            if *entry.key() > self.now_ms {
                break;
            }
            self.ready.append(&mut entry.remove());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn parked_task_wakes_when_nothing_else_is_ready() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut scheduler = Scheduler::new(1);
        let task = scheduler.next_ready(&mut rng);
        assert_eq!(task, Some(0));
        scheduler.sleep(0, 20);
        assert_eq!(scheduler.next_ready(&mut rng), Some(0));
        assert_eq!(scheduler.now_ms, 20);
        assert_eq!(scheduler.next_ready(&mut rng), None);
    }
}

use std::collections::{HashMap, VecDeque};

use tokio::time::Instant;

/// Lifecycle of one physical connection inside a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Parked in the partition, available to the next acquire
    Idle,
    /// Handed out to exactly one caller
    Active,
    /// Out of the idle set while the factory checks it
    Validating,
    /// Being closed; no longer counts against `max_size`
    Destroying,
}

/// An idle connection, owned by the partition.
#[derive(Debug)]
pub(crate) struct ConnectionSlot<C> {
    pub(crate) id: u64,
    pub(crate) conn: C,
    pub(crate) last_used: Instant,
    /// statistics epoch at creation
    pub(crate) epoch: u64,
}

/// Everything a partition's mutex protects.
#[derive(Debug)]
pub(crate) struct SlotSet<C> {
    pub(crate) idle: VecDeque<ConnectionSlot<C>>,
    /// Slots whose connection is outside the idle set, by id
    pub(crate) out: HashMap<u64, SlotState>,
    pub(crate) creating: usize,
    pub(crate) last_activity: Instant,
}

impl<C> SlotSet<C> {
    pub(crate) fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            out: HashMap::new(),
            creating: 0,
            last_activity: Instant::now(),
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Connections that count against `max_size`: everything except slots
    /// already being destroyed.
    pub(crate) fn live_total(&self) -> usize {
        let out_live = self
            .out
            .values()
            .filter(|state| **state != SlotState::Destroying)
            .count();
        self.idle.len() + out_live + self.creating
    }

    /// No connection of any state and nothing being created.
    pub(crate) fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.out.is_empty() && self.creating == 0
    }

    pub(crate) fn set_state(&mut self, id: u64, state: SlotState) {
        if let Some(current) = self.out.get_mut(&id) {
            *current = state;
        }
    }

    pub(crate) fn count(&self, state: SlotState) -> usize {
        match state {
            SlotState::Idle => self.idle.len(),
            other => self.out.values().filter(|state| **state == other).count(),
        }
    }
}

/// Per-state slot counts of one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotCounts {
    pub idle: usize,
    pub active: usize,
    pub validating: usize,
    pub destroying: usize,
    pub creating: usize,
}

impl SlotCounts {
    pub(crate) fn of<C>(slots: &SlotSet<C>) -> Self {
        Self {
            idle: slots.count(SlotState::Idle),
            active: slots.count(SlotState::Active),
            validating: slots.count(SlotState::Validating),
            destroying: slots.count(SlotState::Destroying),
            creating: slots.creating,
        }
    }

    /// Connections counted against `max_size`.
    #[must_use]
    pub fn live(&self) -> usize {
        self.idle + self.active + self.validating + self.creating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroying_slots_do_not_count_as_live() {
        let mut slots: SlotSet<()> = SlotSet::new();
        slots.idle.push_back(ConnectionSlot {
            id: 1,
            conn: (),
            last_used: Instant::now(),
            epoch: 0,
        });
        slots.out.insert(2, SlotState::Active);
        slots.out.insert(3, SlotState::Destroying);
        slots.creating = 1;

        assert_eq!(slots.live_total(), 3);
        assert!(!slots.is_empty());

        let counts = SlotCounts::of(&slots);
        assert_eq!(counts.destroying, 1);
        assert_eq!(counts.live(), 3);

        slots.set_state(2, SlotState::Validating);
        assert_eq!(slots.count(SlotState::Validating), 1);
    }
}

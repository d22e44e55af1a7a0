//! Task scheduling policies.
//!
//! Policies are tagged variants with an inherent dispatcher - no trait
//! objects. Each variant owns only its own state and records the branch it
//! took in the event's [`RollbackFlags`], so the reverse path is O(1).

use crate::{Lpid, RollbackFlags, SimError};
use std::collections::VecDeque;

/// Cycles through the slave list in order, wrapping to zero.
///
/// The wrap is the only branch: it sets `C0` so the reverse knows whether to
/// decrement or to jump back to the last slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundRobin {
    next_index: usize,
}

impl RoundRobin {
    fn forward(
        &mut self,
        slaves: &[Lpid],
        flags: &mut RollbackFlags,
    ) -> Result<Lpid, SimError> {
        if slaves.is_empty() {
            return Err(SimError::NoTarget);
        }

        flags.remove(RollbackFlags::C0);
        let slave = slaves[self.next_index];
        self.next_index += 1;

        if self.next_index == slaves.len() {
            flags.insert(RollbackFlags::C0);
            self.next_index = 0;
        }

        Ok(slave)
    }

    fn reverse(&mut self, slaves: &[Lpid], flags: &mut RollbackFlags) -> Result<(), SimError> {
        if flags.contains(RollbackFlags::C0) {
            flags.remove(RollbackFlags::C0);
            self.next_index = slaves.len() - 1;
        } else {
            if self.next_index == 0 {
                return Err(SimError::PolicyViolation(
                    "round-robin reverse would underflow the selection index",
                ));
            }
            self.next_index -= 1;
        }
        Ok(())
    }
}

/// Dispatches to whichever machine returned a result most recently.
///
/// `free_machines` queues idle machines; the event's `freed_machine` field
/// feeds returning machines back in. `last_taken` stacks each selection so
/// the LIFO rollback order can restore the queue exactly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Workqueue {
    free_machines: VecDeque<Lpid>,
    last_taken: Vec<Lpid>,
}

impl Workqueue {
    fn init(&mut self, slaves: &[Lpid]) {
        self.free_machines.clear();
        self.free_machines.extend(slaves.iter().copied());
        self.last_taken.clear();
    }

    fn forward(&mut self, freed_machine: Option<Lpid>) -> Result<Lpid, SimError> {
        if let Some(returned) = freed_machine {
            self.free_machines.push_back(returned);
        }

        let machine = self.free_machines.pop_front().ok_or(SimError::NoTarget)?;
        self.last_taken.push(machine);
        Ok(machine)
    }

    /// Exact inverse of `forward`: undo the pop first, then the push.
    fn reverse(&mut self, freed_machine: Option<Lpid>) -> Result<(), SimError> {
        let taken = self
            .last_taken
            .pop()
            .ok_or(SimError::PolicyViolation("workqueue has no saved selection"))?;
        self.free_machines.push_front(taken);

        if let Some(returned) = freed_machine {
            match self.free_machines.pop_back() {
                Some(back) if back == returned => {}
                _ => {
                    return Err(SimError::PolicyViolation(
                        "workqueue tail does not match the returned machine",
                    ))
                }
            }
        }
        Ok(())
    }
}

/// A scheduling policy owned by a master or VMM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduler {
    RoundRobin(RoundRobin),
    Workqueue(Workqueue),
}

impl Scheduler {
    pub fn round_robin() -> Self {
        Self::RoundRobin(RoundRobin::default())
    }

    pub fn workqueue() -> Self {
        Self::Workqueue(Workqueue::default())
    }

    /// Reset policy state against the slave list.
    pub fn init(&mut self, slaves: &[Lpid]) {
        match self {
            Self::RoundRobin(rr) => rr.next_index = 0,
            Self::Workqueue(wq) => wq.init(slaves),
        }
    }

    /// Select the slave for the next task.
    ///
    /// `freed_machine` is the machine the triggering event reported as
    /// available again, if any; only the workqueue policy consumes it.
    pub fn forward_select(
        &mut self,
        slaves: &[Lpid],
        flags: &mut RollbackFlags,
        freed_machine: Option<Lpid>,
    ) -> Result<Lpid, SimError> {
        match self {
            Self::RoundRobin(rr) => rr.forward(slaves, flags),
            Self::Workqueue(wq) => wq.forward(freed_machine),
        }
    }

    /// Undo the matching `forward_select`.
    pub fn reverse_select(
        &mut self,
        slaves: &[Lpid],
        flags: &mut RollbackFlags,
        freed_machine: Option<Lpid>,
    ) -> Result<(), SimError> {
        match self {
            Self::RoundRobin(rr) => rr.reverse(slaves, flags),
            Self::Workqueue(wq) => wq.reverse(freed_machine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLAVES: [Lpid; 3] = [2, 4, 6];

    #[test]
    fn round_robin_cycles_and_marks_wrap() {
        let mut scheduler = Scheduler::round_robin();
        scheduler.init(&SLAVES);

        let mut picks = Vec::new();
        let mut wraps = Vec::new();

        for task in 1..=7 {
            let mut flags = RollbackFlags::NONE;
            picks.push(scheduler.forward_select(&SLAVES, &mut flags, None).unwrap());
            if flags.contains(RollbackFlags::C0) {
                wraps.push(task);
            }
        }

        assert_eq!(picks, vec![2, 4, 6, 2, 4, 6, 2]);
        assert_eq!(wraps, vec![3, 6]);
    }

    #[test]
    fn round_robin_reverse_restores_index() {
        let mut scheduler = Scheduler::round_robin();
        scheduler.init(&SLAVES);
        let snapshot = scheduler.clone();

        let mut history = Vec::new();
        for _ in 0..5 {
            let mut flags = RollbackFlags::NONE;
            let _ = scheduler.forward_select(&SLAVES, &mut flags, None).unwrap();
            history.push(flags);
        }

        for mut flags in history.into_iter().rev() {
            scheduler.reverse_select(&SLAVES, &mut flags, None).unwrap();
        }

        assert_eq!(scheduler, snapshot);
    }

    #[test]
    fn round_robin_empty_targets_fault() {
        let mut scheduler = Scheduler::round_robin();
        scheduler.init(&[]);
        let mut flags = RollbackFlags::NONE;

        let result = scheduler.forward_select(&[], &mut flags, None);
        assert!(matches!(result, Err(SimError::NoTarget)));
    }

    #[test]
    fn workqueue_feeds_back_returned_machines() {
        let mut scheduler = Scheduler::workqueue();
        scheduler.init(&SLAVES);
        let mut flags = RollbackFlags::NONE;

        let first = scheduler.forward_select(&SLAVES, &mut flags, None).unwrap();
        assert_eq!(first, 2);

        // Machine 2 returns; it goes to the back of the queue.
        let second = scheduler
            .forward_select(&SLAVES, &mut flags, Some(2))
            .unwrap();
        assert_eq!(second, 4);

        let third = scheduler.forward_select(&SLAVES, &mut flags, None).unwrap();
        assert_eq!(third, 6);

        let fourth = scheduler.forward_select(&SLAVES, &mut flags, None).unwrap();
        assert_eq!(fourth, 2);
    }

    #[test]
    fn workqueue_reverse_restores_queue_order() {
        let mut scheduler = Scheduler::workqueue();
        scheduler.init(&SLAVES);
        let snapshot = scheduler.clone();
        let mut flags = RollbackFlags::NONE;

        let _ = scheduler.forward_select(&SLAVES, &mut flags, None).unwrap();
        let _ = scheduler
            .forward_select(&SLAVES, &mut flags, Some(2))
            .unwrap();

        scheduler
            .reverse_select(&SLAVES, &mut flags, Some(2))
            .unwrap();
        scheduler.reverse_select(&SLAVES, &mut flags, None).unwrap();

        assert_eq!(scheduler, snapshot);
    }

    #[test]
    fn workqueue_reverse_from_single_slot() {
        // Push-then-pop of the same machine must invert cleanly.
        let mut scheduler = Scheduler::workqueue();
        scheduler.init(&[]);
        let snapshot = scheduler.clone();
        let mut flags = RollbackFlags::NONE;

        let pick = scheduler.forward_select(&[], &mut flags, Some(8)).unwrap();
        assert_eq!(pick, 8);

        scheduler.reverse_select(&[], &mut flags, Some(8)).unwrap();
        assert_eq!(scheduler, snapshot);
    }

    #[test]
    fn workqueue_drained_queue_faults() {
        let mut scheduler = Scheduler::workqueue();
        scheduler.init(&[2]);
        let mut flags = RollbackFlags::NONE;

        let _ = scheduler.forward_select(&[2], &mut flags, None).unwrap();
        let result = scheduler.forward_select(&[2], &mut flags, None);
        assert!(matches!(result, Err(SimError::NoTarget)));
    }
}

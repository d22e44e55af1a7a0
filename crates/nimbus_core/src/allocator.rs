//! VM placement policies.
//!
//! Allocators only choose which machine to ask next; the actual fit test
//! happens at the machine, which answers through the `fit` field of the
//! event's VM claim. Both policies share the round-robin circular-index
//! reverse discipline via `C0`.

use crate::{Lpid, RollbackFlags, SimError};

/// Composite demand multiplier for first-fit-decreasing ordering.
const DEMAND_SCALE: f64 = 100_000.0;

/// Composite resource demand of a VM, for descending pre-sort.
pub fn demand_key(cores: u32, memory: f64, disk: f64) -> f64 {
    DEMAND_SCALE * (cores as f64 + memory + disk)
}

/// Circular index over the machine list, identical to round-robin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CircularIndex {
    next_index: usize,
}

impl CircularIndex {
    fn forward(
        &mut self,
        machines: &[Lpid],
        flags: &mut RollbackFlags,
    ) -> Result<Lpid, SimError> {
        if machines.is_empty() {
            return Err(SimError::NoTarget);
        }

        flags.remove(RollbackFlags::C0);
        let machine = machines[self.next_index];
        self.next_index += 1;

        if self.next_index == machines.len() {
            flags.insert(RollbackFlags::C0);
            self.next_index = 0;
        }

        Ok(machine)
    }

    fn reverse(&mut self, machines: &[Lpid], flags: &mut RollbackFlags) -> Result<(), SimError> {
        if flags.contains(RollbackFlags::C0) {
            flags.remove(RollbackFlags::C0);
            self.next_index = machines.len() - 1;
        } else {
            if self.next_index == 0 {
                return Err(SimError::PolicyViolation(
                    "allocator reverse would underflow the machine index",
                ));
            }
            self.next_index -= 1;
        }
        Ok(())
    }
}

/// A VM placement policy owned by a VMM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocator {
    /// Ask machines in circular order; first acceptance wins.
    FirstFit(FirstFit),

    /// First-fit over a VM list pre-sorted by descending demand.
    FirstFitDecreasing(FirstFitDecreasing),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstFit {
    index: CircularIndex,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirstFitDecreasing {
    index: CircularIndex,
}

impl Allocator {
    pub fn first_fit() -> Self {
        Self::FirstFit(FirstFit::default())
    }

    pub fn first_fit_decreasing() -> Self {
        Self::FirstFitDecreasing(FirstFitDecreasing::default())
    }

    /// Reset the circular index.
    pub fn init(&mut self) {
        match self {
            Self::FirstFit(ff) => ff.index.next_index = 0,
            Self::FirstFitDecreasing(ffd) => ffd.index.next_index = 0,
        }
    }

    /// Whether the VMM must pre-sort its VM list by descending demand
    /// before allocation starts.
    pub fn wants_sorted_vms(&self) -> bool {
        matches!(self, Self::FirstFitDecreasing(_))
    }

    /// Pick the next machine to ask.
    pub fn forward_allocate(
        &mut self,
        machines: &[Lpid],
        flags: &mut RollbackFlags,
    ) -> Result<Lpid, SimError> {
        match self {
            Self::FirstFit(ff) => ff.index.forward(machines, flags),
            Self::FirstFitDecreasing(ffd) => ffd.index.forward(machines, flags),
        }
    }

    /// Undo the matching `forward_allocate`.
    pub fn reverse_allocate(
        &mut self,
        machines: &[Lpid],
        flags: &mut RollbackFlags,
    ) -> Result<(), SimError> {
        match self {
            Self::FirstFit(ff) => ff.index.reverse(machines, flags),
            Self::FirstFitDecreasing(ffd) => ffd.index.reverse(machines, flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MACHINES: [Lpid; 2] = [2, 4];

    #[test]
    fn first_fit_advances_circularly() {
        let mut allocator = Allocator::first_fit();
        allocator.init();

        let mut picks = Vec::new();
        for _ in 0..3 {
            let mut flags = RollbackFlags::NONE;
            picks.push(allocator.forward_allocate(&MACHINES, &mut flags).unwrap());
        }

        assert_eq!(picks, vec![2, 4, 2]);
    }

    #[test]
    fn forward_reverse_round_trip() {
        let mut allocator = Allocator::first_fit();
        allocator.init();
        let snapshot = allocator.clone();

        let mut history = Vec::new();
        for _ in 0..5 {
            let mut flags = RollbackFlags::NONE;
            let _ = allocator.forward_allocate(&MACHINES, &mut flags).unwrap();
            history.push(flags);
        }

        for mut flags in history.into_iter().rev() {
            allocator.reverse_allocate(&MACHINES, &mut flags).unwrap();
        }

        assert_eq!(allocator, snapshot);
    }

    #[test]
    fn decreasing_variant_requires_sort() {
        assert!(Allocator::first_fit_decreasing().wants_sorted_vms());
        assert!(!Allocator::first_fit().wants_sorted_vms());
    }

    #[test]
    fn demand_key_orders_by_total_demand() {
        let small = demand_key(2, 4.0, 10.0);
        let large = demand_key(8, 16.0, 100.0);
        assert!(large > small);
    }

    #[test]
    fn empty_machine_list_faults() {
        let mut allocator = Allocator::first_fit();
        allocator.init();
        let mut flags = RollbackFlags::NONE;

        let result = allocator.forward_allocate(&[], &mut flags);
        assert!(matches!(result, Err(SimError::NoTarget)));
    }
}

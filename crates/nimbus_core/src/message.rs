//! Event envelope exchanged between logical processes.
//!
//! A [`Message`] is owned by the kernel while in flight. Besides the task it
//! carries routing bookkeeping (offset into the static route, traversal
//! direction) and the two rollback annotations: the branch [`RollbackFlags`]
//! and the [`Saved`] scratch holding any value a reverse handler must
//! restore exactly.

use crate::{Lpid, RollbackFlags, SimTime, UserId};

/// Event discriminator.
///
/// `Generate` events are self-scheduled by generator services (master, VMM)
/// to emit the next task or allocation. `Arrival` events travel through the
/// topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Generate,
    Arrival,
}

/// A unit of work travelling from a submitter to a processing service and
/// back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Task {
    /// Processing demand in Mflops.
    pub proc_size: f64,

    /// Communication demand in Mbits.
    pub comm_size: f64,

    /// Fraction of the processing offloaded to a coprocessor, in [0, 1].
    pub offload: f64,

    /// Submitting service.
    pub origin: Lpid,

    /// Processing service.
    pub dest: Lpid,

    /// Submission timestamp, set once at generation.
    pub submit_time: SimTime,

    /// Completion timestamp, set once at final arrival.
    pub end_time: SimTime,

    /// User accountable for this task.
    pub owner: UserId,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            proc_size: 0.0,
            comm_size: 0.0,
            offload: 0.0,
            origin: 0,
            dest: 0,
            submit_time: 0.0,
            end_time: 0.0,
            owner: 0,
        }
    }
}

/// A VM allocation request riding on an arrival event.
///
/// Carries the full resource demand so an allocation rollback can rebuild
/// the popped VM entry without consulting any other state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmClaim {
    /// The VM being placed.
    pub id: Lpid,

    /// Demanded memory (GB).
    pub memory: f64,

    /// Demanded disk space (GB).
    pub disk: f64,

    /// Demanded core count.
    pub cores: u32,

    /// Machine's verdict, filled in on the return trip.
    pub fit: bool,

    /// Machine that accepted the claim, if any.
    pub allocated_in: Option<Lpid>,
}

impl VmClaim {
    /// A fresh, undecided claim.
    pub fn new(id: Lpid, memory: f64, disk: f64, cores: u32) -> Self {
        Self {
            id,
            memory,
            disk,
            cores,
            fit: false,
            allocated_in: None,
        }
    }
}

/// Typed per-event scratch written by forward handlers.
///
/// Reverse handlers match on the variant their forward counterpart wrote; a
/// mismatch is a `PolicyViolation`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Saved {
    /// Nothing saved.
    #[default]
    None,

    /// Pre-update next-free time of the link direction that was used.
    Link { next_free: SimTime },

    /// Core picked by a machine or VM, with its pre-update free time.
    Core { index: usize, next_free: SimTime },
}

/// The event payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: MessageKind,
    pub task: Task,

    /// Index of the next route entry to consult.
    pub route_offset: u32,

    /// Master-to-slave traversal when true, the return trip when false.
    pub downward: bool,

    /// Set once the task has been executed by its destination.
    pub task_processed: bool,

    /// The LP that emitted this event.
    pub previous_service: Lpid,

    /// Machine that just returned a result, fed back to workqueue
    /// schedulers. `None` means no machine returned.
    pub freed_machine: Option<Lpid>,

    /// Allocation request, present only during the VMM allocation phase.
    pub vm: Option<VmClaim>,

    /// Guest VM that must execute this task, present only during the VMM
    /// scheduling phase.
    pub target_vm: Option<Lpid>,

    /// Branch annotations for reverse computation.
    pub flags: RollbackFlags,

    /// Value scratch for reverse computation.
    pub saved: Saved,
}

impl Message {
    /// A self-scheduled generator kick.
    pub fn generate() -> Self {
        Self {
            kind: MessageKind::Generate,
            task: Task::default(),
            route_offset: 0,
            downward: true,
            task_processed: false,
            previous_service: 0,
            freed_machine: None,
            vm: None,
            target_vm: None,
            flags: RollbackFlags::NONE,
            saved: Saved::None,
        }
    }

    /// An arrival carrying `task` into the topology.
    pub fn arrival(task: Task) -> Self {
        Self {
            kind: MessageKind::Arrival,
            task,
            ..Self::generate()
        }
    }

    /// Attach the returning machine for workqueue feedback.
    pub fn with_freed_machine(mut self, machine: Option<Lpid>) -> Self {
        self.freed_machine = machine;
        self
    }
}

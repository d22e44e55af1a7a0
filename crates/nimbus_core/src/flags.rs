//! Per-event rollback flags.
//!
//! Forward handlers record branch decisions here so the matching reverse
//! handler can undo them in O(1) without replaying the decision. Each bit
//! has exactly one writer per event; the assignments below are the whole
//! contract.

use bitflags::bitflags;

bitflags! {
    /// One-bit branch annotations carried by an in-flight event.
    ///
    /// # Bit assignments
    ///
    /// | Bit  | Writer                         | Meaning when set                   |
    /// |------|--------------------------------|------------------------------------|
    /// | `C0` | round-robin / first-fit index  | circular index wrapped to zero     |
    /// | `C1` | machine fit check              | VM claim fitted on this machine    |
    /// | `C2` | master / VMM generate          | a task or claim was emitted        |
    /// | `C3` | VMM generate                   | generate ran the allocation phase  |
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RollbackFlags: u32 {
        /// No branch recorded.
        const NONE = 0;

        /// Circular selection index wrapped around.
        const C0 = 1 << 0;

        /// VM claim was accepted by the machine.
        const C1 = 1 << 1;

        /// Generate emitted a task or claim (was not a drained no-op).
        const C2 = 1 << 2;

        /// Generate dispatched to the VMM allocation phase.
        const C3 = 1 << 3;
    }
}

impl Default for RollbackFlags {
    fn default() -> Self {
        RollbackFlags::NONE
    }
}

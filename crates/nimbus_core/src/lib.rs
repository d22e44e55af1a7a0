//! Nimbus Time-Warp Core
//!
//! This crate implements the reversible building blocks of the simulator -
//! everything a logical process (LP) needs to process an event forward and
//! to undo it bit-for-bit on rollback. It is kernel-agnostic and owns no
//! event queue.
//!
//! # Architecture
//!
//! ```text
//! Kernel (any rank)
//!       │
//!       ▼
//!    ┌───────────┐
//!    │  Message  │  ← Timestamped event payload + rollback scratch
//!    └─────┬─────┘
//!          │
//!          ▼
//!    ┌───────────────┐
//!    │  LP handlers  │  ← forward / reverse / commit (nimbus_services)
//!    └─────┬─────────┘
//!          │
//!          ▼
//!    ┌───────────────┐
//!    │  SimContext   │  ← send(), clock, reversible RNG stream
//!    └───────────────┘
//! ```
//!
//! Every forward mutation is either trivially invertible, recoverable from
//! the message payload, or saved into the message's [`Saved`] scratch. Every
//! branch that steers the reverse path is recorded in [`RollbackFlags`].

mod context;
mod fault;
mod flags;
mod message;
mod rng;

pub mod allocator;
pub mod routing;
pub mod scheduler;
pub mod users;
pub mod workload;

pub use context::SimContext;
pub use fault::SimError;
pub use flags::RollbackFlags;
pub use message::{Message, MessageKind, Saved, Task, VmClaim};
pub use rng::ReversibleRng;

/// Globally unique logical-process identifier.
pub type Lpid = u64;

/// User identifier, assigned densely at registration.
pub type UserId = u32;

/// Simulation time in seconds.
pub type SimTime = f64;

/// Default minimum outgoing delay for generator services.
pub const DEFAULT_LOOKAHEAD: SimTime = 1e-6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_reasonable() {
        assert!(DEFAULT_LOOKAHEAD > 0.0);
        assert!(DEFAULT_LOOKAHEAD < 1.0);
    }
}

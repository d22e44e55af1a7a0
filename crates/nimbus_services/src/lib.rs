//! Logical-process state machines.
//!
//! Each service is an `(kind tag, state struct)` pair with five handlers:
//!
//! - `init` - populate state, sanity-check the model, schedule the first
//!   self-event.
//! - `forward` - normal event processing.
//! - `reverse` - exact undo of `forward`, called on rollback in LIFO order.
//! - `commit` - side-effect sink run once per event past GVT; this is the
//!   only place user-visible metrics are touched.
//! - `finish` - report into the per-rank metrics collector after the run.
//!
//! No service ever touches another's state; all interaction is through
//! timestamped events sent via [`nimbus_core::SimContext`].

mod config;
mod link;
mod machine;
mod master;
mod service;
mod switch;
mod virtual_machine;
mod vmm;

pub use config::{LinkConfiguration, MachineConfiguration, SwitchConfiguration, VmConfiguration};
pub use link::LinkState;
pub use machine::MachineState;
pub use master::MasterState;
pub use service::{Service, ServiceKind};
pub use switch::SwitchState;
pub use virtual_machine::VmState;
pub use vmm::{SlaveVm, VmmState};

#[cfg(test)]
pub(crate) mod testing;

//! Metrics collection and reduction.
//!
//! Three layers:
//!
//! 1. Per-service metrics structs, mutated (and exactly un-mutated) by the
//!    LP handlers themselves.
//! 2. A per-rank [`NodeMetrics`] collector, fed once per LP from the
//!    `finish` handlers after the run - single-threaded, never reversed.
//! 3. A [`GlobalMetrics`] reduction folding every rank's collector (and the
//!    user registry) into the final report.

mod global;
mod node;
mod service;

pub use global::{GlobalMetrics, GlobalReport};
pub use node::{NodeMetrics, ServiceReport};
pub use service::{
    LinkMetrics, MachineMetrics, MasterMetrics, SwitchMetrics, VmMetrics, VmmMetrics,
};

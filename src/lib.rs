//! Nimbus - a time-warp discrete-event simulator for cloud and cluster
//! workloads.
//!
//! The workspace splits along the kernel boundary:
//!
//! - [`nimbus_core`] - reversible building blocks: message envelope,
//!   rollback scratch, RNG streams, routing, workloads, policies.
//! - [`nimbus_services`] - the LP state machines (master, link, switch,
//!   machine, VM, VMM).
//! - [`nimbus_model`] - programmatic registration and the strict JSON
//!   model loader.
//! - [`nimbus_metrics`] - per-rank collection and the global reduction.
//! - [`nimbus_harness`] - the deterministic single-rank reference kernel
//!   and rollback driver.

pub use nimbus_core as core;
pub use nimbus_harness as harness;
pub use nimbus_metrics as metrics;
pub use nimbus_model as model;
pub use nimbus_services as services;

pub mod star;

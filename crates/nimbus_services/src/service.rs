//! The service dispatcher - an `(kind, state)` pair per LP.
//!
//! The kernel stores one [`Service`] per LP and calls through this enum;
//! no dynamic dispatch tables, no shared state between LPs.

use crate::{LinkState, MachineState, MasterState, SwitchState, VmState, VmmState};
use nimbus_core::routing::RoutingTable;
use nimbus_core::users::UserRegistry;
use nimbus_core::{Lpid, Message, SimContext, SimError, SimTime};
use nimbus_metrics::NodeMetrics;

/// Service class tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Master,
    Link,
    Switch,
    Machine,
    VirtualMachine,
    Vmm,
}

/// One logical process: its class and its private state.
#[derive(Debug, Clone, PartialEq)]
pub enum Service {
    Master(MasterState),
    Link(LinkState),
    Switch(SwitchState),
    Machine(MachineState),
    VirtualMachine(VmState),
    Vmm(VmmState),
}

impl Service {
    pub fn kind(&self) -> ServiceKind {
        match self {
            Service::Master(_) => ServiceKind::Master,
            Service::Link(_) => ServiceKind::Link,
            Service::Switch(_) => ServiceKind::Switch,
            Service::Machine(_) => ServiceKind::Machine,
            Service::VirtualMachine(_) => ServiceKind::VirtualMachine,
            Service::Vmm(_) => ServiceKind::Vmm,
        }
    }

    /// Populate state and schedule the first self-events.
    pub fn init(
        &mut self,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        match self {
            Service::Master(master) => master.init(ctx, routes),
            Service::Link(link) => link.init(ctx),
            Service::Switch(switch) => switch.init(ctx),
            Service::Machine(machine) => machine.init(ctx),
            Service::VirtualMachine(vm) => vm.init(ctx),
            Service::Vmm(vmm) => vmm.init(ctx),
        }
    }

    /// Process one event forward.
    pub fn forward(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        match self {
            Service::Master(master) => master.forward(msg, ctx, routes),
            Service::Link(link) => link.forward(msg, ctx),
            Service::Switch(switch) => switch.forward(msg, ctx, routes),
            Service::Machine(machine) => machine.forward(msg, ctx, routes),
            Service::VirtualMachine(vm) => vm.forward(msg, ctx),
            Service::Vmm(vmm) => vmm.forward(msg, ctx, routes),
        }
    }

    /// Undo one forward, most recent first.
    pub fn reverse(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        match self {
            Service::Master(master) => master.reverse(msg, ctx),
            Service::Link(link) => link.reverse(msg, ctx),
            Service::Switch(switch) => switch.reverse(msg, ctx),
            Service::Machine(machine) => machine.reverse(msg, ctx),
            Service::VirtualMachine(vm) => vm.reverse(msg, ctx),
            Service::Vmm(vmm) => vmm.reverse(msg, ctx),
        }
    }

    /// Run once per event past GVT; the only writer of user metrics.
    pub fn commit(&mut self, msg: &Message, users: &mut UserRegistry, now: SimTime) {
        match self {
            Service::Master(master) => master.commit(msg, users),
            Service::Link(link) => link.commit(msg, users, now),
            Service::Switch(_) => {}
            Service::Machine(machine) => machine.commit(msg, users, now),
            Service::VirtualMachine(vm) => vm.commit(msg, users, now),
            Service::Vmm(vmm) => vmm.commit(msg, users),
        }
    }

    /// Report into the per-rank collector after the run.
    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        match self {
            Service::Master(master) => master.finish(gid, node),
            Service::Link(link) => link.finish(gid, node),
            Service::Switch(switch) => switch.finish(gid, node),
            Service::Machine(machine) => machine.finish(gid, node),
            Service::VirtualMachine(vm) => vm.finish(gid, node),
            Service::Vmm(vmm) => vmm.finish(gid, node),
        }
    }
}

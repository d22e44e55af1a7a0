//! VMM LP - two-phase virtual machine monitor.
//!
//! Phase A (allocation) runs while `vms_to_allocate > 0`: each `Generate`
//! pops the head of the pending VM list, asks a machine chosen by the
//! allocator, and the machine answers fit/reject through the claim on the
//! return event. Once every VM is decided the arrival handler kicks a
//! `Generate` and the LP is in phase B (scheduling): tasks are drawn from
//! the workload and dispatched to allocated guests through their owning
//! machines.
//!
//! The phase a `Generate` ran in is recorded in `C3`; whether it emitted
//! anything in `C2`. Allocation rollback rebuilds the popped VM from the
//! claim the forward stashed on its own event.

use nimbus_core::allocator::{demand_key, Allocator};
use nimbus_core::routing::RoutingTable;
use nimbus_core::scheduler::Scheduler;
use nimbus_core::users::UserRegistry;
use nimbus_core::workload::Workload;
use nimbus_core::{
    Lpid, Message, MessageKind, RollbackFlags, SimContext, SimError, Task, VmClaim,
};
use nimbus_metrics::{MasterMetrics, NodeMetrics, VmmMetrics};
use std::collections::HashMap;

/// A VM awaiting placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaveVm {
    pub id: Lpid,
    pub memory: f64,
    pub disk: f64,
    pub cores: u32,
}

/// State of one VMM LP.
#[derive(Debug, Clone, PartialEq)]
pub struct VmmState {
    /// VMs still waiting for a placement verdict, consumed from the head.
    pub vms: Vec<SlaveVm>,

    /// Successfully placed VMs, in placement order.
    pub allocated_vms: Vec<Lpid>,

    /// Machines this VMM may place VMs on.
    pub machines: Vec<Lpid>,

    /// Placed VM -> hosting machine.
    pub owner: HashMap<Lpid, Lpid>,

    pub scheduler: Scheduler,
    pub allocator: Allocator,
    pub workload: Workload,

    /// VMs not yet sent out for placement.
    pub vms_to_allocate: u32,

    /// Total VMs this VMM started with.
    pub total_vms: u32,

    pub metrics: VmmMetrics,
}

impl VmmState {
    pub fn new(
        vms: Vec<SlaveVm>,
        machines: Vec<Lpid>,
        allocator: Allocator,
        scheduler: Scheduler,
        workload: Workload,
    ) -> Self {
        let total_vms = vms.len() as u32;
        Self {
            vms,
            allocated_vms: Vec::new(),
            machines,
            owner: HashMap::new(),
            scheduler,
            allocator,
            workload,
            vms_to_allocate: total_vms,
            total_vms,
            metrics: VmmMetrics::default(),
        }
    }

    pub fn init(&mut self, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        self.allocator.init();
        self.scheduler.init(&self.allocated_vms);

        if self.allocator.wants_sorted_vms() {
            self.vms.sort_by(|a, b| {
                demand_key(b.cores, b.memory, b.disk)
                    .total_cmp(&demand_key(a.cores, a.memory, a.disk))
            });
        }

        let lookahead = ctx.lookahead();
        if lookahead <= 0.0 {
            return Err(SimError::LookaheadViolation {
                delay: lookahead,
                lookahead,
            });
        }

        self.metrics = VmmMetrics::default();

        if self.vms_to_allocate > 0 || self.workload.remaining() > 0 {
            let offset = self.workload.generate_interarrival(ctx.rng());
            ctx.send(ctx.me(), lookahead + offset, Message::generate());
        }

        tracing::debug!(
            vmm = ctx.me(),
            vms = self.total_vms,
            machines = self.machines.len(),
            "vmm initialized"
        );
        Ok(())
    }

    pub fn forward(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        match msg.kind {
            MessageKind::Generate => {
                if self.vms_to_allocate > 0 {
                    msg.flags.insert(RollbackFlags::C3);
                    self.allocate(msg, ctx, routes)
                } else {
                    self.schedule(msg, ctx, routes)
                }
            }
            MessageKind::Arrival => self.arrival(msg, ctx),
        }
    }

    pub fn reverse(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        match msg.kind {
            MessageKind::Generate => {
                if msg.flags.contains(RollbackFlags::C3) {
                    msg.flags.remove(RollbackFlags::C3);
                    self.reverse_allocate(msg, ctx)
                } else {
                    self.reverse_schedule(msg, ctx)
                }
            }
            MessageKind::Arrival => self.reverse_arrival(msg, ctx),
        }
    }

    /// Book the scheduled task against its owner. Commit-only.
    pub fn commit(&mut self, msg: &Message, users: &mut UserRegistry) {
        let scheduled = msg.kind == MessageKind::Generate
            && msg.flags.contains(RollbackFlags::C2)
            && !msg.flags.contains(RollbackFlags::C3);

        if scheduled {
            if let Some(user) = users.by_id_mut(self.workload.owner()) {
                user.metrics.issued_tasks += 1;
            }
        }
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        // The VMM reports under the master type.
        node.report_master(
            gid,
            &MasterMetrics {
                completed_tasks: self.metrics.tasks_proc,
                total_turnaround_time: self.metrics.total_turnaround_time,
            },
        );

        tracing::debug!(
            vmm = gid,
            vms_alloc = self.metrics.vms_alloc,
            vms_rejected = self.metrics.vms_rejected,
            tasks_proc = self.metrics.tasks_proc,
            "vmm finished"
        );
    }

    /// Phase A: send the head VM out for placement.
    fn allocate(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        msg.flags.insert(RollbackFlags::C2);

        let machine = self
            .allocator
            .forward_allocate(&self.machines, &mut msg.flags)?;
        let route = routes.get_route(ctx.me(), machine)?;

        // The placement transfer rides the workload's size distributions
        // without consuming a task from the budget.
        let (proc_size, comm_size) = self.workload.generate_sizes(ctx.rng());
        self.vms_to_allocate -= 1;
        let vm = self.vms.remove(0);

        // Stash the popped VM on this event so allocation rollback can
        // rebuild it without consulting anything else.
        msg.vm = Some(VmClaim::new(vm.id, vm.memory, vm.disk, vm.cores));

        tracing::debug!(
            vmm = ctx.me(),
            vm = vm.id,
            machine,
            remaining = self.vms_to_allocate,
            "vm sent for placement"
        );

        let task = Task {
            proc_size,
            comm_size,
            offload: self.workload.offload(),
            origin: ctx.me(),
            dest: machine,
            submit_time: ctx.now(),
            end_time: 0.0,
            owner: self.workload.owner(),
        };

        let mut out = Message::arrival(task);
        out.route_offset = 1;
        out.downward = true;
        out.previous_service = ctx.me();
        out.vm = Some(VmClaim::new(vm.id, vm.memory, vm.disk, vm.cores));

        ctx.send(route.first_hop(), ctx.lookahead(), out);

        if self.vms_to_allocate > 0 {
            let offset = self.workload.generate_interarrival(ctx.rng());
            ctx.send(ctx.me(), ctx.lookahead() + offset, Message::generate());
        }
        Ok(())
    }

    fn reverse_allocate(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        msg.flags.remove(RollbackFlags::C2);

        // The follow-up interarrival draw happened iff VMs were still
        // pending after this allocation; that count is unchanged since.
        if self.vms_to_allocate > 0 {
            self.workload.reverse_interarrival(ctx.rng());
        }

        let Some(claim) = msg.vm.take() else {
            return Err(SimError::PolicyViolation(
                "allocation reverse without the stashed vm",
            ));
        };

        self.vms.insert(
            0,
            SlaveVm {
                id: claim.id,
                memory: claim.memory,
                disk: claim.disk,
                cores: claim.cores,
            },
        );
        self.vms_to_allocate += 1;

        self.workload.reverse_sizes(ctx.rng());
        self.allocator
            .reverse_allocate(&self.machines, &mut msg.flags)?;
        Ok(())
    }

    /// Phase B: dispatch one task to an allocated guest.
    fn schedule(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        if self.workload.remaining() == 0 {
            return Ok(());
        }
        msg.flags.insert(RollbackFlags::C2);

        let vm_id =
            self.scheduler
                .forward_select(&self.allocated_vms, &mut msg.flags, None)?;
        let machine = *self
            .owner
            .get(&vm_id)
            .ok_or(SimError::UnknownVmOwner(vm_id))?;
        let route = routes.get_route(ctx.me(), machine)?;

        let (proc_size, comm_size) = self.workload.generate(ctx.rng());

        tracing::debug!(
            vmm = ctx.me(),
            vm = vm_id,
            machine,
            remaining = self.workload.remaining(),
            "task scheduled onto guest"
        );

        let task = Task {
            proc_size,
            comm_size,
            offload: self.workload.offload(),
            origin: ctx.me(),
            dest: machine,
            submit_time: ctx.now(),
            end_time: 0.0,
            owner: self.workload.owner(),
        };

        let mut out = Message::arrival(task);
        out.route_offset = 1;
        out.downward = true;
        out.previous_service = ctx.me();
        out.target_vm = Some(vm_id);

        ctx.send(route.first_hop(), ctx.lookahead(), out);

        if self.workload.remaining() > 0 {
            let offset = self.workload.generate_interarrival(ctx.rng());
            ctx.send(ctx.me(), ctx.lookahead() + offset, Message::generate());
        }
        Ok(())
    }

    fn reverse_schedule(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        if !msg.flags.contains(RollbackFlags::C2) {
            // Forward was a drained no-op.
            return Ok(());
        }
        msg.flags.remove(RollbackFlags::C2);

        if self.workload.remaining() > 0 {
            self.workload.reverse_interarrival(ctx.rng());
        }
        self.workload.reverse_generate(ctx.rng());
        self.scheduler
            .reverse_select(&self.allocated_vms, &mut msg.flags, None)?;
        Ok(())
    }

    fn arrival(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        if let Some(claim) = msg.vm {
            if claim.fit {
                let machine = claim.allocated_in.ok_or(SimError::PolicyViolation(
                    "fitted claim came back without a machine",
                ))?;

                self.allocated_vms.push(claim.id);
                self.owner.insert(claim.id, machine);
                self.metrics.vms_alloc += 1;

                tracing::debug!(vmm = ctx.me(), vm = claim.id, machine, "vm placed");
            } else {
                self.metrics.vms_rejected += 1;
                tracing::debug!(vmm = ctx.me(), vm = claim.id, "vm rejected");
            }

            // All verdicts in: kick the scheduling phase off.
            if self.metrics.vms_alloc + self.metrics.vms_rejected == self.total_vms {
                let offset = self.workload.generate_interarrival(ctx.rng());
                ctx.send(ctx.me(), ctx.lookahead() + offset, Message::generate());
            }
        } else {
            msg.task.end_time = ctx.now();
            let turnaround = msg.task.end_time - msg.task.submit_time;

            self.metrics.tasks_proc += 1;
            self.metrics.total_turnaround_time += turnaround;
        }
        Ok(())
    }

    fn reverse_arrival(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        if let Some(claim) = msg.vm {
            // The phase-transition draw happened iff this arrival completed
            // the verdict count; undo it before the counters move back.
            if self.metrics.vms_alloc + self.metrics.vms_rejected == self.total_vms {
                self.workload.reverse_interarrival(ctx.rng());
            }

            if claim.fit {
                match self.allocated_vms.pop() {
                    Some(vm) if vm == claim.id => {}
                    _ => {
                        return Err(SimError::PolicyViolation(
                            "allocated vm list does not match the reversed claim",
                        ))
                    }
                }
                self.owner.remove(&claim.id);
                self.metrics.vms_alloc -= 1;
            } else {
                self.metrics.vms_rejected -= 1;
            }
        } else {
            let turnaround = msg.task.end_time - msg.task.submit_time;
            self.metrics.tasks_proc -= 1;
            self.metrics.total_turnaround_time -= turnaround;
        }
        Ok(())
    }
}

//! Master LP - the task submission state machine.
//!
//! Lifecycle: Initialized -> (Generate <-> Arrival)* -> Finalized. Each
//! `Generate` schedules one task onto a slave picked by the scheduling
//! policy; each returning `Arrival` books the turnaround and, while the
//! workload has tasks left, schedules the next `Generate` after a fresh
//! interarrival draw.
//!
//! Reverse discipline is symmetric: a handler undoes exactly the RNG draws
//! its own forward made. `Generate` reverse undoes the scheduler selection
//! and one workload draw; `Arrival` reverse undoes the metric updates and
//! one interarrival draw, guarded by the same `remaining > 0` condition the
//! forward used.

use nimbus_core::routing::RoutingTable;
use nimbus_core::scheduler::Scheduler;
use nimbus_core::users::UserRegistry;
use nimbus_core::workload::Workload;
use nimbus_core::{Lpid, Message, MessageKind, RollbackFlags, SimContext, SimError, Task};
use nimbus_metrics::{MasterMetrics, NodeMetrics};

/// State of one master LP.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterState {
    /// Services this master schedules onto.
    pub slaves: Vec<Lpid>,

    pub scheduler: Scheduler,
    pub workload: Workload,
    pub metrics: MasterMetrics,
}

impl MasterState {
    pub fn new(slaves: Vec<Lpid>, scheduler: Scheduler, workload: Workload) -> Self {
        Self {
            slaves,
            scheduler,
            workload,
            metrics: MasterMetrics::default(),
        }
    }

    pub fn init(
        &mut self,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        self.scheduler.init(&self.slaves);

        let registered_routes = routes.count_routes(ctx.me());
        if registered_routes as usize != self.slaves.len() {
            return Err(SimError::ModelMismatch {
                master: ctx.me(),
                slaves: self.slaves.len(),
                routes: registered_routes,
            });
        }

        let lookahead = ctx.lookahead();
        if lookahead <= 0.0 {
            return Err(SimError::LookaheadViolation {
                delay: lookahead,
                lookahead,
            });
        }

        self.metrics = MasterMetrics::default();

        if self.workload.remaining() > 0 {
            let offset = self.workload.generate_interarrival(ctx.rng());
            ctx.send(ctx.me(), lookahead + offset, Message::generate());
        }

        tracing::debug!(
            master = ctx.me(),
            slaves = self.slaves.len(),
            remaining = self.workload.remaining(),
            "master initialized"
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
            MessageKind::Generate => self.generate(msg, ctx, routes),
            MessageKind::Arrival => self.arrival(msg, ctx),
        }
    }

    pub fn reverse(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        match msg.kind {
            MessageKind::Generate => self.reverse_generate(msg, ctx),
            MessageKind::Arrival => self.reverse_arrival(msg, ctx),
        }
    }

    /// Book the issued task against its owner. Commit-only.
    pub fn commit(&mut self, msg: &Message, users: &mut UserRegistry) {
        if msg.kind == MessageKind::Generate && msg.flags.contains(RollbackFlags::C2) {
            if let Some(user) = users.by_id_mut(self.workload.owner()) {
                user.metrics.issued_tasks += 1;
            }
        }
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        node.report_master(gid, &self.metrics);
    }

    fn generate(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        if self.workload.remaining() == 0 {
            return Ok(());
        }
        msg.flags.insert(RollbackFlags::C2);

        let slave =
            self.scheduler
                .forward_select(&self.slaves, &mut msg.flags, msg.freed_machine)?;
        let route = routes.get_route(ctx.me(), slave)?;

        let (proc_size, comm_size) = self.workload.generate(ctx.rng());

        tracing::debug!(
            master = ctx.me(),
            slave,
            proc_size,
            comm_size,
            remaining = self.workload.remaining(),
            "task generated"
        );

        let task = Task {
            proc_size,
            comm_size,
            offload: self.workload.offload(),
            origin: ctx.me(),
            dest: slave,
            submit_time: ctx.now(),
            end_time: 0.0,
            owner: self.workload.owner(),
        };

        let mut out = Message::arrival(task);
        out.route_offset = 1;
        out.downward = true;
        out.previous_service = ctx.me();

        ctx.send(route.first_hop(), ctx.lookahead(), out);
        Ok(())
    }

    fn reverse_generate(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        if !msg.flags.contains(RollbackFlags::C2) {
            // Forward was a drained no-op.
            return Ok(());
        }
        msg.flags.remove(RollbackFlags::C2);

        self.scheduler
            .reverse_select(&self.slaves, &mut msg.flags, msg.freed_machine)?;
        self.workload.reverse_generate(ctx.rng());
        Ok(())
    }

    fn arrival(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        msg.task.end_time = ctx.now();
        let turnaround = msg.task.end_time - msg.task.submit_time;

        self.metrics.completed_tasks += 1;
        self.metrics.total_turnaround_time += turnaround;

        tracing::debug!(
            master = ctx.me(),
            turnaround,
            completed = self.metrics.completed_tasks,
            "task completed"
        );

        if self.workload.remaining() > 0 {
            let offset = self.workload.generate_interarrival(ctx.rng());
            let next = Message::generate().with_freed_machine(Some(msg.task.dest));
            ctx.send(ctx.me(), ctx.lookahead() + offset, next);
        }
        Ok(())
    }

    fn reverse_arrival(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        let turnaround = msg.task.end_time - msg.task.submit_time;

        self.metrics.completed_tasks -= 1;
        self.metrics.total_turnaround_time -= turnaround;

        // Arrival leaves `remaining` untouched, so the guard re-evaluates to
        // the same branch the forward took.
        if self.workload.remaining() > 0 {
            self.workload.reverse_interarrival(ctx.rng());
        }
        Ok(())
    }
}

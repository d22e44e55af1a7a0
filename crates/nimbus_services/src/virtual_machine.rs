//! Virtual machine LP - the guest execution engine.
//!
//! Same multi-core queueing discipline as a machine, but a guest never
//! forwards: every arrival is executed locally and the processed result is
//! acknowledged straight back to the task's origin (the VMM).

use crate::machine::{idleness, least_core};
use crate::VmConfiguration;
use nimbus_core::users::UserRegistry;
use nimbus_core::{Lpid, Message, Saved, SimContext, SimError, SimTime};
use nimbus_metrics::{MachineMetrics, NodeMetrics, VmMetrics};

/// State of one guest VM LP.
#[derive(Debug, Clone, PartialEq)]
pub struct VmState {
    pub conf: VmConfiguration,
    pub metrics: VmMetrics,
    pub cores_free_time: Vec<SimTime>,
}

impl VmState {
    pub fn new(conf: VmConfiguration) -> Self {
        Self {
            conf,
            metrics: VmMetrics::default(),
            cores_free_time: vec![0.0; conf.core_count() as usize],
        }
    }

    pub fn init(&mut self, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        self.metrics = VmMetrics::default();
        self.cores_free_time.fill(0.0);

        tracing::debug!(vm = ctx.me(), cores = self.conf.core_count(), "virtual machine initialized");
        Ok(())
    }

    pub fn forward(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let proc_size = msg.task.proc_size;
        let proc_time = self.conf.time_to_proc(proc_size);

        let (core, free) = least_core(&self.cores_free_time);
        let waiting = (free - ctx.now()).max(0.0);
        let departure = waiting + proc_time;

        msg.saved = Saved::Core {
            index: core,
            next_free: free,
        };

        self.metrics.proc_mflops += proc_size;
        self.metrics.proc_tasks += 1;
        self.metrics.proc_time += proc_time;
        self.metrics.proc_waiting_time += waiting;

        self.cores_free_time[core] = ctx.now() + departure;

        // Acknowledge straight back to the submitter.
        let mut out = Message::arrival(msg.task);
        out.task_processed = true;
        out.downward = false;
        out.previous_service = ctx.me();
        out.target_vm = msg.target_vm;

        ctx.send(msg.task.origin, departure, out);
        Ok(())
    }

    pub fn reverse(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let Saved::Core { index, next_free } = msg.saved else {
            return Err(SimError::PolicyViolation(
                "virtual machine reverse without saved core state",
            ));
        };

        let proc_size = msg.task.proc_size;
        let proc_time = self.conf.time_to_proc(proc_size);
        let waiting = (next_free - ctx.now()).max(0.0);

        self.metrics.proc_mflops -= proc_size;
        self.metrics.proc_tasks -= 1;
        self.metrics.proc_time -= proc_time;
        self.metrics.proc_waiting_time -= waiting;

        self.cores_free_time[index] = next_free;
        msg.saved = Saved::None;
        Ok(())
    }

    /// Charge the owner's processing accounting. Commit-only.
    pub fn commit(&mut self, msg: &Message, users: &mut UserRegistry, now: SimTime) {
        let Saved::Core { next_free, .. } = msg.saved else {
            return;
        };

        let proc_time = self.conf.time_to_proc(msg.task.proc_size);
        if let Some(user) = users.by_id_mut(msg.task.owner) {
            user.metrics.proc_time += proc_time;
            user.metrics.proc_waiting_time += (next_free - now).max(0.0);
            user.metrics.completed_tasks += 1;
        }
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        let last_activity = self
            .cores_free_time
            .iter()
            .copied()
            .fold(0.0, SimTime::max);

        // Guests report under the machine type.
        let as_machine = MachineMetrics {
            proc_mflops: self.metrics.proc_mflops,
            proc_time: self.metrics.proc_time,
            proc_waiting_time: self.metrics.proc_waiting_time,
            proc_tasks: self.metrics.proc_tasks,
            ..MachineMetrics::default()
        };

        node.report_machine(
            gid,
            &as_machine,
            self.conf.power(),
            self.conf.core_count(),
            0,
            0.0,
            idleness(&self.cores_free_time, self.metrics.proc_time),
            last_activity,
        );
    }
}

//! Machine LP - multi-core queueing, packet forwarding, and VM hosting.
//!
//! Three arrival paths, told apart by fields the forward handler never
//! mutates, so reverse dispatch always lands on the same branch:
//!
//! - destination is another service: relay along the static route;
//! - destination is this machine and the event carries a VM claim: decide
//!   fit and debit resources;
//! - destination is this machine and the event targets a hosted guest:
//!   hand the task to the guest LP;
//! - otherwise: execute on the least-loaded core.

use crate::MachineConfiguration;
use nimbus_core::routing::RoutingTable;
use nimbus_core::users::UserRegistry;
use nimbus_core::{Lpid, Message, RollbackFlags, Saved, SimContext, SimError, SimTime};
use nimbus_metrics::{MachineMetrics, NodeMetrics};

/// Pick the core with the least free time; lowest index wins ties.
pub(crate) fn least_core(cores_free_time: &[SimTime]) -> (usize, SimTime) {
    let mut index = 0;
    let mut candidate = SimTime::MAX;

    for (i, &free) in cores_free_time.iter().enumerate() {
        if candidate > free {
            candidate = free;
            index = i;
        }
    }

    (index, candidate)
}

/// Fraction of total core time the machine spent idle.
pub(crate) fn idleness(cores_free_time: &[SimTime], proc_time: SimTime) -> f64 {
    let total: SimTime = cores_free_time.iter().sum();
    if total <= 0.0 {
        0.0
    } else {
        (total - proc_time) / total
    }
}

/// State of one machine LP.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineState {
    pub conf: MachineConfiguration,
    pub metrics: MachineMetrics,

    /// Per-core next-free timestamps; dispatch picks the minimum.
    pub cores_free_time: Vec<SimTime>,

    /// Resources still unclaimed by guest VMs.
    pub available_memory: f64,
    pub available_disk: f64,
    pub available_cores: u32,

    /// Guests placed on this machine, in placement order.
    pub hosted_vms: Vec<Lpid>,
}

impl MachineState {
    pub fn new(conf: MachineConfiguration) -> Self {
        Self {
            conf,
            metrics: MachineMetrics::default(),
            cores_free_time: vec![0.0; conf.core_count() as usize],
            available_memory: conf.memory(),
            available_disk: conf.disk(),
            available_cores: conf.core_count(),
            hosted_vms: Vec::new(),
        }
    }

    pub fn init(&mut self, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        self.metrics = MachineMetrics::default();
        self.cores_free_time.fill(0.0);
        self.available_memory = self.conf.memory();
        self.available_disk = self.conf.disk();
        self.available_cores = self.conf.core_count();
        self.hosted_vms.clear();

        tracing::debug!(
            machine = ctx.me(),
            power = self.conf.power(),
            cores = self.conf.core_count(),
            "machine initialized"
        );
        Ok(())
    }

    pub fn forward(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        if msg.task.dest != ctx.me() {
            return self.relay(msg, ctx, routes);
        }
        if msg.downward && msg.vm.is_some() {
            return self.decide_fit(msg, ctx);
        }
        if let Some(guest) = msg.target_vm {
            return self.pass_to_guest(guest, msg, ctx);
        }
        self.process(msg, ctx)
    }

    pub fn reverse(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        if msg.task.dest != ctx.me() {
            self.metrics.forwarded_packets -= 1;
            return Ok(());
        }
        if msg.downward && msg.vm.is_some() {
            return self.reverse_fit(msg);
        }
        if msg.target_vm.is_some() {
            self.metrics.forwarded_packets -= 1;
            return Ok(());
        }
        self.reverse_process(msg, ctx)
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
            user.metrics.energy_consumption += proc_time * self.conf.wattage_per_core();
            user.metrics.completed_tasks += 1;
        }
    }

    pub fn finish(&self, gid: Lpid, node: &mut NodeMetrics) {
        let last_activity = self
            .cores_free_time
            .iter()
            .copied()
            .fold(0.0, SimTime::max);

        node.report_machine(
            gid,
            &self.metrics,
            self.conf.power(),
            self.conf.core_count(),
            self.conf.gpu_core_count(),
            self.conf.wattage_idle(),
            idleness(&self.cores_free_time, self.metrics.proc_time),
            last_activity,
        );
    }

    /// Relay a packet whose destination lies further along the route.
    fn relay(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
        routes: &RoutingTable,
    ) -> Result<(), SimError> {
        let route = routes.get_route(msg.task.origin, msg.task.dest)?;
        let next_hop = route.hop(msg.route_offset).ok_or(SimError::PolicyViolation(
            "machine consulted a route offset past the path",
        ))?;

        self.metrics.forwarded_packets += 1;

        let mut out = Message::arrival(msg.task);
        out.task_processed = msg.task_processed;
        out.downward = msg.downward;
        out.route_offset = if msg.downward {
            msg.route_offset + 1
        } else {
            msg.route_offset.saturating_sub(1)
        };
        out.previous_service = ctx.me();
        out.vm = msg.vm;
        out.target_vm = msg.target_vm;

        ctx.send(next_hop, 0.0, out);
        Ok(())
    }

    /// Hand a scheduled task to a guest VM hosted here.
    fn pass_to_guest(
        &mut self,
        guest: Lpid,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        if !self.hosted_vms.contains(&guest) {
            return Err(SimError::UnknownVmOwner(guest));
        }

        self.metrics.forwarded_packets += 1;

        let mut out = Message::arrival(msg.task);
        out.previous_service = ctx.me();
        out.target_vm = Some(guest);

        ctx.send(guest, 0.0, out);
        Ok(())
    }

    /// Execute the task on the least-loaded core and send the result back
    /// up the route it came along.
    fn process(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
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
        self.metrics.energy_consumption += proc_time * self.conf.wattage_per_core();

        self.cores_free_time[core] = ctx.now() + departure;

        let mut out = Message::arrival(msg.task);
        out.task_processed = true;
        out.downward = false;
        out.route_offset = msg.route_offset.saturating_sub(2);
        out.previous_service = ctx.me();

        ctx.send(msg.previous_service, departure, out);
        Ok(())
    }

    fn reverse_process(
        &mut self,
        msg: &mut Message,
        ctx: &mut dyn SimContext,
    ) -> Result<(), SimError> {
        let Saved::Core { index, next_free } = msg.saved else {
            return Err(SimError::PolicyViolation(
                "machine reverse without saved core state",
            ));
        };

        let proc_size = msg.task.proc_size;
        let proc_time = self.conf.time_to_proc(proc_size);
        let waiting = (next_free - ctx.now()).max(0.0);

        self.metrics.proc_mflops -= proc_size;
        self.metrics.proc_tasks -= 1;
        self.metrics.proc_time -= proc_time;
        self.metrics.proc_waiting_time -= waiting;
        self.metrics.energy_consumption -= proc_time * self.conf.wattage_per_core();

        self.cores_free_time[index] = next_free;
        msg.saved = Saved::None;
        Ok(())
    }

    /// Decide whether a VM claim fits and answer up the route.
    fn decide_fit(&mut self, msg: &mut Message, ctx: &mut dyn SimContext) -> Result<(), SimError> {
        let me = ctx.me();
        msg.flags.remove(RollbackFlags::C1);

        let Some(claim) = msg.vm.as_mut() else {
            return Err(SimError::PolicyViolation("fit path entered without a claim"));
        };

        let fits = claim.memory <= self.available_memory
            && claim.disk <= self.available_disk
            && claim.cores <= self.available_cores;

        if fits {
            self.available_memory -= claim.memory;
            self.available_disk -= claim.disk;
            self.available_cores -= claim.cores;
            self.hosted_vms.push(claim.id);
            self.metrics.allocated_vms += 1;

            claim.fit = true;
            claim.allocated_in = Some(me);
            msg.flags.insert(RollbackFlags::C1);
        } else {
            claim.fit = false;
            claim.allocated_in = None;
        }

        tracing::debug!(machine = me, vm = claim.id, fit = claim.fit, "vm fit decided");

        let mut out = Message::arrival(msg.task);
        out.downward = false;
        out.route_offset = msg.route_offset.saturating_sub(2);
        out.previous_service = me;
        out.vm = msg.vm;

        ctx.send(msg.previous_service, 0.0, out);
        Ok(())
    }

    fn reverse_fit(&mut self, msg: &mut Message) -> Result<(), SimError> {
        let fitted = msg.flags.contains(RollbackFlags::C1);
        msg.flags.remove(RollbackFlags::C1);

        let claim = msg.vm.as_mut().ok_or(SimError::PolicyViolation(
            "machine fit reverse without a claim",
        ))?;

        if fitted {
            match self.hosted_vms.pop() {
                Some(vm) if vm == claim.id => {}
                _ => {
                    return Err(SimError::PolicyViolation(
                        "hosted vm list does not match the reversed claim",
                    ))
                }
            }

            self.available_memory += claim.memory;
            self.available_disk += claim.disk;
            self.available_cores += claim.cores;
            self.metrics.allocated_vms -= 1;
        }

        claim.fit = false;
        claim.allocated_in = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use nimbus_core::{Task, VmClaim};

    fn make_machine() -> MachineState {
        // Scenario parameters: power 20, one core, no load.
        MachineState::new(MachineConfiguration::new(
            20.0, 0.0, 1, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0,
        ))
    }

    fn make_quad() -> MachineState {
        MachineState::new(MachineConfiguration::new(
            80.0, 0.0, 4, 16.0, 100.0, 100.0, 180.0, 0.0, 0, 0.0,
        ))
    }

    fn task_for(dest: Lpid) -> Message {
        let mut msg = Message::arrival(Task {
            proc_size: 100.0,
            comm_size: 80.0,
            origin: 0,
            dest,
            ..Task::default()
        });
        msg.route_offset = 1;
        msg.previous_service = 1;
        msg
    }

    #[test]
    fn least_core_breaks_ties_low() {
        assert_eq!(least_core(&[0.0, 0.0, 0.0]), (0, 0.0));
        assert_eq!(least_core(&[3.0, 1.0, 1.0]), (1, 1.0));
        assert_eq!(least_core(&[2.0]), (0, 2.0));
    }

    #[test]
    fn process_replies_upward() {
        let mut machine = make_machine();
        let mut ctx = TestContext::new(2);
        let mut msg = task_for(2);

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();

        let (dest, delay, out) = ctx.only_send();
        assert_eq!(dest, 1); // back to the previous link
        assert!((delay - 5.0).abs() < 1e-12); // 100 Mflops on 20 Mflops/s
        assert!(out.task_processed);
        assert!(!out.downward);
        assert_eq!(out.route_offset, 0);

        assert_eq!(machine.metrics.proc_tasks, 1);
        assert!((machine.cores_free_time[0] - 5.0).abs() < 1e-12);
        assert_eq!(msg.saved, Saved::Core { index: 0, next_free: 0.0 });
    }

    #[test]
    fn busy_core_queues_the_task() {
        let mut machine = make_machine();
        machine.cores_free_time[0] = 7.0;

        let mut ctx = TestContext::new(2).at(4.0);
        let mut msg = task_for(2);
        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();

        // waiting 3.0 + proc 5.0
        let (_, delay, _) = ctx.only_send();
        assert!((delay - 8.0).abs() < 1e-12);
        assert!((machine.metrics.proc_waiting_time - 3.0).abs() < 1e-12);
        assert!(machine.cores_free_time[0] >= ctx.now);
    }

    #[test]
    fn quad_core_spreads_tasks() {
        let mut machine = make_quad();
        let mut ctx = TestContext::new(2);

        for expected_core in 0..4 {
            let mut msg = task_for(2);
            machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();
            assert_eq!(
                msg.saved,
                Saved::Core {
                    index: expected_core,
                    next_free: 0.0
                }
            );
        }

        assert!(machine.cores_free_time.iter().all(|&t| t > 0.0));
    }

    #[test]
    fn process_forward_reverse_is_identity() {
        let mut machine = make_quad();
        machine.cores_free_time = vec![4.0, 2.0, 9.0, 2.5];
        let snapshot = machine.clone();

        let mut ctx = TestContext::new(2).at(3.0);
        let mut msg = task_for(2);

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();
        machine.reverse(&mut msg, &mut ctx).unwrap();

        assert_eq!(machine, snapshot);
    }

    #[test]
    fn relay_follows_the_route() {
        let mut routes = RoutingTable::new();
        routes.insert(0, 6, vec![1, 5, 6]);

        let mut machine = make_machine();
        let mut ctx = TestContext::new(2);
        let mut msg = task_for(6); // destined elsewhere
        msg.route_offset = 1;

        machine.forward(&mut msg, &mut ctx, &routes).unwrap();

        let (dest, delay, out) = ctx.only_send();
        assert_eq!(dest, 5);
        assert_eq!(delay, 0.0);
        assert_eq!(out.route_offset, 2);
        assert_eq!(machine.metrics.forwarded_packets, 1);
        assert_eq!(machine.metrics.proc_tasks, 0);

        machine.reverse(&mut msg, &mut ctx).unwrap();
        assert_eq!(machine.metrics.forwarded_packets, 0);
    }

    #[test]
    fn fit_debits_resources_and_replies() {
        let mut machine = make_quad();
        let mut ctx = TestContext::new(2);

        let mut msg = task_for(2);
        msg.vm = Some(VmClaim::new(21, 8.0, 10.0, 2));

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();

        assert!((machine.available_memory - 8.0).abs() < 1e-12);
        assert!((machine.available_disk - 90.0).abs() < 1e-12);
        assert_eq!(machine.available_cores, 2);
        assert_eq!(machine.hosted_vms, vec![21]);
        assert!(msg.flags.contains(RollbackFlags::C1));

        let (dest, _, out) = ctx.only_send();
        assert_eq!(dest, 1);
        let claim = out.vm.unwrap();
        assert!(claim.fit);
        assert_eq!(claim.allocated_in, Some(2));
    }

    #[test]
    fn oversized_claim_is_rejected() {
        let mut machine = make_quad();
        let mut ctx = TestContext::new(2);

        let mut msg = task_for(2);
        msg.vm = Some(VmClaim::new(21, 64.0, 10.0, 2));

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();

        assert!((machine.available_memory - 16.0).abs() < 1e-12);
        assert!(machine.hosted_vms.is_empty());
        assert!(!msg.flags.contains(RollbackFlags::C1));

        let (_, _, out) = ctx.only_send();
        let claim = out.vm.unwrap();
        assert!(!claim.fit);
        assert_eq!(claim.allocated_in, None);
    }

    #[test]
    fn fit_forward_reverse_is_identity() {
        let mut machine = make_quad();
        let snapshot = machine.clone();
        let mut ctx = TestContext::new(2);

        let mut msg = task_for(2);
        msg.vm = Some(VmClaim::new(21, 8.0, 10.0, 2));

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();
        machine.reverse(&mut msg, &mut ctx).unwrap();

        assert_eq!(machine, snapshot);
        assert!(!msg.vm.unwrap().fit);
    }

    #[test]
    fn guest_pass_through() {
        let mut machine = make_quad();
        machine.hosted_vms.push(21);

        let mut ctx = TestContext::new(2);
        let mut msg = task_for(2);
        msg.target_vm = Some(21);

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();

        let (dest, delay, out) = ctx.only_send();
        assert_eq!(dest, 21);
        assert_eq!(delay, 0.0);
        assert_eq!(out.target_vm, Some(21));
        assert_eq!(machine.metrics.forwarded_packets, 1);
        assert_eq!(machine.metrics.proc_tasks, 0);
    }

    #[test]
    fn unknown_guest_faults() {
        let mut machine = make_quad();
        let mut ctx = TestContext::new(2);
        let mut msg = task_for(2);
        msg.target_vm = Some(99);

        let result = machine.forward(&mut msg, &mut ctx, &RoutingTable::new());
        assert!(matches!(result, Err(SimError::UnknownVmOwner(99))));
    }

    #[test]
    fn commit_charges_owner_and_energy() {
        let mut users = UserRegistry::new();
        let alice = users.register("alice", 1000.0).unwrap();

        let mut machine = make_quad();
        let mut ctx = TestContext::new(2);
        let mut msg = task_for(2);
        msg.task.owner = alice;

        machine.forward(&mut msg, &mut ctx, &RoutingTable::new()).unwrap();
        machine.commit(&msg, &mut users, 0.0);

        let metrics = &users.by_id(alice).unwrap().metrics;
        assert_eq!(metrics.completed_tasks, 1);
        assert!(metrics.proc_time > 0.0);
        assert!(metrics.energy_consumption > 0.0);
    }
}

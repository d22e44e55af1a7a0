//! Programmatic model registration with fail-fast validation.
//!
//! All range checking lives here, at registration time; once a service is
//! registered its handlers treat the configuration as trusted. Registering
//! the same LP id twice is a `DuplicateService` fault.

use nimbus_core::allocator::Allocator;
use nimbus_core::scheduler::Scheduler;
use nimbus_core::users::UserRegistry;
use nimbus_core::workload::Workload;
use nimbus_core::{Lpid, SimError, UserId};
use nimbus_services::{
    LinkConfiguration, LinkState, MachineConfiguration, MachineState, MasterState, Service,
    SlaveVm, SwitchConfiguration, SwitchState, VmConfiguration, VmState, VmmState,
};
use std::collections::BTreeMap;

fn invalid(service: Lpid, reason: impl Into<String>) -> SimError {
    SimError::InvalidConfig {
        service,
        reason: reason.into(),
    }
}

/// The model under construction: all registered services plus the users.
#[derive(Debug, Clone, Default)]
pub struct SimulationModel {
    services: BTreeMap<Lpid, Service>,
    users: UserRegistry,
}

impl SimulationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered users, for owner lookups.
    pub fn users(&self) -> &UserRegistry {
        &self.users
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// The registered service ids in ascending order.
    pub fn service_ids(&self) -> impl Iterator<Item = Lpid> + '_ {
        self.services.keys().copied()
    }

    /// Tear the model apart for the kernel: services and users.
    pub fn into_parts(self) -> (BTreeMap<Lpid, Service>, UserRegistry) {
        (self.services, self.users)
    }

    pub fn register_user(&mut self, name: &str, energy_limit: f64) -> Result<UserId, SimError> {
        self.users.register(name, energy_limit)
    }

    fn register_service(&mut self, gid: Lpid, service: Service) -> Result<(), SimError> {
        if self.services.contains_key(&gid) {
            return Err(SimError::DuplicateService(gid));
        }
        self.services.insert(gid, service);
        Ok(())
    }

    pub fn register_master(
        &mut self,
        gid: Lpid,
        slaves: Vec<Lpid>,
        scheduler: Scheduler,
        workload: Workload,
    ) -> Result<(), SimError> {
        if slaves.is_empty() {
            return Err(invalid(gid, "a master needs at least one slave"));
        }

        tracing::debug!(master = gid, slaves = slaves.len(), "master registered");
        self.register_service(gid, Service::Master(MasterState::new(slaves, scheduler, workload)))
    }

    pub fn register_link(
        &mut self,
        gid: Lpid,
        from: Lpid,
        to: Lpid,
        bandwidth: f64,
        load: f64,
        latency: f64,
    ) -> Result<(), SimError> {
        if bandwidth <= 0.0 {
            return Err(invalid(gid, format!("bandwidth must be positive, got {bandwidth}")));
        }
        if !(0.0..=1.0).contains(&load) {
            return Err(invalid(gid, format!("load must be in [0, 1], got {load}")));
        }
        if latency < 0.0 {
            return Err(invalid(gid, format!("latency must be non-negative, got {latency}")));
        }

        tracing::debug!(link = gid, from, to, bandwidth, load, latency, "link registered");
        self.register_service(
            gid,
            Service::Link(LinkState::new(from, to, LinkConfiguration::new(bandwidth, load, latency))),
        )
    }

    pub fn register_switch(
        &mut self,
        gid: Lpid,
        bandwidth: f64,
        load: f64,
        latency: f64,
    ) -> Result<(), SimError> {
        if bandwidth <= 0.0 {
            return Err(invalid(gid, format!("bandwidth must be positive, got {bandwidth}")));
        }
        if !(0.0..=1.0).contains(&load) {
            return Err(invalid(gid, format!("load must be in [0, 1], got {load}")));
        }
        if latency < 0.0 {
            return Err(invalid(gid, format!("latency must be non-negative, got {latency}")));
        }

        tracing::debug!(switch = gid, bandwidth, load, latency, "switch registered");
        self.register_service(
            gid,
            Service::Switch(SwitchState::new(SwitchConfiguration::new(bandwidth, load, latency))),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn register_machine(
        &mut self,
        gid: Lpid,
        power: f64,
        load: f64,
        core_count: u32,
        memory: f64,
        disk: f64,
        wattage_idle: f64,
        wattage_max: f64,
        gpu_power: f64,
        gpu_core_count: u32,
        gpu_interconnect_bandwidth: f64,
    ) -> Result<(), SimError> {
        if power <= 0.0 {
            return Err(invalid(gid, format!("power must be positive, got {power}")));
        }
        if !(0.0..=1.0).contains(&load) {
            return Err(invalid(gid, format!("load must be in [0, 1], got {load}")));
        }
        if core_count == 0 {
            return Err(invalid(gid, "core count must be positive"));
        }
        if memory < 0.0 || disk < 0.0 {
            return Err(invalid(gid, "memory and disk must be non-negative"));
        }
        if wattage_idle < 0.0 || wattage_max < wattage_idle {
            return Err(invalid(
                gid,
                "wattage bounds must satisfy 0 <= idle <= max",
            ));
        }
        if gpu_power < 0.0 || gpu_interconnect_bandwidth < 0.0 {
            return Err(invalid(gid, "gpu parameters must be non-negative"));
        }

        let conf = MachineConfiguration::new(
            power,
            load,
            core_count,
            memory,
            disk,
            wattage_idle,
            wattage_max,
            gpu_power,
            gpu_core_count,
            gpu_interconnect_bandwidth,
        );

        tracing::debug!(machine = gid, power, load, cores = core_count, "machine registered");
        self.register_service(gid, Service::Machine(MachineState::new(conf)))
    }

    pub fn register_vm(
        &mut self,
        gid: Lpid,
        power: f64,
        load: f64,
        core_count: u32,
        memory: f64,
        disk: f64,
    ) -> Result<(), SimError> {
        if power <= 0.0 {
            return Err(invalid(gid, format!("power must be positive, got {power}")));
        }
        if !(0.0..=1.0).contains(&load) {
            return Err(invalid(gid, format!("load must be in [0, 1], got {load}")));
        }
        if core_count == 0 {
            return Err(invalid(gid, "core count must be positive"));
        }
        if memory < 0.0 || disk < 0.0 {
            return Err(invalid(gid, "memory and disk must be non-negative"));
        }

        tracing::debug!(vm = gid, power, cores = core_count, "virtual machine registered");
        self.register_service(
            gid,
            Service::VirtualMachine(VmState::new(VmConfiguration::new(
                power, load, core_count, memory, disk,
            ))),
        )
    }

    pub fn register_vmm(
        &mut self,
        gid: Lpid,
        vms: Vec<SlaveVm>,
        machines: Vec<Lpid>,
        allocator: Allocator,
        scheduler: Scheduler,
        workload: Workload,
    ) -> Result<(), SimError> {
        if machines.is_empty() {
            return Err(invalid(gid, "a vmm needs at least one machine"));
        }
        for vm in &vms {
            if vm.memory < 0.0 || vm.disk < 0.0 {
                return Err(invalid(
                    gid,
                    format!("vm {} demands must be non-negative", vm.id),
                ));
            }
        }

        tracing::debug!(vmm = gid, vms = vms.len(), machines = machines.len(), "vmm registered");
        self.register_service(
            gid,
            Service::Vmm(VmmState::new(vms, machines, allocator, scheduler, workload)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::workload::InterarrivalDistribution;

    fn make_workload() -> Workload {
        Workload::constant(
            0,
            1,
            100.0,
            80.0,
            0.0,
            InterarrivalDistribution::fixed(0.0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn registers_a_star() {
        let mut model = SimulationModel::new();
        model.register_user("alice", 100.0).unwrap();
        model
            .register_master(0, vec![2], Scheduler::round_robin(), make_workload())
            .unwrap();
        model.register_link(1, 0, 2, 50.0, 0.0, 1.0).unwrap();
        model
            .register_machine(2, 20.0, 0.0, 1, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0)
            .unwrap();

        assert_eq!(model.service_count(), 3);
        assert_eq!(model.service_ids().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_id_faults() {
        let mut model = SimulationModel::new();
        model.register_link(1, 0, 2, 50.0, 0.0, 1.0).unwrap();

        let result = model.register_switch(1, 100.0, 0.0, 0.5);
        assert!(matches!(result, Err(SimError::DuplicateService(1))));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        let mut model = SimulationModel::new();

        assert!(model.register_link(1, 0, 2, 0.0, 0.0, 1.0).is_err());
        assert!(model.register_link(1, 0, 2, 50.0, 1.5, 1.0).is_err());
        assert!(model.register_link(1, 0, 2, 50.0, 0.0, -1.0).is_err());

        assert!(model
            .register_machine(2, -5.0, 0.0, 1, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0)
            .is_err());
        assert!(model
            .register_machine(2, 20.0, 0.0, 0, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0)
            .is_err());
        assert!(model
            .register_machine(2, 20.0, 0.0, 1, 16.0, 100.0, 200.0, 100.0, 0.0, 0, 0.0)
            .is_err());

        assert!(model.register_vm(3, 10.0, 2.0, 1, 4.0, 10.0).is_err());
        assert!(model
            .register_master(0, vec![], Scheduler::round_robin(), make_workload())
            .is_err());
    }

    #[test]
    fn vmm_needs_machines() {
        let mut model = SimulationModel::new();
        let result = model.register_vmm(
            0,
            vec![],
            vec![],
            Allocator::first_fit(),
            Scheduler::round_robin(),
            make_workload(),
        );
        assert!(matches!(result, Err(SimError::InvalidConfig { .. })));
    }
}

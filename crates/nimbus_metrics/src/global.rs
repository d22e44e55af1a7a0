//! Cross-rank reduction and the global report.
//!
//! `GlobalMetrics::reduce` folds every rank's [`NodeMetrics`] (sum fields
//! summed, simulation time maxed) together with the committed user metrics
//! into one picture of the run. All averages guard against zero
//! denominators so an empty run still serializes cleanly.

use crate::NodeMetrics;
use nimbus_core::users::UserRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// The reduced, whole-simulation metrics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalMetrics {
    pub simulation_time: f64,

    pub total_processed_mflops: f64,
    pub total_communicated_mbits: f64,
    pub total_processing_time: f64,
    pub total_communication_time: f64,
    pub total_processing_waiting_time: f64,
    pub total_communication_waiting_time: f64,
    pub total_turnaround_time: f64,
    pub total_completed_tasks: u32,

    pub total_master_services: u32,
    pub total_link_services: u32,
    pub total_machine_services: u32,
    pub total_switch_services: u32,

    pub total_computational_power: f64,
    pub total_cpu_cores: u32,
    pub total_gpu_cores: u32,

    pub total_non_idle_energy: f64,
    pub total_power_idle: f64,

    users: BTreeMap<String, UserSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct UserSection {
    average_processing_time: f64,
    average_processing_waiting_time: f64,
    average_communication_time: f64,
    average_communication_waiting_time: f64,
    issued_tasks: u32,
    completed_tasks: u32,
    energy_consumption: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct TotalSection {
    processed_mflops: f64,
    communicated_mbits: f64,
    processing_waiting_time: f64,
    communication_waiting_time: f64,
    completed_tasks: u32,
    master_services: u32,
    link_services: u32,
    machine_services: u32,
    switch_services: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct AverageSection {
    processing_time: f64,
    processing_waiting_time: f64,
    communication_time: f64,
    communication_waiting_time: f64,
    turnaround_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ProcessingSection {
    peak_computational_power: f64,
    max_computational_power: f64,
    efficiency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct EnergySection {
    energy_consumption: f64,
    energy_efficiency: f64,
    average_power: f64,
    idle_power: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct SystemSection {
    processing: ProcessingSection,
    energy: EnergySection,
    total_cpu_cores: u32,
    total_gpu_cores: u32,
}

/// The serializable global report document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalReport {
    simulation_time: f64,
    total: TotalSection,
    average: AverageSection,
    system: SystemSection,
    users: BTreeMap<String, UserSection>,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

impl GlobalMetrics {
    /// Fold per-rank collectors and committed user metrics into one view.
    pub fn reduce<'a, I>(nodes: I, users: &UserRegistry) -> Self
    where
        I: IntoIterator<Item = &'a NodeMetrics>,
    {
        let mut global = GlobalMetrics::default();

        for node in nodes {
            global.simulation_time = global.simulation_time.max(node.simulation_time);
            global.total_processed_mflops += node.total_processed_mflops;
            global.total_communicated_mbits += node.total_communicated_mbits;
            global.total_processing_time += node.total_processing_time;
            global.total_communication_time += node.total_communication_time;
            global.total_processing_waiting_time += node.total_processing_waiting_time;
            global.total_communication_waiting_time += node.total_communication_waiting_time;
            global.total_turnaround_time += node.total_turnaround_time;
            global.total_completed_tasks += node.total_completed_tasks;
            global.total_master_services += node.total_master_services;
            global.total_link_services += node.total_link_services;
            global.total_machine_services += node.total_machine_services;
            global.total_switch_services += node.total_switch_services;
            global.total_computational_power += node.total_computational_power;
            global.total_cpu_cores += node.total_cpu_cores;
            global.total_gpu_cores += node.total_gpu_cores;
            global.total_non_idle_energy += node.total_non_idle_energy;
            global.total_power_idle += node.total_power_idle;
        }

        for user in users.iter() {
            let metrics = &user.metrics;
            let issued = metrics.issued_tasks as f64;
            global.users.insert(
                user.name().to_string(),
                UserSection {
                    average_processing_time: ratio(metrics.proc_time, issued),
                    average_processing_waiting_time: ratio(metrics.proc_waiting_time, issued),
                    average_communication_time: ratio(metrics.comm_time, issued),
                    average_communication_waiting_time: ratio(metrics.comm_waiting_time, issued),
                    issued_tasks: metrics.issued_tasks,
                    completed_tasks: metrics.completed_tasks,
                    energy_consumption: metrics.energy_consumption,
                },
            );
        }

        global
    }

    /// Total energy: non-idle draw plus idle wattage over the whole run.
    pub fn total_energy_consumption(&self) -> f64 {
        self.total_non_idle_energy + self.total_power_idle * self.simulation_time
    }

    /// Build the serializable report document.
    pub fn report(&self) -> GlobalReport {
        let completed = self.total_completed_tasks as f64;
        let max_computational_power = ratio(self.total_processed_mflops, self.simulation_time);
        let energy = self.total_energy_consumption();
        let average_power = ratio(energy, self.simulation_time);

        GlobalReport {
            simulation_time: self.simulation_time,
            total: TotalSection {
                processed_mflops: self.total_processed_mflops,
                communicated_mbits: self.total_communicated_mbits,
                processing_waiting_time: self.total_processing_waiting_time,
                communication_waiting_time: self.total_communication_waiting_time,
                completed_tasks: self.total_completed_tasks,
                master_services: self.total_master_services,
                link_services: self.total_link_services,
                machine_services: self.total_machine_services,
                switch_services: self.total_switch_services,
            },
            average: AverageSection {
                processing_time: ratio(self.total_processing_time, completed),
                processing_waiting_time: ratio(self.total_processing_waiting_time, completed),
                communication_time: ratio(self.total_communication_time, completed),
                communication_waiting_time: ratio(
                    self.total_communication_waiting_time,
                    completed,
                ),
                turnaround_time: ratio(self.total_turnaround_time, completed),
            },
            system: SystemSection {
                processing: ProcessingSection {
                    peak_computational_power: self.total_computational_power,
                    max_computational_power,
                    efficiency: ratio(max_computational_power, self.total_computational_power),
                },
                energy: EnergySection {
                    energy_consumption: energy,
                    energy_efficiency: ratio(max_computational_power, average_power),
                    average_power,
                    idle_power: self.total_power_idle,
                },
                total_cpu_cores: self.total_cpu_cores,
                total_gpu_cores: self.total_gpu_cores,
            },
            users: self.users.clone(),
        }
    }

    /// Log the headline figures at `info`.
    pub fn log_summary(&self) {
        tracing::info!(
            simulation_time = self.simulation_time,
            completed_tasks = self.total_completed_tasks,
            processed_mflops = self.total_processed_mflops,
            communicated_mbits = self.total_communicated_mbits,
            energy_consumption = self.total_energy_consumption(),
            "simulation finished"
        );
    }
}

impl GlobalReport {
    /// Write the prettified report to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let contents =
            serde_json::to_string_pretty(self).expect("global report is always serializable");
        std::fs::write(path, contents + "\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MasterMetrics;

    #[test]
    fn reduce_sums_and_maxes() {
        let mut a = NodeMetrics::new(0);
        a.report_master(
            0,
            &MasterMetrics {
                completed_tasks: 2,
                total_turnaround_time: 10.0,
            },
        );
        a.observe_simulation_time(8.0);

        let mut b = NodeMetrics::new(1);
        b.report_master(
            5,
            &MasterMetrics {
                completed_tasks: 3,
                total_turnaround_time: 12.0,
            },
        );
        b.observe_simulation_time(11.0);

        let users = UserRegistry::new();
        let global = GlobalMetrics::reduce([&a, &b], &users);

        assert_eq!(global.total_completed_tasks, 5);
        assert_eq!(global.total_master_services, 2);
        assert_eq!(global.simulation_time, 11.0);
        assert!((global.total_turnaround_time - 22.0).abs() < 1e-12);
    }

    #[test]
    fn empty_run_serializes_without_nan() {
        let users = UserRegistry::new();
        let global = GlobalMetrics::reduce([], &users);
        let report = global.report();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["average"]["turnaround_time"], 0.0);
        assert_eq!(json["system"]["processing"]["efficiency"], 0.0);
    }

    #[test]
    fn report_has_all_sections() {
        let mut users = UserRegistry::new();
        users.register("alice", 100.0).unwrap();

        let node = NodeMetrics::new(0);
        let report = GlobalMetrics::reduce([&node], &users).report();
        let json = serde_json::to_value(&report).unwrap();

        for section in ["total", "average", "system", "users"] {
            assert!(json.get(section).is_some(), "missing `{section}`");
        }
        assert!(json["system"]["processing"].is_object());
        assert!(json["system"]["energy"].is_object());
        assert!(json["users"]["alice"].is_object());
    }

    #[test]
    fn energy_adds_idle_draw_over_runtime() {
        let mut node = NodeMetrics::new(0);
        node.total_non_idle_energy = 50.0;
        node.total_power_idle = 10.0;
        node.observe_simulation_time(4.0);

        let users = UserRegistry::new();
        let global = GlobalMetrics::reduce([&node], &users);
        assert!((global.total_energy_consumption() - 90.0).abs() < 1e-12);
    }
}

//! Per-rank metrics collection.
//!
//! Each rank owns one [`NodeMetrics`]. Service `finish` handlers notify it
//! once per LP after the event horizon; it is single-threaded and never
//! touched from forward/reverse paths.

use crate::{LinkMetrics, MachineMetrics, MasterMetrics, SwitchMetrics};
use nimbus_core::Lpid;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One LP's entry in the per-node report file.
///
/// The `type` tag distinguishes the service classes; guest VMs report as
/// machines and VMMs as masters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceReport {
    Master {
        completed_tasks: u32,
        total_turnaround_time: f64,
        average_turnaround_time: f64,
        simulated_on: String,
    },
    Link {
        upward_communicated_mbits: f64,
        downward_communicated_mbits: f64,
        upward_communicated_packets: u32,
        downward_communicated_packets: u32,
        upward_communicated_time: f64,
        downward_communicated_time: f64,
        upward_waiting_time: f64,
        downward_waiting_time: f64,
        simulated_on: String,
    },
    Machine {
        processed_mflops: f64,
        processed_time: f64,
        processed_tasks: u32,
        forwarded_packets: u32,
        energy_consumption: f64,
        average_processing_time: f64,
        idleness: f64,
        simulated_on: String,
    },
    Switch {
        upward_communicated_mbits: f64,
        downward_communicated_mbits: f64,
        upward_communicated_packets: u32,
        downward_communicated_packets: u32,
        simulated_on: String,
    },
}

/// The per-rank collector, reduced across ranks into the global report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetrics {
    /// Rank this collector belongs to.
    pub rank: u32,

    /// Latest activity observed on this rank (max, not sum).
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

    /// Aggregate peak computational power (Mflops).
    pub total_computational_power: f64,
    pub total_cpu_cores: u32,
    pub total_gpu_cores: u32,

    pub total_non_idle_energy: f64,
    pub total_power_idle: f64,

    reports: BTreeMap<String, ServiceReport>,
}

impl NodeMetrics {
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            ..Self::default()
        }
    }

    /// The label written into each report entry.
    pub fn node_name(&self) -> String {
        format!("node_{}", self.rank)
    }

    /// Track the latest activity timestamp seen on this rank.
    pub fn observe_simulation_time(&mut self, time: f64) {
        if time > self.simulation_time {
            self.simulation_time = time;
        }
    }

    /// File a master's report entry and roll its totals up.
    pub fn report_master(&mut self, gid: Lpid, metrics: &MasterMetrics) {
        self.total_master_services += 1;
        self.total_completed_tasks += metrics.completed_tasks;
        self.total_turnaround_time += metrics.total_turnaround_time;

        self.insert(
            gid,
            ServiceReport::Master {
                completed_tasks: metrics.completed_tasks,
                total_turnaround_time: metrics.total_turnaround_time,
                average_turnaround_time: metrics.average_turnaround_time(),
                simulated_on: self.node_name(),
            },
        );
    }

    /// File a link's report entry and roll its totals up.
    pub fn report_link(&mut self, gid: Lpid, metrics: &LinkMetrics) {
        self.total_link_services += 1;
        self.total_communicated_mbits += metrics.total_mbits();
        self.total_communication_time += metrics.total_comm_time();
        self.total_communication_waiting_time += metrics.total_waiting_time();

        self.insert(
            gid,
            ServiceReport::Link {
                upward_communicated_mbits: metrics.upward_comm_mbits,
                downward_communicated_mbits: metrics.downward_comm_mbits,
                upward_communicated_packets: metrics.upward_comm_packets,
                downward_communicated_packets: metrics.downward_comm_packets,
                upward_communicated_time: metrics.upward_comm_time,
                downward_communicated_time: metrics.downward_comm_time,
                upward_waiting_time: metrics.upward_waiting_time,
                downward_waiting_time: metrics.downward_waiting_time,
                simulated_on: self.node_name(),
            },
        );
    }

    /// File a machine's report entry and roll its totals up.
    ///
    /// `power`, `cpu_cores`, `gpu_cores` and `wattage_idle` come from the
    /// machine's configuration; `idleness` and `last_activity` from its
    /// queueing state at finish time.
    #[allow(clippy::too_many_arguments)]
    pub fn report_machine(
        &mut self,
        gid: Lpid,
        metrics: &MachineMetrics,
        power: f64,
        cpu_cores: u32,
        gpu_cores: u32,
        wattage_idle: f64,
        idleness: f64,
        last_activity: f64,
    ) {
        self.total_machine_services += 1;
        self.total_processed_mflops += metrics.proc_mflops;
        self.total_processing_time += metrics.proc_time;
        self.total_processing_waiting_time += metrics.proc_waiting_time;
        self.total_computational_power += power;
        self.total_cpu_cores += cpu_cores;
        self.total_gpu_cores += gpu_cores;
        self.total_non_idle_energy += metrics.energy_consumption;
        self.total_power_idle += wattage_idle;
        self.observe_simulation_time(last_activity);

        self.insert(
            gid,
            ServiceReport::Machine {
                processed_mflops: metrics.proc_mflops,
                processed_time: metrics.proc_time,
                processed_tasks: metrics.proc_tasks,
                forwarded_packets: metrics.forwarded_packets,
                energy_consumption: metrics.energy_consumption,
                average_processing_time: metrics.average_proc_time(),
                idleness,
                simulated_on: self.node_name(),
            },
        );
    }

    /// File a switch's report entry and roll its totals up.
    pub fn report_switch(&mut self, gid: Lpid, metrics: &SwitchMetrics) {
        self.total_switch_services += 1;
        self.total_communicated_mbits +=
            metrics.upward_comm_mbits + metrics.downward_comm_mbits;

        self.insert(
            gid,
            ServiceReport::Switch {
                upward_communicated_mbits: metrics.upward_comm_mbits,
                downward_communicated_mbits: metrics.downward_comm_mbits,
                upward_communicated_packets: metrics.upward_comm_packets,
                downward_communicated_packets: metrics.downward_comm_packets,
                simulated_on: self.node_name(),
            },
        );
    }

    fn insert(&mut self, gid: Lpid, report: ServiceReport) {
        self.reports.insert(gid.to_string(), report);
    }

    /// Entries filed so far, keyed by LP id.
    pub fn reports(&self) -> &BTreeMap<String, ServiceReport> {
        &self.reports
    }

    /// Write `node_<rank>.json` (prettified) into `dir`.
    pub fn write_report<P: AsRef<Path>>(&self, dir: P) -> std::io::Result<std::path::PathBuf> {
        let path = dir.as_ref().join(format!("{}.json", self.node_name()));
        let contents = serde_json::to_string_pretty(&self.reports)
            .expect("node report is always serializable");
        std::fs::write(&path, contents + "\n")?;
        Ok(path)
    }
}

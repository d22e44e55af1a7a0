//! Per-service metric accumulators.
//!
//! Every field here is touched by a forward handler and exactly untouched
//! by the matching reverse handler (increment/decrement, add/subtract), so
//! the structs need no rollback scratch of their own.

use serde::Serialize;

/// Master accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MasterMetrics {
    /// Tasks that have completed their round trip.
    pub completed_tasks: u32,

    /// Sum of per-task turnaround times (seconds).
    pub total_turnaround_time: f64,
}

impl MasterMetrics {
    /// Average turnaround per completed task.
    pub fn average_turnaround_time(&self) -> f64 {
        if self.completed_tasks == 0 {
            0.0
        } else {
            self.total_turnaround_time / self.completed_tasks as f64
        }
    }
}

/// Bidirectional link accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LinkMetrics {
    pub upward_comm_mbits: f64,
    pub downward_comm_mbits: f64,

    pub upward_comm_packets: u32,
    pub downward_comm_packets: u32,

    pub upward_comm_time: f64,
    pub downward_comm_time: f64,

    pub upward_waiting_time: f64,
    pub downward_waiting_time: f64,
}

impl LinkMetrics {
    pub fn total_mbits(&self) -> f64 {
        self.upward_comm_mbits + self.downward_comm_mbits
    }

    pub fn total_comm_time(&self) -> f64 {
        self.upward_comm_time + self.downward_comm_time
    }

    pub fn total_waiting_time(&self) -> f64 {
        self.upward_waiting_time + self.downward_waiting_time
    }
}

/// Switch accounting (G/G/inf, so no queueing figures).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SwitchMetrics {
    pub upward_comm_mbits: f64,
    pub downward_comm_mbits: f64,

    pub upward_comm_packets: u32,
    pub downward_comm_packets: u32,
}

/// Machine accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MachineMetrics {
    /// Mflops executed by this machine.
    pub proc_mflops: f64,

    /// Seconds spent executing tasks.
    pub proc_time: f64,

    /// Seconds tasks waited for a free core.
    pub proc_waiting_time: f64,

    /// Tasks executed to completion.
    pub proc_tasks: u32,

    /// Packets relayed to other services.
    pub forwarded_packets: u32,

    /// VMs currently hosted.
    pub allocated_vms: u32,

    /// Non-idle energy drawn while executing (Joules).
    pub energy_consumption: f64,
}

impl MachineMetrics {
    pub fn average_proc_time(&self) -> f64 {
        if self.proc_tasks == 0 {
            0.0
        } else {
            self.proc_time / self.proc_tasks as f64
        }
    }
}

/// Guest virtual machine accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VmMetrics {
    pub proc_mflops: f64,
    pub proc_time: f64,
    pub proc_waiting_time: f64,
    pub proc_tasks: u32,
}

/// Virtual machine monitor accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct VmmMetrics {
    /// Tasks completed during the scheduling phase.
    pub tasks_proc: u32,

    /// VMs placed successfully.
    pub vms_alloc: u32,

    /// VMs no machine could host.
    pub vms_rejected: u32,

    /// Sum of scheduled-task turnaround times (seconds).
    pub total_turnaround_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_average_guards_zero() {
        let metrics = MasterMetrics::default();
        assert_eq!(metrics.average_turnaround_time(), 0.0);

        let metrics = MasterMetrics {
            completed_tasks: 2,
            total_turnaround_time: 20.4,
        };
        assert!((metrics.average_turnaround_time() - 10.2).abs() < 1e-12);
    }

    #[test]
    fn link_totals_sum_directions() {
        let metrics = LinkMetrics {
            upward_comm_mbits: 80.0,
            downward_comm_mbits: 80.0,
            upward_comm_time: 2.6,
            downward_comm_time: 2.6,
            ..LinkMetrics::default()
        };

        assert_eq!(metrics.total_mbits(), 160.0);
        assert!((metrics.total_comm_time() - 5.2).abs() < 1e-12);
    }

    #[test]
    fn machine_average_guards_zero() {
        assert_eq!(MachineMetrics::default().average_proc_time(), 0.0);
    }
}

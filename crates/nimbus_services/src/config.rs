//! Service configurations.
//!
//! Configurations are immutable after registration; mutable queueing and
//! resource state lives in the service structs. Range validation happens in
//! the model builder, which knows the LP id to blame.

/// Link parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfiguration {
    /// Bandwidth in Mbits/s.
    pub bandwidth: f64,

    /// Background load factor in [0, 1].
    pub load: f64,

    /// Latency in seconds.
    pub latency: f64,
}

impl LinkConfiguration {
    pub fn new(bandwidth: f64, load: f64, latency: f64) -> Self {
        Self {
            bandwidth,
            load,
            latency,
        }
    }

    /// Time to push `comm_size` Mbits through this link.
    pub fn time_to_comm(&self, comm_size: f64) -> f64 {
        self.latency + comm_size / ((1.0 - self.load) * self.bandwidth)
    }
}

/// Switch parameters. Same communication model as a link, but G/G/inf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchConfiguration {
    pub bandwidth: f64,
    pub load: f64,
    pub latency: f64,
}

impl SwitchConfiguration {
    pub fn new(bandwidth: f64, load: f64, latency: f64) -> Self {
        Self {
            bandwidth,
            load,
            latency,
        }
    }

    /// Time to push `comm_size` Mbits through this switch.
    pub fn time_to_comm(&self, comm_size: f64) -> f64 {
        self.latency + comm_size / ((1.0 - self.load) * self.bandwidth)
    }
}

/// Machine parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineConfiguration {
    power_per_core: f64,
    load: f64,
    core_count: u32,
    memory: f64,
    disk: f64,
    wattage_idle: f64,
    wattage_max: f64,
    wattage_per_core: f64,
    gpu_power: f64,
    gpu_core_count: u32,
    gpu_interconnect_bandwidth: f64,
}

impl MachineConfiguration {
    /// `power` is the machine's total computational power in Mflops, split
    /// evenly over `core_count` cores.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
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
    ) -> Self {
        Self {
            power_per_core: power / core_count as f64,
            load,
            core_count,
            memory,
            disk,
            wattage_idle,
            wattage_max,
            wattage_per_core: (wattage_max - wattage_idle) / core_count as f64,
            gpu_power,
            gpu_core_count,
            gpu_interconnect_bandwidth,
        }
    }

    /// Time for one core to execute `proc_size` Mflops.
    pub fn time_to_proc(&self, proc_size: f64) -> f64 {
        proc_size / ((1.0 - self.load) * self.power_per_core)
    }

    /// Total computational power in Mflops.
    pub fn power(&self) -> f64 {
        self.power_per_core * self.core_count as f64
    }

    pub fn power_per_core(&self) -> f64 {
        self.power_per_core
    }

    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn core_count(&self) -> u32 {
        self.core_count
    }

    pub fn memory(&self) -> f64 {
        self.memory
    }

    pub fn disk(&self) -> f64 {
        self.disk
    }

    pub fn wattage_idle(&self) -> f64 {
        self.wattage_idle
    }

    pub fn wattage_max(&self) -> f64 {
        self.wattage_max
    }

    /// Non-idle wattage drawn by one busy core.
    pub fn wattage_per_core(&self) -> f64 {
        self.wattage_per_core
    }

    pub fn gpu_power(&self) -> f64 {
        self.gpu_power
    }

    pub fn gpu_core_count(&self) -> u32 {
        self.gpu_core_count
    }

    pub fn gpu_interconnect_bandwidth(&self) -> f64 {
        self.gpu_interconnect_bandwidth
    }
}

/// Guest VM parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VmConfiguration {
    power_per_core: f64,
    load: f64,
    core_count: u32,
    memory: f64,
    disk: f64,
}

impl VmConfiguration {
    pub fn new(power: f64, load: f64, core_count: u32, memory: f64, disk: f64) -> Self {
        Self {
            power_per_core: power / core_count as f64,
            load,
            core_count,
            memory,
            disk,
        }
    }

    /// Time for one virtual core to execute `proc_size` Mflops.
    pub fn time_to_proc(&self, proc_size: f64) -> f64 {
        proc_size / ((1.0 - self.load) * self.power_per_core)
    }

    pub fn power(&self) -> f64 {
        self.power_per_core * self.core_count as f64
    }

    pub fn core_count(&self) -> u32 {
        self.core_count
    }

    pub fn memory(&self) -> f64 {
        self.memory
    }

    pub fn disk(&self) -> f64 {
        self.disk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_comm_time() {
        // latency 1s + 80 Mbits over 50 Mbit/s = 2.6s
        let conf = LinkConfiguration::new(50.0, 0.0, 1.0);
        assert!((conf.time_to_comm(80.0) - 2.6).abs() < 1e-12);
    }

    #[test]
    fn link_load_shrinks_effective_bandwidth() {
        let idle = LinkConfiguration::new(50.0, 0.0, 0.0);
        let busy = LinkConfiguration::new(50.0, 0.5, 0.0);
        assert!((busy.time_to_comm(80.0) - 2.0 * idle.time_to_comm(80.0)).abs() < 1e-12);
    }

    #[test]
    fn machine_splits_power_over_cores() {
        let conf =
            MachineConfiguration::new(20.0, 0.0, 1, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0);
        assert!((conf.time_to_proc(100.0) - 5.0).abs() < 1e-12);

        let quad = MachineConfiguration::new(20.0, 0.0, 4, 16.0, 100.0, 0.0, 0.0, 0.0, 0, 0.0);
        assert!((quad.power_per_core() - 5.0).abs() < 1e-12);
        assert!((quad.power() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn machine_wattage_per_core() {
        let conf =
            MachineConfiguration::new(20.0, 0.0, 4, 16.0, 100.0, 100.0, 220.0, 0.0, 0, 0.0);
        assert!((conf.wattage_per_core() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn vm_proc_time() {
        let conf = VmConfiguration::new(10.0, 0.0, 2, 4.0, 10.0);
        assert!((conf.time_to_proc(10.0) - 2.0).abs() < 1e-12);
    }
}

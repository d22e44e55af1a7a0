//! Built-in star topology for benchmark runs without a model file.
//!
//! One master fans out over `machine_amount` link/machine pairs: the master
//! is LP 0, links take the odd ids and machines the even ids, mirroring
//! the layout the `--machine-amount`/`--task-amount` flags always drove.

use nimbus_core::routing::RoutingTable;
use nimbus_core::scheduler::Scheduler;
use nimbus_core::workload::{InterarrivalDistribution, Workload};
use nimbus_core::{Lpid, SimError};
use nimbus_model::SimulationModel;

/// Processing demand per benchmark task (Mflops).
const TASK_PROC_SIZE: f64 = 100.0;

/// Communication demand per benchmark task (Mbits).
const TASK_COMM_SIZE: f64 = 80.0;

/// Mean interarrival gap between generated tasks (seconds).
const TASK_INTERARRIVAL_MEAN: f64 = 0.1;

/// Build the star model and its routing table.
pub fn build(
    machine_amount: u32,
    task_amount: u32,
) -> Result<(SimulationModel, RoutingTable), SimError> {
    let mut model = SimulationModel::new();
    let owner = model.register_user("benchmark", 0.0)?;

    let mut slaves = Vec::with_capacity(machine_amount as usize);
    let mut routes = RoutingTable::new();

    for index in 0..machine_amount as Lpid {
        let link = 2 * index + 1;
        let machine = 2 * index + 2;

        model.register_link(link, 0, machine, 50.0, 0.0, 1.0)?;
        model.register_machine(machine, 20.0, 0.0, 8, 16.0, 100.0, 100.0, 220.0, 0.0, 0, 0.0)?;

        routes.insert(0, machine, vec![link, machine]);
        slaves.push(machine);
    }

    let workload = Workload::constant(
        owner,
        task_amount,
        TASK_PROC_SIZE,
        TASK_COMM_SIZE,
        0.0,
        InterarrivalDistribution::poisson(TASK_INTERARRIVAL_MEAN)?,
    )?;

    model.register_master(0, slaves, Scheduler::round_robin(), workload)?;

    Ok((model, routes))
}

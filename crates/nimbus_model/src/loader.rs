//! Strict JSON model loader.
//!
//! The document has three top-level sections - `users`, `workloads`,
//! `services` - and unknown keys anywhere are errors. Type-specific
//! attributes (for example the uniform workload's size intervals) are
//! declared optional at the serde layer and enforced per type here, so a
//! missing attribute is reported with its section and index rather than as
//! an opaque parse failure.

use crate::SimulationModel;
use nimbus_core::scheduler::Scheduler;
use nimbus_core::workload::{InterarrivalDistribution, TwoStageDist, Workload};
use nimbus_core::{Lpid, SimError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Model loading failure.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("model is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{entity} listed at index {index} does not have the `{attribute}` attribute")]
    MissingAttribute {
        entity: &'static str,
        index: usize,
        attribute: &'static str,
    },

    #[error("unexpected workload type `{0}`")]
    UnknownWorkloadType(String),

    #[error("unexpected scheduler `{0}`")]
    UnknownSchedulerType(String),

    #[error("unexpected interarrival distribution type `{0}`")]
    UnknownInterarrivalType(String),

    #[error("no workload has been loaded for master {0}")]
    MissingWorkload(Lpid),

    #[error(transparent)]
    Sim(#[from] SimError),
}

/// A registered user entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserDoc {
    pub name: String,
    pub energy_consumption_limit: f64,
}

/// Interarrival distribution entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterarrivalDoc {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
}

/// A workload entry. Type-specific attributes are optional here and
/// enforced against `type` during the build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadDoc {
    #[serde(rename = "type")]
    pub kind: String,

    pub owner: String,
    pub remaining_tasks: u32,
    pub master_id: Lpid,
    pub computing_offload: f64,
    pub interarrival_type: InterarrivalDoc,

    // constant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comm_size: Option<f64>,

    // uniform
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_proc_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_proc_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_comm_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_comm_size: Option<f64>,

    // two_stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med_proc_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub med_comm_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proc_stage_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comm_stage_probability: Option<f64>,
}

/// A master entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MasterDoc {
    pub id: Lpid,
    pub scheduler: String,
    pub slaves: Vec<Lpid>,
}

/// A machine entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineDoc {
    pub id: Lpid,
    pub power: f64,
    pub load: f64,
    pub core_count: u32,

    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub disk: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_core_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_interconnection_bandwidth: Option<f64>,

    pub wattage_idle: f64,
    pub wattage_max: f64,
}

/// A link entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkDoc {
    pub id: Lpid,
    pub from: Lpid,
    pub to: Lpid,
    pub bandwidth: f64,
    pub load: f64,
    pub latency: f64,
}

/// A switch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchDoc {
    pub id: Lpid,
    pub bandwidth: f64,
    pub load: f64,
    pub latency: f64,
}

/// The `services` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServicesDoc {
    pub masters: Vec<MasterDoc>,
    pub machines: Vec<MachineDoc>,
    pub links: Vec<LinkDoc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switches: Vec<SwitchDoc>,
}

/// The whole model document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelDocument {
    pub users: Vec<UserDoc>,
    pub workloads: Vec<WorkloadDoc>,
    pub services: ServicesDoc,
}

impl ModelDocument {
    /// Parse a document from JSON text.
    pub fn parse(contents: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Build the registered model out of this document.
    pub fn build(&self) -> Result<SimulationModel, ModelError> {
        let mut model = SimulationModel::new();

        for user in &self.users {
            model.register_user(&user.name, user.energy_consumption_limit)?;
        }

        // Workloads are staged by master id and claimed as the masters are
        // registered.
        let mut workloads: HashMap<Lpid, Workload> = HashMap::new();
        for (index, doc) in self.workloads.iter().enumerate() {
            workloads.insert(doc.master_id, build_workload(doc, index, &model)?);
        }

        for master in &self.services.masters {
            let workload = workloads
                .remove(&master.id)
                .ok_or(ModelError::MissingWorkload(master.id))?;
            let scheduler = build_scheduler(&master.scheduler)?;
            model.register_master(master.id, master.slaves.clone(), scheduler, workload)?;
        }

        for machine in &self.services.machines {
            model.register_machine(
                machine.id,
                machine.power,
                machine.load,
                machine.core_count,
                machine.memory,
                machine.disk,
                machine.wattage_idle,
                machine.wattage_max,
                machine.gpu_power.unwrap_or(0.0),
                machine.gpu_core_count.unwrap_or(0),
                machine.gpu_interconnection_bandwidth.unwrap_or(0.0),
            )?;
        }

        for link in &self.services.links {
            model.register_link(
                link.id,
                link.from,
                link.to,
                link.bandwidth,
                link.load,
                link.latency,
            )?;
        }

        for switch in &self.services.switches {
            model.register_switch(switch.id, switch.bandwidth, switch.load, switch.latency)?;
        }

        tracing::debug!(
            users = self.users.len(),
            workloads = self.workloads.len(),
            services = model.service_count(),
            "model loaded"
        );
        Ok(model)
    }
}

fn require<T: Copy>(
    field: Option<T>,
    index: usize,
    attribute: &'static str,
) -> Result<T, ModelError> {
    field.ok_or(ModelError::MissingAttribute {
        entity: "workload",
        index,
        attribute,
    })
}

fn build_interarrival(
    doc: &InterarrivalDoc,
    index: usize,
) -> Result<InterarrivalDistribution, ModelError> {
    match doc.kind.as_str() {
        "poisson" => {
            let lambda = require(doc.lambda, index, "lambda")?;
            Ok(InterarrivalDistribution::poisson(lambda)?)
        }
        "fixed" => {
            let interval = require(doc.interval, index, "interval")?;
            Ok(InterarrivalDistribution::fixed(interval)?)
        }
        other => Err(ModelError::UnknownInterarrivalType(other.to_string())),
    }
}

fn build_workload(
    doc: &WorkloadDoc,
    index: usize,
    model: &SimulationModel,
) -> Result<Workload, ModelError> {
    let owner = model.users().id_of(&doc.owner)?;
    let interarrival = build_interarrival(&doc.interarrival_type, index)?;

    let workload = match doc.kind.as_str() {
        "constant" => Workload::constant(
            owner,
            doc.remaining_tasks,
            require(doc.proc_size, index, "proc_size")?,
            require(doc.comm_size, index, "comm_size")?,
            doc.computing_offload,
            interarrival,
        )?,
        "uniform" => Workload::uniform(
            owner,
            doc.remaining_tasks,
            require(doc.min_proc_size, index, "min_proc_size")?,
            require(doc.max_proc_size, index, "max_proc_size")?,
            require(doc.min_comm_size, index, "min_comm_size")?,
            require(doc.max_comm_size, index, "max_comm_size")?,
            doc.computing_offload,
            interarrival,
        )?,
        "two_stage" => {
            let proc = TwoStageDist::new(
                require(doc.min_proc_size, index, "min_proc_size")?,
                require(doc.med_proc_size, index, "med_proc_size")?,
                require(doc.max_proc_size, index, "max_proc_size")?,
                require(doc.proc_stage_probability, index, "proc_stage_probability")?,
            )?;
            let comm = TwoStageDist::new(
                require(doc.min_comm_size, index, "min_comm_size")?,
                require(doc.med_comm_size, index, "med_comm_size")?,
                require(doc.max_comm_size, index, "max_comm_size")?,
                require(doc.comm_stage_probability, index, "comm_stage_probability")?,
            )?;
            Workload::two_stage(
                owner,
                doc.remaining_tasks,
                proc,
                comm,
                doc.computing_offload,
                interarrival,
            )?
        }
        "null" => Workload::null(owner),
        other => return Err(ModelError::UnknownWorkloadType(other.to_string())),
    };

    Ok(workload)
}

fn build_scheduler(name: &str) -> Result<Scheduler, ModelError> {
    match name {
        "RoundRobin" => Ok(Scheduler::round_robin()),
        "Workqueue" => Ok(Scheduler::workqueue()),
        other => Err(ModelError::UnknownSchedulerType(other.to_string())),
    }
}

/// Load and build a model from JSON text.
pub fn load_str(contents: &str) -> Result<SimulationModel, ModelError> {
    ModelDocument::parse(contents)?.build()
}

/// Load and build a model from a file.
pub fn load_path<P: AsRef<Path>>(path: P) -> Result<SimulationModel, ModelError> {
    let contents = std::fs::read_to_string(path)?;
    load_str(&contents)
}

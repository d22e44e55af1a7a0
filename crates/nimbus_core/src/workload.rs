//! Reversible workload generation.
//!
//! A workload is a stateful stream of `(proc_size, comm_size)` demands plus
//! an interarrival distribution for pacing. `remaining` counts down on
//! forward generation and back up on reverse; every RNG draw made while
//! generating has exactly one matching `reverse_uniform` in the reverse
//! path, keeping the LP's stream replayable after rollback.

use crate::{ReversibleRng, SimError, SimTime, UserId};

/// Pacing between consecutive generations.
///
/// `Fixed` consumes no randomness, so its reverse is a no-op. `Poisson`
/// draws one exponential variate, undone by one uniform reverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterarrivalDistribution {
    Fixed { interval: SimTime },
    Poisson { mean: SimTime },
}

impl InterarrivalDistribution {
    /// A fixed interarrival gap.
    pub fn fixed(interval: SimTime) -> Result<Self, SimError> {
        if !interval.is_finite() {
            return Err(SimError::InvalidWorkload(
                "fixed interarrival interval must be finite".into(),
            ));
        }
        if interval < 0.0 {
            return Err(SimError::InvalidWorkload(
                "fixed interarrival interval must be non-negative".into(),
            ));
        }
        Ok(Self::Fixed { interval })
    }

    /// Exponentially distributed gaps with the given mean.
    pub fn poisson(mean: SimTime) -> Result<Self, SimError> {
        if !mean.is_finite() || mean <= 0.0 {
            return Err(SimError::InvalidWorkload(
                "poisson interarrival mean must be positive and finite".into(),
            ));
        }
        Ok(Self::Poisson { mean })
    }

    /// Draw the next gap.
    pub fn generate(&self, rng: &mut ReversibleRng) -> SimTime {
        match self {
            Self::Fixed { interval } => *interval,
            Self::Poisson { mean } => rng.next_exponential(*mean),
        }
    }

    /// Undo the draws of one `generate` call.
    pub fn reverse(&self, rng: &mut ReversibleRng) {
        match self {
            Self::Fixed { .. } => {}
            Self::Poisson { .. } => rng.reverse_uniform(),
        }
    }
}

/// One stage-selection distribution of a two-stage uniform workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TwoStageDist {
    pub minimum: f64,
    pub medium: f64,
    pub maximum: f64,

    /// Probability of drawing from the `[minimum, medium]` stage.
    pub probability: f64,
}

impl TwoStageDist {
    pub fn new(
        minimum: f64,
        medium: f64,
        maximum: f64,
        probability: f64,
    ) -> Result<Self, SimError> {
        if minimum <= 0.0 || medium <= 0.0 || maximum <= 0.0 {
            return Err(SimError::InvalidWorkload(
                "two-stage sizes must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&probability) {
            return Err(SimError::InvalidWorkload(
                "two-stage selection probability must be in [0, 1]".into(),
            ));
        }
        Ok(Self {
            minimum,
            medium,
            maximum,
            probability,
        })
    }

    /// Two draws: one to pick the stage, one inside it. Always two, so the
    /// reverse never needs to know which stage was taken.
    fn draw(&self, rng: &mut ReversibleRng) -> f64 {
        let stage = rng.next_uniform();
        let inner = rng.next_uniform();
        if stage < self.probability {
            self.minimum + inner * (self.medium - self.minimum)
        } else {
            self.medium + inner * (self.maximum - self.medium)
        }
    }

    fn reverse(&self, rng: &mut ReversibleRng) {
        rng.reverse_uniform();
        rng.reverse_uniform();
    }
}

/// Demand shape of a workload stream.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Constant {
        proc_size: f64,
        comm_size: f64,
    },
    Uniform {
        min_proc: f64,
        max_proc: f64,
        min_comm: f64,
        max_comm: f64,
    },
    TwoStage {
        proc: TwoStageDist,
        comm: TwoStageDist,
    },
    Null,
}

/// A reversible task stream owned by a generator service.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    owner: UserId,
    remaining: u32,
    offload: f64,
    interarrival: InterarrivalDistribution,
    shape: Shape,
}

impl Workload {
    fn validated(
        owner: UserId,
        remaining: u32,
        offload: f64,
        interarrival: InterarrivalDistribution,
        shape: Shape,
    ) -> Result<Self, SimError> {
        if !(0.0..=1.0).contains(&offload) {
            return Err(SimError::InvalidWorkload(
                "computing offload must be in [0, 1]".into(),
            ));
        }
        Ok(Self {
            owner,
            remaining,
            offload,
            interarrival,
            shape,
        })
    }

    /// Every task demands the same sizes.
    pub fn constant(
        owner: UserId,
        remaining: u32,
        proc_size: f64,
        comm_size: f64,
        offload: f64,
        interarrival: InterarrivalDistribution,
    ) -> Result<Self, SimError> {
        if proc_size <= 0.0 {
            return Err(SimError::InvalidWorkload(
                "constant processing size must be positive".into(),
            ));
        }
        if comm_size <= 0.0 {
            return Err(SimError::InvalidWorkload(
                "constant communication size must be positive".into(),
            ));
        }
        Self::validated(
            owner,
            remaining,
            offload,
            interarrival,
            Shape::Constant {
                proc_size,
                comm_size,
            },
        )
    }

    /// Sizes drawn uniformly from the given intervals.
    pub fn uniform(
        owner: UserId,
        remaining: u32,
        min_proc: f64,
        max_proc: f64,
        min_comm: f64,
        max_comm: f64,
        offload: f64,
        interarrival: InterarrivalDistribution,
    ) -> Result<Self, SimError> {
        for (label, value) in [
            ("minimum processing", min_proc),
            ("maximum processing", max_proc),
            ("minimum communication", min_comm),
            ("maximum communication", max_comm),
        ] {
            if value <= 0.0 {
                return Err(SimError::InvalidWorkload(format!(
                    "{label} size must be positive"
                )));
            }
        }
        if min_proc > max_proc || min_comm > max_comm {
            return Err(SimError::InvalidWorkload(
                "uniform interval minimum exceeds maximum".into(),
            ));
        }
        Self::validated(
            owner,
            remaining,
            offload,
            interarrival,
            Shape::Uniform {
                min_proc,
                max_proc,
                min_comm,
                max_comm,
            },
        )
    }

    /// Sizes drawn from two-stage uniform distributions.
    pub fn two_stage(
        owner: UserId,
        remaining: u32,
        proc: TwoStageDist,
        comm: TwoStageDist,
        offload: f64,
        interarrival: InterarrivalDistribution,
    ) -> Result<Self, SimError> {
        Self::validated(
            owner,
            remaining,
            offload,
            interarrival,
            Shape::TwoStage { proc, comm },
        )
    }

    /// A workload that never produces tasks.
    pub fn null(owner: UserId) -> Self {
        Self {
            owner,
            remaining: 0,
            offload: 0.0,
            interarrival: InterarrivalDistribution::Fixed { interval: 0.0 },
            shape: Shape::Null,
        }
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn offload(&self) -> f64 {
        self.offload
    }

    /// Draw the next `(proc_size, comm_size)` pair and consume one task.
    ///
    /// Callers must check `remaining() > 0` first.
    pub fn generate(&mut self, rng: &mut ReversibleRng) -> (f64, f64) {
        debug_assert!(self.remaining > 0, "generate called on a drained workload");
        self.remaining -= 1;
        self.draw_sizes(rng)
    }

    /// Draw a size pair without consuming a task.
    ///
    /// Used for traffic that rides the workload's distributions but is not
    /// part of the task budget, such as VM placement transfers.
    pub fn generate_sizes(&mut self, rng: &mut ReversibleRng) -> (f64, f64) {
        self.draw_sizes(rng)
    }

    fn draw_sizes(&mut self, rng: &mut ReversibleRng) -> (f64, f64) {
        match &self.shape {
            Shape::Constant {
                proc_size,
                comm_size,
            } => (*proc_size, *comm_size),
            Shape::Uniform {
                min_proc,
                max_proc,
                min_comm,
                max_comm,
            } => {
                let proc = min_proc + rng.next_uniform() * (max_proc - min_proc);
                let comm = min_comm + rng.next_uniform() * (max_comm - min_comm);
                (proc, comm)
            }
            Shape::TwoStage { proc, comm } => {
                let p = proc.draw(rng);
                let c = comm.draw(rng);
                (p, c)
            }
            Shape::Null => (0.0, 0.0),
        }
    }

    /// Undo one `generate` call: restore the task count and the RNG stream.
    pub fn reverse_generate(&mut self, rng: &mut ReversibleRng) {
        self.reverse_sizes(rng);
        self.remaining += 1;
    }

    /// Undo one `generate_sizes` call.
    pub fn reverse_sizes(&mut self, rng: &mut ReversibleRng) {
        match &self.shape {
            Shape::Constant { .. } | Shape::Null => {}
            Shape::Uniform { .. } => {
                rng.reverse_uniform();
                rng.reverse_uniform();
            }
            Shape::TwoStage { proc, comm } => {
                comm.reverse(rng);
                proc.reverse(rng);
            }
        }
    }

    /// Draw the gap before the next generation.
    pub fn generate_interarrival(&self, rng: &mut ReversibleRng) -> SimTime {
        self.interarrival.generate(rng)
    }

    /// Undo one interarrival draw.
    pub fn reverse_interarrival(&self, rng: &mut ReversibleRng) {
        self.interarrival.reverse(rng);
    }
}

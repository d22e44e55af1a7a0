//! Simulation fault types.
//!
//! The simulator is fail-fast: nothing here is retried. Model and
//! configuration faults abort at load or init time; the `PolicyViolation`
//! and `LookaheadViolation` variants indicate bugs in handler code, never
//! user error.

use crate::Lpid;
use thiserror::Error;

/// A simulation fault.
#[derive(Debug, Error)]
pub enum SimError {
    /// Registered slave count does not match the routes leaving a master.
    #[error("master {master} has {routes} registered routes but {slaves} slaves")]
    ModelMismatch {
        master: Lpid,
        slaves: usize,
        routes: u32,
    },

    /// No route between the given pair of services.
    #[error("no route from {src} to {dest}")]
    NoRoute { src: Lpid, dest: Lpid },

    /// A routing file line could not be parsed.
    #[error("malformed route at line {line}: {reason}")]
    MalformedRoute { line: usize, reason: String },

    /// A workload references a user that was never registered.
    #[error("workload references unregistered user `{0}`")]
    UnregisteredUser(String),

    /// A service was registered with an out-of-range parameter.
    #[error("invalid configuration for service {service}: {reason}")]
    InvalidConfig { service: Lpid, reason: String },

    /// A user was registered with an invalid name or limit.
    #[error("invalid user `{name}`: {reason}")]
    InvalidUser { name: String, reason: String },

    /// A workload was built with an out-of-range parameter.
    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    /// The same LP identifier was registered twice.
    #[error("service {0} has already been registered")]
    DuplicateService(Lpid),

    /// The VMM scheduler returned a VM with no owning machine.
    #[error("no machine owns vm {0}")]
    UnknownVmOwner(Lpid),

    /// A policy was asked to select from an empty target set.
    #[error("policy has no target to select from")]
    NoTarget,

    /// A reverse handler found event scratch inconsistent with LP state.
    #[error("reverse computation out of step: {0}")]
    PolicyViolation(&'static str),

    /// A generator emitted an event below the configured lookahead.
    #[error("event delay {delay} undercuts lookahead {lookahead}")]
    LookaheadViolation { delay: f64, lookahead: f64 },

    /// Routing file could not be read.
    #[error("route file error: {0}")]
    Io(#[from] std::io::Error),
}

impl SimError {
    /// Check whether this fault indicates a handler bug rather than a
    /// model/user mistake.
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            SimError::PolicyViolation(_) | SimError::LookaheadViolation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_is_bug() {
        assert!(SimError::PolicyViolation("index underflow").is_bug());
        assert!(SimError::LookaheadViolation {
            delay: 0.0,
            lookahead: 0.1
        }
        .is_bug());
        assert!(!SimError::NoRoute { src: 1, dest: 2 }.is_bug());
        assert!(!SimError::DuplicateService(7).is_bug());
    }

    #[test]
    fn fault_display() {
        let fault = SimError::NoRoute { src: 3, dest: 9 };
        assert!(fault.to_string().contains('3'));
        assert!(fault.to_string().contains('9'));

        let fault = SimError::UnregisteredUser("ghost".into());
        assert!(fault.to_string().contains("ghost"));
    }
}

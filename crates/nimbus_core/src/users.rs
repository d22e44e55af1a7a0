//! User registry and per-user accounting.
//!
//! Users live for the whole simulation and the `name <-> id` mapping is
//! injective. The registry is read-only after model load; per-user metrics
//! are mutated only from commit handlers, which run once per event past GVT
//! and are never reversed.

use crate::{SimError, UserId};
use serde::Serialize;
use std::collections::HashMap;

/// Commit-time accounting for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UserMetrics {
    /// Processing time consumed (seconds).
    pub proc_time: f64,

    /// Time tasks waited in processing queues (seconds).
    pub proc_waiting_time: f64,

    /// Communication time consumed (seconds).
    pub comm_time: f64,

    /// Time packets waited in link queues (seconds).
    pub comm_waiting_time: f64,

    /// Energy consumed on behalf of this user (Joules).
    pub energy_consumption: f64,

    /// Tasks issued by this user's workloads.
    pub issued_tasks: u32,

    /// Tasks completed for this user.
    pub completed_tasks: u32,
}

impl UserMetrics {
    /// Fold another rank's view of the same user into this one.
    pub fn merge(&mut self, other: &UserMetrics) {
        self.proc_time += other.proc_time;
        self.proc_waiting_time += other.proc_waiting_time;
        self.comm_time += other.comm_time;
        self.comm_waiting_time += other.comm_waiting_time;
        self.energy_consumption += other.energy_consumption;
        self.issued_tasks += other.issued_tasks;
        self.completed_tasks += other.completed_tasks;
    }
}

/// A registered user.
#[derive(Debug, Clone)]
pub struct User {
    id: UserId,
    name: String,
    energy_limit: f64,

    /// Commit-time metrics, see module docs.
    pub metrics: UserMetrics,
}

impl User {
    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn energy_limit(&self) -> f64 {
        self.energy_limit
    }
}

/// All registered users, addressable by id or by unique name.
#[derive(Debug, Clone, Default)]
pub struct UserRegistry {
    users: Vec<User>,
    by_name: HashMap<String, UserId>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user, assigning the next dense identifier.
    ///
    /// Names must be unique and contain at least one non-blank character;
    /// the energy limit must be finite and non-negative.
    pub fn register(&mut self, name: &str, energy_limit: f64) -> Result<UserId, SimError> {
        if name.trim().is_empty() {
            return Err(SimError::InvalidUser {
                name: name.into(),
                reason: "name must contain at least one letter".into(),
            });
        }
        if self.by_name.contains_key(name) {
            return Err(SimError::InvalidUser {
                name: name.into(),
                reason: "a user with this name is already registered".into(),
            });
        }
        if !energy_limit.is_finite() {
            return Err(SimError::InvalidUser {
                name: name.into(),
                reason: "energy consumption limit must be finite".into(),
            });
        }
        if energy_limit < 0.0 {
            return Err(SimError::InvalidUser {
                name: name.into(),
                reason: "energy consumption limit must be non-negative".into(),
            });
        }

        let id = self.users.len() as UserId;
        self.users.push(User {
            id,
            name: name.into(),
            energy_limit,
            metrics: UserMetrics::default(),
        });
        self.by_name.insert(name.into(), id);

        tracing::debug!(user = name, id, energy_limit, "user registered");
        Ok(id)
    }

    /// Look a user up by id.
    pub fn by_id(&self, id: UserId) -> Option<&User> {
        self.users.get(id as usize)
    }

    /// Mutable access for commit handlers.
    pub fn by_id_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(id as usize)
    }

    /// Resolve a name to an id; fails with `UnregisteredUser`.
    pub fn id_of(&self, name: &str) -> Result<UserId, SimError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnregisteredUser(name.into()))
    }

    /// Iterate users in id order.
    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.iter()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_assigns_dense_ids() {
        let mut registry = UserRegistry::new();

        let alice = registry.register("alice", 100.0).unwrap();
        let bob = registry.register("bob", 0.0).unwrap();

        assert_eq!(alice, 0);
        assert_eq!(bob, 1);
        assert_eq!(registry.id_of("bob").unwrap(), bob);
        assert_eq!(registry.by_id(alice).unwrap().name(), "alice");
    }

    #[test]
    fn duplicate_name_rejected() {
        let mut registry = UserRegistry::new();
        registry.register("alice", 100.0).unwrap();

        let result = registry.register("alice", 50.0);
        assert!(matches!(result, Err(SimError::InvalidUser { .. })));
    }

    #[test]
    fn blank_name_rejected() {
        let mut registry = UserRegistry::new();
        assert!(registry.register("   ", 1.0).is_err());
        assert!(registry.register("", 1.0).is_err());
    }

    #[test]
    fn bad_limits_rejected() {
        let mut registry = UserRegistry::new();
        assert!(registry.register("a", f64::NAN).is_err());
        assert!(registry.register("b", f64::INFINITY).is_err());
        assert!(registry.register("c", -1.0).is_err());
    }

    #[test]
    fn unknown_name_faults() {
        let registry = UserRegistry::new();
        assert!(matches!(
            registry.id_of("ghost"),
            Err(SimError::UnregisteredUser(_))
        ));
    }

    #[test]
    fn metrics_merge_sums() {
        let mut a = UserMetrics {
            proc_time: 1.0,
            issued_tasks: 2,
            ..UserMetrics::default()
        };
        let b = UserMetrics {
            proc_time: 0.5,
            issued_tasks: 3,
            completed_tasks: 3,
            ..UserMetrics::default()
        };

        a.merge(&b);
        assert_eq!(a.proc_time, 1.5);
        assert_eq!(a.issued_tasks, 5);
        assert_eq!(a.completed_tasks, 3);
    }
}

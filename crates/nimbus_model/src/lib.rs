//! Simulation model construction.
//!
//! [`SimulationModel`] is the programmatic registration surface: every
//! service goes through a `register_*` call that validates its parameters
//! before any event is processed. The [`loader`] module fills a model from
//! the strict JSON document format.

mod builder;
pub mod loader;

pub use builder::SimulationModel;
pub use loader::{load_path, load_str, ModelDocument, ModelError};

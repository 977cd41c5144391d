//! Job specification types and command templating.
//!
//! Defines the Rust types that mirror the YAML job specification schema.
//! They are loaded by the store and consumed by the stage machine and partitioner.

mod jobspec;
pub mod render;
mod stage;

pub use jobspec::{Job, JobSpec, Recipe};
pub use render::render;
pub use stage::Stage;

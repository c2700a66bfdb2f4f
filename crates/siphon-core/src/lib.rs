//! siphon-core: shared vocabulary for the Siphon batch scheduler.
//!
//! Everything the scheduler knows about the outside world goes through the
//! [`Environment`] trait: topology, node capacity, payload deployment,
//! process execution, and the duration/cost oracles. The [`Target`] is a
//! read-through view of the resource being drained.

pub mod config;
pub mod env;
pub mod target;
pub mod types;

pub use config::SiphonConfig;
pub use env::{EnvError, Environment};
pub use target::Target;
pub use types::*;

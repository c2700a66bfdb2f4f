//! siphon-sim: in-process stand-ins for the outside world.
//!
//! # Components
//!
//! - **`sim`**: [`SimEnvironment`], a time-driven model of hosts and the
//!   Target. Operations land when `launch + delay + duration` passes on the
//!   tokio clock, so whole scheduler runs are reproducible under paused time.
//! - **`stub`**: [`StubEnvironment`], fixed oracle answers and a manually
//!   driven process table, with every execution recorded.

pub mod sim;
pub mod stub;

pub use sim::SimEnvironment;
pub use stub::{Execution, StubEnvironment, StubState};

//! siphon-scheduler: batch planning and the timing-critical launch loop.
//!
//! Drains value from a single Target by launching repeated batches of
//! Extract, Replenish, and Stabilize operations whose four phases finish
//! in strict order, one task gap apart. The scheduler:
//!
//! - Brings the Target to baseline (minimum level, maximum value)
//! - Computes one [`BatchPlan`] and reserves capacity for as many
//!   [`Batch`]es as the pool allows
//! - Relaunches idle batches, spaced by four task gaps
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── Preparer (Stabilize/Replenish until baseline)
//!   ├── BatchPlan (threads per phase, required capacity)
//!   ├── Vec<Batch> (reserved allocations + PhaseTimings per launch)
//!   ├── NodePool (owned; from siphon-pool)
//!   └── TrainerMode (leftover capacity)
//! ```

pub mod batch;
pub mod error;
pub mod plan;
pub mod preparer;
pub mod scheduler;
pub mod select;
pub mod status;
pub mod timing;
pub mod trainer;

pub use batch::{Batch, BatchIdGen, BatchState};
pub use error::{SchedulerError, SchedulerResult};
pub use plan::BatchPlan;
pub use preparer::{PrepareStep, Preparer};
pub use scheduler::{RunSummary, Scheduler};
pub use select::select_target;
pub use status::StatusReporter;
pub use timing::PhaseTimings;
pub use trainer::{StabilizeTrainer, Trainer, TrainerMode};

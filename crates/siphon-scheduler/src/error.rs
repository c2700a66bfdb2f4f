//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

use siphon_core::{BatchId, EnvError, Phase, TargetSnapshot};
use siphon_pool::NodeError;

/// Errors that abort planning, preparation, or the steady loop.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(
        "target {target} not at baseline: level {:.3}/{:.3}, value {:.0}/{:.0}",
        .state.level, .state.min_level, .state.value, .state.max_value
    )]
    NotAtBaseline {
        target: String,
        state: TargetSnapshot,
    },

    #[error("{0} is still running")]
    BatchBusy(BatchId),

    #[error("could not plan all threads for phase {phase} ({missing} short)")]
    Allocation { phase: Phase, missing: u32 },

    #[error("{first} finishes at {first_finish:?} but {second} at {second_finish:?}, expected a {gap:?} gap")]
    Timing {
        first: Phase,
        second: Phase,
        first_finish: Duration,
        second_finish: Duration,
        gap: Duration,
    },

    #[error("phase {phase} would need a negative start offset ({offset_ms} ms)")]
    NegativeOffset { phase: Phase, offset_ms: i64 },

    #[error("operator level changed from {from} to {to} since setup")]
    OperatorLevelChanged { from: u32, to: u32 },

    #[error("no batch fits: one needs {required:.2} capacity, {available:.2} free")]
    NoFeasiblePlan { required: f64, available: f64 },

    #[error("no eligible target found")]
    NoTarget,

    #[error("scheduler has not been set up")]
    NotSetUp,

    #[error("node error: {0}")]
    Node(#[from] NodeError),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

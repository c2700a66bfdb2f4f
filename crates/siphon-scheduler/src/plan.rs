//! Batch planning: how many threads each phase needs for one cycle.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use siphon_core::{Environment, OperationKind, Phase, Target, TargetSnapshot};

use crate::error::{SchedulerError, SchedulerResult};

/// Phase gaps between successive batch launches.
const LAUNCH_SPACING_GAPS: u32 = 4;

/// Thread counts and capacity for one self-balancing cycle.
///
/// Computed once with the Target at baseline and never recomputed when the
/// Target drifts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchPlan {
    pub target: String,
    pub extraction_fraction: f64,
    pub extract_amount: f64,
    pub growth_factor: f64,
    /// Threads per phase, indexed by [`Phase::index`].
    threads: [u32; 4],
    /// Capacity of one thread per phase.
    unit_costs: [f64; 4],
    pub task_gap: Duration,
    pub time_between_batch_starts: Duration,
    pub required_capacity: f64,
}

impl BatchPlan {
    /// Derive the plan from the Target's current state and the environment's
    /// oracles. The Target must sit exactly at minimum level and maximum value.
    pub fn compute(
        env: &dyn Environment,
        target: &Target,
        extraction_fraction: f64,
        task_gap: Duration,
    ) -> SchedulerResult<Self> {
        let state = target.snapshot()?;
        if state.level != state.min_level || state.value != state.max_value {
            return Err(SchedulerError::NotAtBaseline {
                target: target.name().to_string(),
                state,
            });
        }
        Ok(Self::from_snapshot(
            env,
            target.name(),
            &state,
            extraction_fraction,
            task_gap,
        ))
    }

    fn from_snapshot(
        env: &dyn Environment,
        target: &str,
        state: &TargetSnapshot,
        extraction_fraction: f64,
        task_gap: Duration,
    ) -> Self {
        let extract_amount = extraction_fraction * state.value;
        let extract = env.extract_threads(target, extract_amount).floor().max(0.0) as u32;

        let growth_factor = state.value / (state.value - extract_amount);
        let replenish = env.replenish_threads(target, growth_factor).ceil().max(0.0) as u32;

        let effect = env.stabilize_effect_per_op();
        let counter = |kind, threads| {
            (env.security_impact(kind, threads) / effect)
                .ceil()
                .max(0.0) as u32
        };
        let post_extract = counter(OperationKind::Extract, extract);
        let post_replenish = counter(OperationKind::Replenish, replenish);

        let threads = [extract, post_extract, replenish, post_replenish];
        let unit_costs = Phase::ORDER.map(|phase| env.unit_cost(phase.kind()));
        let required_capacity: f64 = threads
            .iter()
            .zip(unit_costs.iter())
            .map(|(t, c)| f64::from(*t) * c)
            .sum();

        debug!(
            host = target,
            extract_amount,
            growth_factor,
            extract,
            post_extract,
            replenish,
            post_replenish,
            "batch plan computed"
        );

        Self {
            target: target.to_string(),
            extraction_fraction,
            extract_amount,
            growth_factor,
            threads,
            unit_costs,
            task_gap,
            time_between_batch_starts: task_gap * LAUNCH_SPACING_GAPS,
            required_capacity,
        }
    }

    pub fn threads(&self, phase: Phase) -> u32 {
        self.threads[phase.index()]
    }

    pub fn unit_cost(&self, phase: Phase) -> f64 {
        self.unit_costs[phase.index()]
    }

    pub fn total_threads(&self) -> u32 {
        self.threads.iter().sum()
    }
}

//! Brings the Target to baseline before any batch is planned.
//!
//! Level is always corrected first. Value is only touched in an iteration
//! that found the level already at baseline.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use siphon_core::{Environment, LaunchArgs, OperationKind, Target};
use siphon_pool::NodePool;

use crate::error::SchedulerResult;

/// Smallest growth multiplier worth asking for.
const MIN_GROWTH_MULTIPLIER: f64 = 1.01;

/// Factor the multiplier shrinks by while the pool cannot run it.
const GROWTH_SHRINK: f64 = 0.95;

/// What one preparation iteration did.
#[derive(Debug, Clone, PartialEq)]
pub enum PrepareStep {
    /// Both baseline predicates hold.
    Ready,
    /// Level was off baseline; Stabilize threads were launched.
    Stabilized {
        requested: u32,
        launched: u32,
        wait: Duration,
    },
    /// Level was fine, value was not; Replenish threads were launched,
    /// plus Stabilize threads to cancel their impact when capacity allowed.
    Replenished {
        multiplier: f64,
        replenish: u32,
        stabilize: u32,
        wait: Duration,
    },
}

impl PrepareStep {
    /// How long to let the launched operations land.
    pub fn wait(&self) -> Duration {
        match self {
            PrepareStep::Ready => Duration::ZERO,
            PrepareStep::Stabilized { wait, .. } | PrepareStep::Replenished { wait, .. } => *wait,
        }
    }
}

pub struct Preparer {
    env: Arc<dyn Environment>,
    target: Target,
    poll: Duration,
}

impl Preparer {
    pub fn new(env: Arc<dyn Environment>, target: Target, poll: Duration) -> Self {
        Self { env, target, poll }
    }

    /// Run one iteration against the current Target state.
    pub fn step(&self, pool: &mut NodePool) -> SchedulerResult<PrepareStep> {
        let state = self.target.snapshot()?;
        let name = self.target.name();
        let args = LaunchArgs::new(name, Duration::ZERO);

        if !state.at_baseline_level() {
            let requested = self.target.required_stabilize_ops_to_baseline()?;
            let launched = pool.launch_greedy(OperationKind::Stabilize, requested, &args)?;
            if launched.threads == 0 {
                warn!(target_host = %name, requested, "no capacity to stabilize");
            }
            let wait = self.env.duration(name, OperationKind::Stabilize);
            debug!(
                target_host = %name,
                level = state.level,
                min_level = state.min_level,
                requested,
                launched = launched.threads,
                wait_ms = wait.as_millis() as u64,
                "stabilizing"
            );
            return Ok(PrepareStep::Stabilized {
                requested,
                launched: launched.threads,
                wait,
            });
        }

        if !state.at_baseline_value() {
            let available = pool.available_ops(OperationKind::Replenish);
            let current = state.value.max(1.0);
            let mut multiplier =
                (1.0 + (state.max_value - current) / current).max(MIN_GROWTH_MULTIPLIER);
            let mut required = self.replenish_threads(multiplier);
            while required > available && multiplier > MIN_GROWTH_MULTIPLIER {
                multiplier = (multiplier * GROWTH_SHRINK).max(MIN_GROWTH_MULTIPLIER);
                required = self.replenish_threads(multiplier);
            }

            let counter = (self
                .env
                .security_impact(OperationKind::Replenish, required)
                / self.env.stabilize_effect_per_op())
                .ceil() as u32;

            let replenish = pool.launch_greedy(OperationKind::Replenish, required, &args)?;

            let (stabilize, wait) = if pool.has_capacity_for(OperationKind::Stabilize) {
                let launched = pool.launch_greedy(OperationKind::Stabilize, counter, &args)?;
                (launched.threads, self.env.duration(name, OperationKind::Stabilize))
            } else {
                (0, self.env.duration(name, OperationKind::Replenish))
            };

            debug!(
                target_host = %name,
                value = state.value,
                max_value = state.max_value,
                multiplier,
                replenish = replenish.threads,
                stabilize,
                wait_ms = wait.as_millis() as u64,
                "replenishing"
            );
            return Ok(PrepareStep::Replenished {
                multiplier,
                replenish: replenish.threads,
                stabilize,
                wait,
            });
        }

        Ok(PrepareStep::Ready)
    }

    fn replenish_threads(&self, multiplier: f64) -> u32 {
        self.env
            .replenish_threads(self.target.name(), multiplier)
            .ceil()
            .max(0.0) as u32
    }

    /// Iterate until the Target is at baseline. Returns the number of
    /// iterations that launched work.
    pub async fn run(&self, pool: &mut NodePool) -> SchedulerResult<u32> {
        info!(target_host = %self.target.name(), "preparing target");
        let mut iterations = 0;
        loop {
            let step = self.step(pool)?;
            if step == PrepareStep::Ready {
                info!(target_host = %self.target.name(), iterations, "target prepared");
                return Ok(iterations);
            }
            iterations += 1;
            tokio::time::sleep(step.wait()).await;
            tokio::time::sleep(self.poll).await;
        }
    }
}

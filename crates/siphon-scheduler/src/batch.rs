//! A reserved, relaunchable instance of a [`BatchPlan`].

use serde::Serialize;
use tracing::{debug, info};

use siphon_core::{BatchId, Environment, LaunchArgs, OperationKind, Phase, ProcessId, Target};
use siphon_pool::{Allocation, AllocationError, Allocator, NodePool};

use crate::error::{SchedulerError, SchedulerResult};
use crate::plan::BatchPlan;
use crate::timing::PhaseTimings;

/// Hands out batch identifiers in increasing order.
#[derive(Debug, Default)]
pub struct BatchIdGen {
    next: u64,
}

impl BatchIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> BatchId {
        let id = BatchId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Reserved, never launched.
    Planned,
    /// At least one launched process is alive.
    Running,
    /// Launched before, nothing alive. Eligible for relaunch.
    Idle,
}

/// Capacity reserved for one cycle plus the processes of its latest launch.
///
/// The reservation is permanent: relaunching reuses the same allocations.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    id: BatchId,
    /// Allocations per phase, indexed by [`Phase::index`].
    allocations: [Vec<Allocation>; 4],
    pids: Vec<ProcessId>,
    launches: u32,
}

impl Batch {
    /// Allocate every phase of `plan` on `pool` and reserve the capacity.
    ///
    /// All four phases are worked out on scratch availability first. If any
    /// phase falls short no node is touched.
    pub fn plan(id: BatchId, plan: &BatchPlan, pool: &mut NodePool) -> SchedulerResult<Self> {
        let mut scratch = Allocator::new(pool);
        let mut allocations: [Vec<Allocation>; 4] = Default::default();

        for phase in Phase::ORDER {
            allocations[phase.index()] = scratch
                .take(phase.kind(), plan.unit_cost(phase), plan.threads(phase))
                .map_err(|e| match e {
                    AllocationError::Shortfall { missing, .. } => {
                        SchedulerError::Allocation { phase, missing }
                    }
                })?;
        }

        for phase in Phase::ORDER {
            Allocator::commit(pool, &allocations[phase.index()], plan.unit_cost(phase))?;
        }

        let batch = Self {
            id,
            allocations,
            pids: Vec::new(),
            launches: 0,
        };
        debug!(%id, nodes = ?batch.nodes(), "batch planned");
        Ok(batch)
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    pub fn allocations(&self, phase: Phase) -> &[Allocation] {
        &self.allocations[phase.index()]
    }

    pub fn launches(&self) -> u32 {
        self.launches
    }

    pub fn pids(&self) -> &[ProcessId] {
        &self.pids
    }

    fn nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self
            .allocations
            .iter()
            .flatten()
            .map(|a| a.node.as_str())
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    pub fn is_running(&self, env: &dyn Environment) -> bool {
        self.pids.iter().any(|pid| env.is_alive(*pid))
    }

    pub fn state(&self, env: &dyn Environment) -> BatchState {
        if self.launches == 0 {
            BatchState::Planned
        } else if self.is_running(env) {
            BatchState::Running
        } else {
            BatchState::Idle
        }
    }

    /// Launch every phase with offsets that make them finish `gap` apart.
    ///
    /// The Target must be at baseline and the batch must not be running.
    pub fn start(
        &mut self,
        plan: &BatchPlan,
        env: &dyn Environment,
        target: &Target,
        pool: &mut NodePool,
    ) -> SchedulerResult<PhaseTimings> {
        if self.is_running(env) {
            return Err(SchedulerError::BatchBusy(self.id));
        }
        let state = target.snapshot()?;
        if !state.at_baseline() {
            return Err(SchedulerError::NotAtBaseline {
                target: target.name().to_string(),
                state,
            });
        }

        let timings = PhaseTimings::compute(
            env.duration(target.name(), OperationKind::Extract),
            env.duration(target.name(), OperationKind::Replenish),
            env.duration(target.name(), OperationKind::Stabilize),
            plan.task_gap,
        )?;

        self.pids.clear();
        for phase in Phase::ORDER {
            let args = LaunchArgs::new(target.name(), timings.offset(phase)).with_batch(self.id);
            for alloc in &self.allocations[phase.index()] {
                let pid = pool.get_mut(&alloc.node)?.launch_reserved(
                    phase.kind(),
                    alloc.threads,
                    &args,
                )?;
                self.pids.push(pid);
            }
        }
        self.launches += 1;

        info!(
            id = %self.id,
            launch = self.launches,
            processes = self.pids.len(),
            span_ms = timings.span().as_millis() as u64,
            timings = %serde_json::to_string(&timings).unwrap_or_default(),
            "batch started"
        );
        Ok(timings)
    }
}

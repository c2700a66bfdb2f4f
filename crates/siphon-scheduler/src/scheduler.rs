//! Scheduler: prepares the Target, packs batches, and launches them.
//!
//! The `Scheduler` is the control loop that:
//! - Runs the [`Preparer`] when the Target is off baseline
//! - Computes one [`BatchPlan`] and reserves as many [`Batch`]es as fit
//! - Every poll interval, launches one idle batch once the launch spacing
//!   has elapsed
//! - Hands capacity no batch can use to the trainer, if one is configured

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use siphon_core::config::SchedulerConfig;
use siphon_core::{BatchId, CAPACITY_EPSILON, Environment, Target};
use siphon_pool::NodePool;

use crate::batch::{Batch, BatchIdGen};
use crate::error::{SchedulerError, SchedulerResult};
use crate::plan::BatchPlan;
use crate::preparer::Preparer;
use crate::trainer::TrainerMode;

/// Counters reported when the steady loop stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    pub ticks: u64,
    pub launches: u64,
}

pub struct Scheduler {
    env: Arc<dyn Environment>,
    target: Target,
    /// Owned outright; only the scheduler mutates node capacity.
    pool: NodePool,
    config: SchedulerConfig,
    trainer: TrainerMode,
    ids: BatchIdGen,
    plan: Option<BatchPlan>,
    batches: Vec<Batch>,
    /// Operator level seen at setup.
    operator_level: Option<u32>,
    last_launch: Option<Instant>,
}

impl Scheduler {
    pub fn new(
        env: Arc<dyn Environment>,
        target: Target,
        pool: NodePool,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            env,
            target,
            pool,
            config,
            trainer: TrainerMode::None,
            ids: BatchIdGen::new(),
            plan: None,
            batches: Vec::new(),
            operator_level: None,
            last_launch: None,
        }
    }

    pub fn with_trainer(mut self, trainer: TrainerMode) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn plan(&self) -> Option<&BatchPlan> {
        self.plan.as_ref()
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn pool_mut(&mut self) -> &mut NodePool {
        &mut self.pool
    }

    /// Prepare the Target if needed, compute the plan, and reserve batches.
    pub async fn setup(&mut self) -> SchedulerResult<()> {
        self.operator_level = Some(self.env.operator_level());

        if !self.target.at_baseline()? {
            let preparer = Preparer::new(
                self.env.clone(),
                self.target.clone(),
                self.config.prepare_poll(),
            );
            preparer.run(&mut self.pool).await?;
        }

        let plan = BatchPlan::compute(
            self.env.as_ref(),
            &self.target,
            self.config.extraction_fraction(),
            self.config.task_gap(),
        )?;
        info!(
            plan = %serde_json::to_string(&plan).unwrap_or_default(),
            "batch plan ready"
        );

        self.pack(&plan)?;
        self.plan = Some(plan);
        Ok(())
    }

    /// Whether the pool could hold one more batch than it already does.
    fn can_spawn_additional_batch(&mut self, required: f64) -> bool {
        if required <= 0.0 {
            return false;
        }
        let available = self.pool.total_available_capacity();
        let fits = (available / required + CAPACITY_EPSILON).floor() as usize;
        fits > self.batches.len()
    }

    /// Reserve batches while the pool's aggregate capacity says another fits.
    ///
    /// Aggregate capacity can fit a batch that no node-by-node allocation
    /// can place; that allocation error aborts setup.
    fn pack(&mut self, plan: &BatchPlan) -> SchedulerResult<()> {
        let required = plan.required_capacity;
        while self.can_spawn_additional_batch(required) {
            let id = self.ids.next_id();
            let batch = Batch::plan(id, plan, &mut self.pool)?;
            self.batches.push(batch);
        }

        if self.batches.is_empty() {
            return Err(SchedulerError::NoFeasiblePlan {
                required,
                available: self.pool.total_available_capacity(),
            });
        }

        info!(
            batches = self.batches.len(),
            required_capacity = required,
            leftover = self.pool.total_available_capacity(),
            "batches planned"
        );
        info!(
            batches = %serde_json::to_string(&self.batches).unwrap_or_default(),
            "batches reserved"
        );
        info!(
            nodes = %serde_json::to_string(&self.pool.snapshot()).unwrap_or_default(),
            "pool after packing"
        );
        Ok(())
    }

    fn consult_trainer(&mut self, required: f64) -> SchedulerResult<()> {
        let fits_more = self.can_spawn_additional_batch(required);
        let Some(trainer) = self.trainer.trainer_mut() else {
            return Ok(());
        };
        if fits_more {
            if trainer.is_running() {
                trainer.stop();
            }
        } else if !trainer.is_running() {
            trainer.start(&mut self.pool)?;
        }
        Ok(())
    }

    /// One pass of the steady loop. Returns the batch launched, if any.
    pub fn tick(&mut self) -> SchedulerResult<Option<BatchId>> {
        let level = self.env.operator_level();
        match self.operator_level {
            Some(from) if from != level => {
                return Err(SchedulerError::OperatorLevelChanged { from, to: level });
            }
            Some(_) => {}
            None => return Err(SchedulerError::NotSetUp),
        }

        let required = self
            .plan
            .as_ref()
            .ok_or(SchedulerError::NotSetUp)?
            .required_capacity;
        self.consult_trainer(required)?;

        let Some(plan) = self.plan.as_ref() else {
            return Err(SchedulerError::NotSetUp);
        };
        let due = self
            .last_launch
            .is_none_or(|at| at.elapsed() >= plan.time_between_batch_starts);
        if !due {
            return Ok(None);
        }

        let env = self.env.as_ref();
        let Some(batch) = self.batches.iter_mut().find(|b| !b.is_running(env)) else {
            debug!("every batch is running");
            return Ok(None);
        };
        batch.start(plan, env, &self.target, &mut self.pool)?;
        self.last_launch = Some(Instant::now());
        Ok(Some(batch.id()))
    }

    /// Set up, then tick every poll interval until `shutdown` fires.
    ///
    /// Any error aborts the loop.
    pub async fn run(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> SchedulerResult<RunSummary> {
        info!(target_host = %self.target.name(), nodes = self.pool.len(), "scheduler starting");

        tokio::select! {
            res = self.setup() => res?,
            _ = shutdown.changed() => {
                info!("scheduler shut down during setup");
                return Ok(RunSummary::default());
            }
        }

        let poll = self.config.poll_interval();
        let mut summary = RunSummary {
            batches: self.batches.len(),
            ..RunSummary::default()
        };

        loop {
            summary.ticks += 1;
            if self.tick()?.is_some() {
                summary.launches += 1;
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown.changed() => {
                    info!(
                        ticks = summary.ticks,
                        launches = summary.launches,
                        "scheduler shutting down"
                    );
                    break;
                }
            }
        }

        Ok(summary)
    }
}

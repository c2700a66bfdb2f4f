//! Trainer hook: what to do with capacity no batch can use.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use siphon_core::{Environment, LaunchArgs, OperationKind, ProcessId};
use siphon_pool::NodePool;

use crate::error::SchedulerResult;

/// Spends leftover capacity between cycles.
///
/// Stopping never cancels operations already launched. A stopped trainer
/// reports itself idle so the scheduler may start it again later.
pub trait Trainer: Send {
    fn name(&self) -> &str;

    /// Started, not stopped since, and some of its work is still alive.
    fn is_running(&self) -> bool;

    fn start(&mut self, pool: &mut NodePool) -> SchedulerResult<()>;

    fn stop(&mut self);
}

/// Whether the scheduler has a trainer at all.
#[derive(Default)]
pub enum TrainerMode {
    #[default]
    None,
    Active(Box<dyn Trainer>),
}

impl TrainerMode {
    pub fn active(trainer: impl Trainer + 'static) -> Self {
        TrainerMode::Active(Box::new(trainer))
    }

    pub fn trainer_mut(&mut self) -> Option<&mut (dyn Trainer + 'static)> {
        match self {
            TrainerMode::None => None,
            TrainerMode::Active(t) => Some(t.as_mut()),
        }
    }
}

impl fmt::Debug for TrainerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerMode::None => f.write_str("None"),
            TrainerMode::Active(t) => f.debug_tuple("Active").field(&t.name()).finish(),
        }
    }
}

/// Fills leftover capacity with Stabilize operations against a fixed host.
pub struct StabilizeTrainer {
    host: String,
    env: Arc<dyn Environment>,
    pids: Vec<ProcessId>,
    stopped: bool,
}

impl StabilizeTrainer {
    pub fn new(host: impl Into<String>, env: Arc<dyn Environment>) -> Self {
        Self {
            host: host.into(),
            env,
            pids: Vec::new(),
            stopped: false,
        }
    }
}

impl Trainer for StabilizeTrainer {
    fn name(&self) -> &str {
        "stabilize"
    }

    fn is_running(&self) -> bool {
        !self.stopped && self.pids.iter().any(|pid| self.env.is_alive(*pid))
    }

    fn start(&mut self, pool: &mut NodePool) -> SchedulerResult<()> {
        self.stopped = false;
        let threads = pool.available_ops(OperationKind::Stabilize);
        if threads == 0 {
            return Ok(());
        }
        let args = LaunchArgs::new(self.host.clone(), Duration::ZERO);
        let launched = pool.launch_greedy(OperationKind::Stabilize, threads, &args)?;
        self.pids = launched.pids;
        info!(host = %self.host, threads = launched.threads, "trainer started");
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            info!(host = %self.host, detached = self.pids.len(), "trainer stopped");
        }
        self.pids.clear();
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_sim::StubEnvironment;

    #[test]
    fn trainer_fills_leftover_capacity() {
        let env = StubEnvironment::new().with_host("home", 35.0, 0.0, &[]);
        let shared: Arc<dyn Environment> = Arc::new(env.clone());
        let mut pool = NodePool::discover(shared.clone(), "home").unwrap();

        let mut trainer = StabilizeTrainer::new("n00dles", shared);
        assert!(!trainer.is_running());
        trainer.start(&mut pool).unwrap();

        assert!(trainer.is_running());
        assert_eq!(env.launched_threads(OperationKind::Stabilize), 20);
        assert_eq!(env.executions()[0].args.target, "n00dles");
        assert_eq!(pool.available_ops(OperationKind::Stabilize), 0);

        env.finish_all();
        assert!(!trainer.is_running());
    }

    #[test]
    fn stop_does_not_cancel_running_work() {
        let env = StubEnvironment::new().with_host("home", 8.0, 0.0, &[]);
        let shared: Arc<dyn Environment> = Arc::new(env.clone());
        let mut pool = NodePool::discover(shared.clone(), "home").unwrap();
        let mut mode = TrainerMode::active(StabilizeTrainer::new("n00dles", shared));

        let trainer = mode.trainer_mut().unwrap();
        trainer.start(&mut pool).unwrap();
        trainer.stop();
        assert!(!trainer.is_running());
        assert_eq!(env.alive_count(), 1);
    }

    #[test]
    fn stopped_trainer_restarts_on_freed_capacity() {
        let env = StubEnvironment::new().with_host("home", 8.0, 0.0, &[]);
        let shared: Arc<dyn Environment> = Arc::new(env.clone());
        let mut pool = NodePool::discover(shared.clone(), "home").unwrap();
        let mut trainer = StabilizeTrainer::new("n00dles", shared);

        trainer.start(&mut pool).unwrap();
        trainer.stop();
        // The earlier work still holds the node, so a restart launches nothing.
        trainer.start(&mut pool).unwrap();
        assert!(!trainer.is_running());
        assert_eq!(env.executions().len(), 1);

        env.finish_all();
        trainer.start(&mut pool).unwrap();
        assert!(trainer.is_running());
        assert_eq!(env.launched_threads(OperationKind::Stabilize), 8);
    }

    #[test]
    fn none_mode_has_no_trainer() {
        let mut mode = TrainerMode::default();
        assert!(mode.trainer_mut().is_none());
        assert_eq!(format!("{mode:?}"), "None");
    }
}

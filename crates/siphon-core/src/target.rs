//! Read-through view of the resource being drained.

use std::fmt;
use std::sync::Arc;

use crate::env::{EnvError, Environment};
use crate::types::TargetSnapshot;

/// The Target. Holds no state of its own; every read goes to the environment.
///
/// The Target's host may also be a worker node in the pool. Capacity is only
/// ever accounted on the pool's `ResourceNode`, never here.
#[derive(Clone)]
pub struct Target {
    name: String,
    env: Arc<dyn Environment>,
}

impl Target {
    pub fn new(name: impl Into<String>, env: Arc<dyn Environment>) -> Self {
        Self {
            name: name.into(),
            env,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> Result<TargetSnapshot, EnvError> {
        self.env.target_state(&self.name)
    }

    pub fn current_level(&self) -> Result<f64, EnvError> {
        Ok(self.snapshot()?.level)
    }

    pub fn min_level(&self) -> Result<f64, EnvError> {
        Ok(self.snapshot()?.min_level)
    }

    pub fn current_value(&self) -> Result<f64, EnvError> {
        Ok(self.snapshot()?.value)
    }

    pub fn max_value(&self) -> Result<f64, EnvError> {
        Ok(self.snapshot()?.max_value)
    }

    pub fn at_baseline_level(&self) -> Result<bool, EnvError> {
        Ok(self.snapshot()?.at_baseline_level())
    }

    pub fn at_baseline_value(&self) -> Result<bool, EnvError> {
        Ok(self.snapshot()?.at_baseline_value())
    }

    pub fn at_baseline(&self) -> Result<bool, EnvError> {
        Ok(self.snapshot()?.at_baseline())
    }

    /// Stabilize threads needed to bring the level down to its minimum.
    pub fn required_stabilize_ops_to_baseline(&self) -> Result<u32, EnvError> {
        let snap = self.snapshot()?;
        let excess = (snap.level - snap.min_level).max(0.0);
        Ok((excess / self.env.stabilize_effect_per_op()).ceil() as u32)
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target").field("name", &self.name).finish()
    }
}

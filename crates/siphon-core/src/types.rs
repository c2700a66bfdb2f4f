//! Shared types used across Siphon crates.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Level reduction achieved by one Stabilize thread.
pub const STABILIZE_EFFECT_PER_OP: f64 = 0.05;

/// Tolerance for `level - min_level` when deciding the Target is at baseline.
pub const BASELINE_LEVEL_EPSILON: f64 = 0.05;

/// Slack applied to capacity comparisons so accumulated float error never
/// turns an exact fit into a rejection.
pub const CAPACITY_EPSILON: f64 = 1e-9;

/// The three operations a node can run against the Target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Takes value from the Target and raises its level.
    Extract,
    /// Adds value to the Target and raises its level.
    Replenish,
    /// Lowers the Target's level by a fixed amount per thread.
    Stabilize,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Extract,
        OperationKind::Replenish,
        OperationKind::Stabilize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Extract => "extract",
            OperationKind::Replenish => "replenish",
            OperationKind::Stabilize => "stabilize",
        }
    }

    /// Payload file deployed to every node for this operation.
    pub fn payload(&self) -> &'static str {
        match self {
            OperationKind::Extract => "/ops/extract.js",
            OperationKind::Replenish => "/ops/replenish.js",
            OperationKind::Stabilize => "/ops/stabilize.js",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the four phases of a batch, in the order they must finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extract,
    PostExtractStabilize,
    Replenish,
    PostReplenishStabilize,
}

impl Phase {
    /// Finish order within a batch.
    pub const ORDER: [Phase; 4] = [
        Phase::Extract,
        Phase::PostExtractStabilize,
        Phase::Replenish,
        Phase::PostReplenishStabilize,
    ];

    pub fn kind(&self) -> OperationKind {
        match self {
            Phase::Extract => OperationKind::Extract,
            Phase::PostExtractStabilize | Phase::PostReplenishStabilize => {
                OperationKind::Stabilize
            }
            Phase::Replenish => OperationKind::Replenish,
        }
    }

    /// Position in [`Phase::ORDER`].
    pub fn index(&self) -> usize {
        match self {
            Phase::Extract => 0,
            Phase::PostExtractStabilize => 1,
            Phase::Replenish => 2,
            Phase::PostReplenishStabilize => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Extract => "extract",
            Phase::PostExtractStabilize => "post-extract stabilize",
            Phase::Replenish => "replenish",
            Phase::PostReplenishStabilize => "post-replenish stabilize",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a process started by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid-{}", self.0)
    }
}

/// Identifier of a batch, assigned by the scheduler's counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Capacity figures reported for a node at discovery time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub total: f64,
    pub used: f64,
}

/// Point-in-time reading of the Target's four scalars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub level: f64,
    pub min_level: f64,
    pub value: f64,
    pub max_value: f64,
}

impl TargetSnapshot {
    pub fn at_baseline_level(&self) -> bool {
        self.level - self.min_level <= BASELINE_LEVEL_EPSILON
    }

    pub fn at_baseline_value(&self) -> bool {
        self.value == self.max_value
    }

    pub fn at_baseline(&self) -> bool {
        self.at_baseline_level() && self.at_baseline_value()
    }
}

/// Positional arguments handed to every launched operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchArgs {
    pub target: String,
    /// How long the operation waits before acting.
    pub delay: Duration,
    /// Batch the operation belongs to, if any.
    pub batch: Option<BatchId>,
}

impl LaunchArgs {
    pub fn new(target: impl Into<String>, delay: Duration) -> Self {
        Self {
            target: target.into(),
            delay,
            batch: None,
        }
    }

    pub fn with_batch(mut self, batch: BatchId) -> Self {
        self.batch = Some(batch);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_map_to_operation_kinds() {
        let kinds: Vec<_> = Phase::ORDER.iter().map(Phase::kind).collect();
        assert_eq!(
            kinds,
            vec![
                OperationKind::Extract,
                OperationKind::Stabilize,
                OperationKind::Replenish,
                OperationKind::Stabilize,
            ]
        );
        for (i, phase) in Phase::ORDER.iter().enumerate() {
            assert_eq!(phase.index(), i);
        }
    }

    #[test]
    fn baseline_level_uses_epsilon() {
        let mut snap = TargetSnapshot {
            level: 5.04,
            min_level: 5.0,
            value: 100.0,
            max_value: 100.0,
        };
        assert!(snap.at_baseline_level());
        snap.level = 5.2;
        assert!(!snap.at_baseline_level());
    }

    #[test]
    fn baseline_value_is_exact() {
        let snap = TargetSnapshot {
            level: 5.0,
            min_level: 5.0,
            value: 999_999.99,
            max_value: 1_000_000.0,
        };
        assert!(!snap.at_baseline_value());
        assert!(!snap.at_baseline());
    }

    #[test]
    fn display_formats() {
        assert_eq!(BatchId(3).to_string(), "batch-3");
        assert_eq!(ProcessId(17).to_string(), "pid-17");
        assert_eq!(Phase::PostExtractStabilize.to_string(), "post-extract stabilize");
        assert_eq!(OperationKind::Replenish.to_string(), "replenish");
    }
}

//! The environment the scheduler acts upon.
//!
//! Every query and command against the outside world is a synchronous call
//! on [`Environment`]. A production backend talks to real hosts; the
//! `siphon-sim` crate provides an in-process simulation and a fixed stub.

use std::time::Duration;

use thiserror::Error;

use crate::types::{LaunchArgs, NodeCapacity, OperationKind, ProcessId, TargetSnapshot};

/// Errors reported by an environment backend.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvError {
    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("payload deployment to {host} failed: {reason}")]
    Deploy { host: String, reason: String },

    #[error("could not start {kind} x{threads} on {host}: {reason}")]
    Exec {
        kind: OperationKind,
        host: String,
        threads: u32,
        reason: String,
    },
}

/// External collaborators consumed by the scheduler core.
pub trait Environment: Send + Sync {
    // ── Topology ────────────────────────────────────────────────────

    /// Hosts directly reachable from `host`.
    fn neighbors(&self, host: &str) -> Vec<String>;

    /// Whether the operator holds privileged access on `host`.
    fn has_admin(&self, host: &str) -> bool;

    // ── Nodes ───────────────────────────────────────────────────────

    /// Total and currently used capacity of `host`.
    fn node_capacity(&self, host: &str) -> Result<NodeCapacity, EnvError>;

    /// Copy the given operation payloads onto `host`.
    fn deploy_payloads(&self, host: &str, kinds: &[OperationKind]) -> Result<(), EnvError>;

    /// Start `threads` threads of `kind` on `host`.
    fn execute(
        &self,
        kind: OperationKind,
        host: &str,
        threads: u32,
        args: &LaunchArgs,
    ) -> Result<ProcessId, EnvError>;

    /// Whether a previously started process is still running.
    fn is_alive(&self, pid: ProcessId) -> bool;

    // ── Oracles ─────────────────────────────────────────────────────

    /// Current level/value readings of `target`.
    fn target_state(&self, target: &str) -> Result<TargetSnapshot, EnvError>;

    /// How long one operation of `kind` currently takes against `target`.
    fn duration(&self, target: &str, kind: OperationKind) -> Duration;

    /// Capacity consumed by one thread of `kind`.
    fn unit_cost(&self, kind: OperationKind) -> f64;

    /// Level increase caused by `threads` threads of `kind`.
    fn security_impact(&self, kind: OperationKind, threads: u32) -> f64;

    /// Level decrease caused by one Stabilize thread.
    fn stabilize_effect_per_op(&self) -> f64;

    /// Extract threads needed to take `amount` value from `target`.
    fn extract_threads(&self, target: &str, amount: f64) -> f64;

    /// Replenish threads needed to multiply the value of `target` by `multiplier`.
    fn replenish_threads(&self, target: &str, multiplier: f64) -> f64;

    /// The operator's effective power level.
    fn operator_level(&self) -> u32;
}

//! Time-driven simulation of hosts, processes, and the Target.
//!
//! Each launched operation records when it will land
//! (`launch + delay + duration`). Effects are applied lazily, in landing
//! order, whenever the simulation is queried, so the model only ever moves
//! forward with the tokio clock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use siphon_core::config::{CostConfig, HostConfig, SimulationConfig};
use siphon_core::{
    EnvError, Environment, LaunchArgs, NodeCapacity, OperationKind, ProcessId,
    STABILIZE_EFFECT_PER_OP, TargetSnapshot,
};

const REPLENISH_DURATION_FACTOR: f64 = 3.2;
const STABILIZE_DURATION_FACTOR: f64 = 4.0;
/// Extra duration per point of level above minimum.
const LEVEL_SLOWDOWN: f64 = 0.1;

#[derive(Debug, Clone)]
struct SimHost {
    config: HostConfig,
    level: f64,
    value: f64,
    payloads: BTreeSet<OperationKind>,
}

impl SimHost {
    fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            level: self.level,
            min_level: self.config.min_level,
            value: self.value,
            max_value: self.config.max_value,
        }
    }
}

#[derive(Debug, Clone)]
struct SimProcess {
    kind: OperationKind,
    target: String,
    threads: u32,
    lands_at: Instant,
}

#[derive(Debug)]
struct SimState {
    hosts: BTreeMap<String, SimHost>,
    /// Processes that have not landed yet.
    pending: BTreeMap<ProcessId, SimProcess>,
    next_pid: u64,
    operator_level: u32,
}

/// Simulated environment built from a `[simulation]` config section.
#[derive(Debug)]
pub struct SimEnvironment {
    extract_base_ms: u64,
    extract_fraction_per_thread: f64,
    growth_base: f64,
    extract_impact_per_thread: f64,
    replenish_impact_per_thread: f64,
    costs: CostConfig,
    state: Mutex<SimState>,
}

impl SimEnvironment {
    pub fn new(config: &SimulationConfig) -> Self {
        let hosts = config
            .hosts
            .iter()
            .map(|h| {
                let host = SimHost {
                    config: h.clone(),
                    level: h.level.max(h.min_level),
                    value: h.value.min(h.max_value),
                    payloads: BTreeSet::new(),
                };
                (h.name.clone(), host)
            })
            .collect();

        Self {
            extract_base_ms: config.extract_base_ms,
            extract_fraction_per_thread: config.extract_fraction_per_thread,
            growth_base: config.growth_base,
            extract_impact_per_thread: config.extract_impact_per_thread,
            replenish_impact_per_thread: config.replenish_impact_per_thread,
            costs: config.costs.clone(),
            state: Mutex::new(SimState {
                hosts,
                pending: BTreeMap::new(),
                next_pid: 1,
                operator_level: config.operator_level,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.settle(&mut state, Instant::now());
        f(&mut state)
    }

    /// Apply every process that has landed by `now`, in landing order.
    fn settle(&self, state: &mut SimState, now: Instant) {
        let mut landed: Vec<(Instant, ProcessId)> = state
            .pending
            .iter()
            .filter(|(_, p)| p.lands_at <= now)
            .map(|(pid, p)| (p.lands_at, *pid))
            .collect();
        landed.sort();

        for (_, pid) in landed {
            let Some(process) = state.pending.remove(&pid) else {
                continue;
            };
            if let Some(host) = state.hosts.get_mut(&process.target) {
                self.apply(host, &process);
                trace!(
                    %pid,
                    kind = %process.kind,
                    threads = process.threads,
                    target = %process.target,
                    level = host.level,
                    value = host.value,
                    "operation landed"
                );
            }
        }
    }

    fn apply(&self, host: &mut SimHost, process: &SimProcess) {
        let threads = f64::from(process.threads);
        match process.kind {
            OperationKind::Extract => {
                let share = (threads * self.extract_fraction_per_thread).min(1.0);
                host.value -= host.value * share;
                host.level += threads * self.extract_impact_per_thread;
            }
            OperationKind::Replenish => {
                let grown = (host.value + threads) * self.growth_base.powf(threads);
                host.value = grown.min(host.config.max_value);
                host.level += threads * self.replenish_impact_per_thread;
            }
            OperationKind::Stabilize => {
                let lowered = host.level - threads * STABILIZE_EFFECT_PER_OP;
                host.level = if lowered <= host.config.min_level + 1e-9 {
                    host.config.min_level
                } else {
                    lowered
                };
            }
        }
    }

    fn duration_for(&self, host: Option<&SimHost>, kind: OperationKind) -> Duration {
        let excess = host.map_or(0.0, |h| (h.level - h.config.min_level).max(0.0));
        let base = self.extract_base_ms as f64 * (1.0 + excess * LEVEL_SLOWDOWN);
        let ms = match kind {
            OperationKind::Extract => base,
            OperationKind::Replenish => base * REPLENISH_DURATION_FACTOR,
            OperationKind::Stabilize => base * STABILIZE_DURATION_FACTOR,
        };
        // Drop float noise below a microsecond before rounding up.
        let ms = (ms * 1e3).round() / 1e3;
        Duration::from_millis(ms.ceil() as u64)
    }

    /// Overwrite a host's level and value.
    pub fn set_target_state(&self, host: &str, level: f64, value: f64) {
        self.with_state(|s| {
            if let Some(h) = s.hosts.get_mut(host) {
                h.level = level;
                h.value = value;
            }
        });
    }

    pub fn set_operator_level(&self, level: u32) {
        self.with_state(|s| s.operator_level = level);
    }

    /// Processes launched but not yet landed.
    pub fn pending_count(&self) -> usize {
        self.with_state(|s| s.pending.len())
    }

    pub fn deployed_payloads(&self, host: &str) -> Vec<OperationKind> {
        self.with_state(|s| {
            s.hosts
                .get(host)
                .map(|h| h.payloads.iter().copied().collect())
                .unwrap_or_default()
        })
    }
}

impl Environment for SimEnvironment {
    fn neighbors(&self, host: &str) -> Vec<String> {
        self.with_state(|s| {
            s.hosts
                .get(host)
                .map(|h| h.config.neighbors.clone())
                .unwrap_or_default()
        })
    }

    fn has_admin(&self, host: &str) -> bool {
        self.with_state(|s| s.hosts.get(host).is_some_and(|h| h.config.admin))
    }

    fn node_capacity(&self, host: &str) -> Result<NodeCapacity, EnvError> {
        self.with_state(|s| {
            let h = s
                .hosts
                .get(host)
                .ok_or_else(|| EnvError::UnknownHost(host.to_string()))?;
            Ok(NodeCapacity {
                total: h.config.max_capacity,
                used: h.config.used_capacity,
            })
        })
    }

    fn deploy_payloads(&self, host: &str, kinds: &[OperationKind]) -> Result<(), EnvError> {
        self.with_state(|s| {
            let h = s
                .hosts
                .get_mut(host)
                .ok_or_else(|| EnvError::UnknownHost(host.to_string()))?;
            h.payloads.extend(kinds.iter().copied());
            debug!(%host, count = kinds.len(), "payloads deployed");
            Ok(())
        })
    }

    fn execute(
        &self,
        kind: OperationKind,
        host: &str,
        threads: u32,
        args: &LaunchArgs,
    ) -> Result<ProcessId, EnvError> {
        let now = Instant::now();
        self.with_state(|s| {
            let exec_error = |reason: &str| EnvError::Exec {
                kind,
                host: host.to_string(),
                threads,
                reason: reason.to_string(),
            };

            let worker = s
                .hosts
                .get(host)
                .ok_or_else(|| EnvError::UnknownHost(host.to_string()))?;
            if !worker.payloads.contains(&kind) {
                return Err(exec_error("payload not deployed"));
            }
            if threads == 0 {
                return Err(exec_error("zero threads"));
            }
            let target = s
                .hosts
                .get(&args.target)
                .ok_or_else(|| EnvError::UnknownHost(args.target.clone()))?;

            let duration = self.duration_for(Some(target), kind);
            let pid = ProcessId(s.next_pid);
            s.next_pid += 1;
            s.pending.insert(
                pid,
                SimProcess {
                    kind,
                    target: args.target.clone(),
                    threads,
                    lands_at: now + args.delay + duration,
                },
            );
            Ok(pid)
        })
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.with_state(|s| s.pending.contains_key(&pid))
    }

    fn target_state(&self, target: &str) -> Result<TargetSnapshot, EnvError> {
        self.with_state(|s| {
            s.hosts
                .get(target)
                .map(SimHost::snapshot)
                .ok_or_else(|| EnvError::UnknownHost(target.to_string()))
        })
    }

    fn duration(&self, target: &str, kind: OperationKind) -> Duration {
        self.with_state(|s| self.duration_for(s.hosts.get(target), kind))
    }

    fn unit_cost(&self, kind: OperationKind) -> f64 {
        self.costs.of(kind)
    }

    fn security_impact(&self, kind: OperationKind, threads: u32) -> f64 {
        let per_thread = match kind {
            OperationKind::Extract => self.extract_impact_per_thread,
            OperationKind::Replenish => self.replenish_impact_per_thread,
            OperationKind::Stabilize => 0.0,
        };
        per_thread * f64::from(threads)
    }

    fn stabilize_effect_per_op(&self) -> f64 {
        STABILIZE_EFFECT_PER_OP
    }

    fn extract_threads(&self, target: &str, amount: f64) -> f64 {
        self.with_state(|s| {
            let value = s.hosts.get(target).map_or(0.0, |h| h.value);
            if value <= 0.0 || amount <= 0.0 {
                return 0.0;
            }
            amount / (value * self.extract_fraction_per_thread)
        })
    }

    fn replenish_threads(&self, _target: &str, multiplier: f64) -> f64 {
        if multiplier <= 1.0 {
            return 0.0;
        }
        multiplier.ln() / self.growth_base.ln()
    }

    fn operator_level(&self) -> u32 {
        self.with_state(|s| s.operator_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, level: f64, value: f64) -> HostConfig {
        HostConfig {
            name: name.to_string(),
            neighbors: Vec::new(),
            admin: true,
            max_capacity: 64.0,
            used_capacity: 4.0,
            level,
            min_level: 5.0,
            value,
            max_value: 1_000_000.0,
        }
    }

    fn sim(level: f64, value: f64) -> SimEnvironment {
        let env = SimEnvironment::new(&SimulationConfig {
            extract_base_ms: 1000,
            hosts: vec![host("home", 1.0, 0.0), host("target", level, value)],
            ..SimulationConfig::default()
        });
        env.deploy_payloads("home", &OperationKind::ALL).unwrap();
        env
    }

    #[tokio::test(start_paused = true)]
    async fn stabilize_lands_after_delay_plus_duration() {
        let env = sim(6.0, 1_000_000.0);
        let args = LaunchArgs::new("target", Duration::from_millis(500));
        let pid = env.execute(OperationKind::Stabilize, "home", 20, &args).unwrap();

        // One level above min slows the 1000ms base to 1100ms; stabilize is 4x.
        tokio::time::sleep(Duration::from_millis(4899)).await;
        assert!(env.is_alive(pid));
        assert_eq!(env.target_state("target").unwrap().level, 6.0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!env.is_alive(pid));
        assert_eq!(env.target_state("target").unwrap().level, 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn replenish_caps_at_max_value() {
        let env = sim(5.0, 900_000.0);
        let args = LaunchArgs::new("target", Duration::ZERO);
        env.execute(OperationKind::Replenish, "home", 200, &args).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let snap = env.target_state("target").unwrap();
        assert_eq!(snap.value, snap.max_value);
        assert!((snap.level - 5.8).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn extract_takes_share_of_value() {
        let env = sim(5.0, 1_000_000.0);
        let threads = env.extract_threads("target", 100_000.0).floor() as u32;
        let args = LaunchArgs::new("target", Duration::ZERO);
        env.execute(OperationKind::Extract, "home", threads, &args).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snap = env.target_state("target").unwrap();
        assert!(snap.value >= 900_000.0);
        assert!(snap.value < 1_000_000.0);
        assert!(snap.level > 5.0);
    }

    #[test]
    fn execute_requires_deployed_payload() {
        let env = SimEnvironment::new(&SimulationConfig {
            hosts: vec![host("home", 1.0, 0.0)],
            ..SimulationConfig::default()
        });
        assert!(env.deployed_payloads("home").is_empty());
        let args = LaunchArgs::new("home", Duration::ZERO);
        let err = env.execute(OperationKind::Extract, "home", 1, &args).unwrap_err();
        assert!(matches!(err, EnvError::Exec { .. }));

        env.deploy_payloads("home", &[OperationKind::Extract]).unwrap();
        assert_eq!(env.deployed_payloads("home"), vec![OperationKind::Extract]);
    }

    #[test]
    fn durations_scale_with_level() {
        let env = sim(5.0, 1.0);
        assert_eq!(env.duration("target", OperationKind::Extract), Duration::from_millis(1000));
        assert_eq!(env.duration("target", OperationKind::Replenish), Duration::from_millis(3200));
        assert_eq!(env.duration("target", OperationKind::Stabilize), Duration::from_millis(4000));

        env.set_target_state("target", 15.0, 1.0);
        assert_eq!(env.duration("target", OperationKind::Extract), Duration::from_millis(2000));
    }
}

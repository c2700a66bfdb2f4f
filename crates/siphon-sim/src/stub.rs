//! Fixed-answer environment with call recording.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use siphon_core::{
    EnvError, Environment, LaunchArgs, NodeCapacity, OperationKind, ProcessId,
    STABILIZE_EFFECT_PER_OP, TargetSnapshot,
};

/// One recorded `execute` call.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub pid: ProcessId,
    pub kind: OperationKind,
    pub host: String,
    pub threads: u32,
    pub args: LaunchArgs,
}

#[derive(Debug, Clone)]
struct StubHost {
    capacity: NodeCapacity,
    neighbors: Vec<String>,
    admin: bool,
}

/// Everything the stub answers with. Mutate through [`StubEnvironment::update`].
#[derive(Debug, Clone)]
pub struct StubState {
    hosts: BTreeMap<String, StubHost>,
    pub targets: HashMap<String, TargetSnapshot>,
    pub durations: HashMap<OperationKind, Duration>,
    pub unit_costs: HashMap<OperationKind, f64>,
    /// Level increase per thread, by kind.
    pub impact_per_thread: HashMap<OperationKind, f64>,
    /// Level decrease per Stabilize thread.
    pub stabilize_effect: f64,
    /// Answer to every `extract_threads` query.
    pub extract_threads: f64,
    /// Answer to every `replenish_threads` query.
    pub replenish_threads: f64,
    pub operator_level: u32,
    /// Hosts whose payload deployment fails.
    pub deploy_failures: BTreeSet<String>,
    pub deployed: Vec<(String, Vec<OperationKind>)>,
    pub executions: Vec<Execution>,
    pub extract_queries: Vec<f64>,
    pub replenish_queries: Vec<f64>,
    alive: BTreeSet<ProcessId>,
    next_pid: u64,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            hosts: BTreeMap::new(),
            targets: HashMap::new(),
            durations: HashMap::from([
                (OperationKind::Extract, Duration::from_millis(1000)),
                (OperationKind::Replenish, Duration::from_millis(3200)),
                (OperationKind::Stabilize, Duration::from_millis(4000)),
            ]),
            unit_costs: HashMap::from([
                (OperationKind::Extract, 1.7),
                (OperationKind::Replenish, 1.75),
                (OperationKind::Stabilize, 1.75),
            ]),
            impact_per_thread: HashMap::from([
                (OperationKind::Extract, 0.002),
                (OperationKind::Replenish, 0.004),
                (OperationKind::Stabilize, 0.0),
            ]),
            stabilize_effect: STABILIZE_EFFECT_PER_OP,
            extract_threads: 0.0,
            replenish_threads: 0.0,
            operator_level: 1,
            deploy_failures: BTreeSet::new(),
            deployed: Vec::new(),
            executions: Vec::new(),
            extract_queries: Vec::new(),
            replenish_queries: Vec::new(),
            alive: BTreeSet::new(),
            next_pid: 1,
        }
    }
}

/// Environment with canned answers. Processes stay alive until finished by hand.
#[derive(Clone, Default)]
pub struct StubEnvironment {
    state: Arc<Mutex<StubState>>,
}

impl StubEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker host reachable from the hosts listed in `neighbors`.
    pub fn with_host(self, name: &str, total: f64, used: f64, neighbors: &[&str]) -> Self {
        self.update(|s| {
            s.hosts.insert(
                name.to_string(),
                StubHost {
                    capacity: NodeCapacity { total, used },
                    neighbors: neighbors.iter().map(|n| n.to_string()).collect(),
                    admin: true,
                },
            );
        });
        self
    }

    pub fn with_target(self, name: &str, snapshot: TargetSnapshot) -> Self {
        self.update(|s| {
            s.targets.insert(name.to_string(), snapshot);
        });
        self
    }

    pub fn without_admin(self, name: &str) -> Self {
        self.update(|s| {
            if let Some(host) = s.hosts.get_mut(name) {
                host.admin = false;
            }
        });
        self
    }

    /// Apply `f` to the stub's state.
    pub fn update<R>(&self, f: impl FnOnce(&mut StubState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.update(|s| s.executions.clone())
    }

    /// Threads launched so far, summed per kind.
    pub fn launched_threads(&self, kind: OperationKind) -> u32 {
        self.update(|s| {
            s.executions
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| e.threads)
                .sum()
        })
    }

    pub fn set_target(&self, name: &str, snapshot: TargetSnapshot) {
        self.update(|s| {
            s.targets.insert(name.to_string(), snapshot);
        });
    }

    pub fn set_operator_level(&self, level: u32) {
        self.update(|s| s.operator_level = level);
    }

    pub fn finish(&self, pid: ProcessId) {
        self.update(|s| {
            s.alive.remove(&pid);
        });
    }

    pub fn finish_all(&self) {
        self.update(|s| s.alive.clear());
    }

    pub fn alive_count(&self) -> usize {
        self.update(|s| s.alive.len())
    }
}

impl Environment for StubEnvironment {
    fn neighbors(&self, host: &str) -> Vec<String> {
        self.update(|s| {
            s.hosts
                .get(host)
                .map(|h| h.neighbors.clone())
                .unwrap_or_default()
        })
    }

    fn has_admin(&self, host: &str) -> bool {
        self.update(|s| s.hosts.get(host).is_some_and(|h| h.admin))
    }

    fn node_capacity(&self, host: &str) -> Result<NodeCapacity, EnvError> {
        self.update(|s| {
            s.hosts
                .get(host)
                .map(|h| h.capacity)
                .ok_or_else(|| EnvError::UnknownHost(host.to_string()))
        })
    }

    fn deploy_payloads(&self, host: &str, kinds: &[OperationKind]) -> Result<(), EnvError> {
        self.update(|s| {
            if s.deploy_failures.contains(host) {
                return Err(EnvError::Deploy {
                    host: host.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
            s.deployed.push((host.to_string(), kinds.to_vec()));
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
        self.update(|s| {
            if !s.hosts.contains_key(host) {
                return Err(EnvError::UnknownHost(host.to_string()));
            }
            let pid = ProcessId(s.next_pid);
            s.next_pid += 1;
            s.alive.insert(pid);
            s.executions.push(Execution {
                pid,
                kind,
                host: host.to_string(),
                threads,
                args: args.clone(),
            });
            Ok(pid)
        })
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.update(|s| s.alive.contains(&pid))
    }

    fn target_state(&self, target: &str) -> Result<TargetSnapshot, EnvError> {
        self.update(|s| {
            s.targets
                .get(target)
                .copied()
                .ok_or_else(|| EnvError::UnknownHost(target.to_string()))
        })
    }

    fn duration(&self, _target: &str, kind: OperationKind) -> Duration {
        self.update(|s| s.durations.get(&kind).copied().unwrap_or_default())
    }

    fn unit_cost(&self, kind: OperationKind) -> f64 {
        self.update(|s| s.unit_costs.get(&kind).copied().unwrap_or(1.0))
    }

    fn security_impact(&self, kind: OperationKind, threads: u32) -> f64 {
        self.update(|s| s.impact_per_thread.get(&kind).copied().unwrap_or(0.0) * f64::from(threads))
    }

    fn stabilize_effect_per_op(&self) -> f64 {
        self.update(|s| s.stabilize_effect)
    }

    fn extract_threads(&self, _target: &str, amount: f64) -> f64 {
        self.update(|s| {
            s.extract_queries.push(amount);
            s.extract_threads
        })
    }

    fn replenish_threads(&self, _target: &str, multiplier: f64) -> f64 {
        self.update(|s| {
            s.replenish_queries.push(multiplier);
            s.replenish_threads
        })
    }

    fn operator_level(&self) -> u32 {
        self.update(|s| s.operator_level)
    }
}

//! The worker pool and how it is discovered.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use siphon_core::{Environment, LaunchArgs, OperationKind, ProcessId};

use crate::node::{NodeError, NodeSnapshot, ResourceNode};

/// Every host reachable from `root`, in depth-first order, each listed once.
pub fn discover_hosts(env: &dyn Environment, root: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![root.to_string()];

    while let Some(host) = stack.pop() {
        if !seen.insert(host.clone()) {
            continue;
        }
        // Reverse so neighbours are visited in the order they were reported.
        for next in env.neighbors(&host).into_iter().rev() {
            if !seen.contains(&next) {
                stack.push(next);
            }
        }
        order.push(host);
    }

    order
}

/// Result of a best-effort launch across the pool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Launched {
    pub threads: u32,
    pub pids: Vec<ProcessId>,
}

/// Worker nodes in iteration order. Each host appears exactly once.
#[derive(Debug)]
pub struct NodePool {
    nodes: Vec<ResourceNode>,
}

impl NodePool {
    pub fn new(nodes: Vec<ResourceNode>) -> Self {
        Self { nodes }
    }

    /// Scan the topology from `root`, keep hosts with admin access, and
    /// deploy the operation payloads to each.
    pub fn discover(env: Arc<dyn Environment>, root: &str) -> Result<Self, NodeError> {
        let hosts: Vec<String> = discover_hosts(env.as_ref(), root)
            .into_iter()
            .filter(|h| {
                let admin = env.has_admin(h);
                if !admin {
                    debug!(host = %h, "skipping host without admin access");
                }
                admin
            })
            .collect();

        let pool = Self::from_hosts(env, &hosts)?;
        info!(
            root,
            nodes = pool.len(),
            "worker pool discovered"
        );
        Ok(pool)
    }

    /// Build a pool from explicit host names, deploying payloads to each.
    pub fn from_hosts(env: Arc<dyn Environment>, hosts: &[String]) -> Result<Self, NodeError> {
        let mut nodes: Vec<ResourceNode> = Vec::with_capacity(hosts.len());
        for host in hosts {
            if nodes.iter().any(|n| n.name() == host) {
                warn!(%host, "duplicate host ignored");
                continue;
            }
            env.deploy_payloads(host, &OperationKind::ALL)?;
            nodes.push(ResourceNode::new(host.clone(), env.clone())?);
        }
        Ok(Self::new(nodes))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name() == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut ResourceNode, NodeError> {
        self.nodes
            .iter_mut()
            .find(|n| n.name() == name)
            .ok_or_else(|| NodeError::UnknownNode(name.to_string()))
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut ResourceNode> {
        self.nodes.iter_mut()
    }

    pub fn total_available_capacity(&mut self) -> f64 {
        self.nodes.iter_mut().map(ResourceNode::available_capacity).sum()
    }

    /// Operations of `kind` the whole pool could start right now.
    pub fn available_ops(&mut self, kind: OperationKind) -> u32 {
        self.nodes.iter_mut().map(|n| n.available_ops(kind)).sum()
    }

    /// Whether any node has room for at least one operation of `kind`.
    pub fn has_capacity_for(&mut self, kind: OperationKind) -> bool {
        self.nodes.iter_mut().any(|n| n.available_ops(kind) > 0)
    }

    /// Start up to `threads` threads of `kind` on free capacity, filling
    /// nodes in pool order. Launches fewer when the pool runs out.
    pub fn launch_greedy(
        &mut self,
        kind: OperationKind,
        threads: u32,
        args: &LaunchArgs,
    ) -> Result<Launched, NodeError> {
        let mut launched = Launched::default();
        let mut remaining = threads;

        for node in self.nodes.iter_mut() {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(node.available_ops(kind));
            if take == 0 {
                continue;
            }
            let pid = node.launch_operation(kind, take, args)?;
            launched.pids.push(pid);
            launched.threads += take;
            remaining -= take;
        }

        if remaining > 0 {
            debug!(%kind, requested = threads, launched = launched.threads, "pool exhausted");
        }
        Ok(launched)
    }

    pub fn snapshot(&mut self) -> Vec<NodeSnapshot> {
        self.nodes.iter_mut().map(ResourceNode::snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siphon_sim::StubEnvironment;
    use std::time::Duration;

    fn ring() -> StubEnvironment {
        // home -> a -> b -> home forms a cycle; c hangs off a.
        StubEnvironment::new()
            .with_host("home", 32.0, 8.0, &["a"])
            .with_host("a", 16.0, 0.0, &["home", "b", "c"])
            .with_host("b", 8.0, 0.0, &["a", "home"])
            .with_host("c", 4.0, 0.0, &["a"])
    }

    #[test]
    fn discovery_terminates_on_cycles() {
        let env = ring();
        assert_eq!(discover_hosts(&env, "home"), vec!["home", "a", "b", "c"]);
    }

    #[test]
    fn discover_filters_admin_and_deploys() {
        let env = ring().without_admin("b");
        let pool = NodePool::discover(Arc::new(env.clone()), "home").unwrap();

        assert_eq!(pool.names(), vec!["home", "a", "c"]);
        let deployed = env.update(|s| s.deployed.clone());
        assert_eq!(deployed.len(), 3);
        assert_eq!(deployed[0].1, OperationKind::ALL.to_vec());
    }

    #[test]
    fn deploy_failure_aborts_discovery() {
        let env = ring();
        env.update(|s| {
            s.deploy_failures.insert("c".to_string());
        });
        let err = NodePool::discover(Arc::new(env), "home").unwrap_err();
        assert!(matches!(err, NodeError::Env(_)));
    }

    #[test]
    fn duplicate_hosts_collapse() {
        let env = ring();
        let hosts = vec!["a".to_string(), "home".to_string(), "a".to_string()];
        let pool = NodePool::from_hosts(Arc::new(env), &hosts).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("a"));
        assert!(pool.contains("home"));
        assert!(!pool.contains("b"));
    }

    #[test]
    fn snapshot_reports_reservations_and_live_work() {
        let env = ring();
        let mut pool = NodePool::discover(Arc::new(env.clone()), "home").unwrap();
        pool.get_mut("a").unwrap().reserve(7.0).unwrap();
        let args = LaunchArgs::new("t", Duration::ZERO);
        pool.launch_greedy(OperationKind::Extract, 2, &args).unwrap();

        let snap = pool.snapshot();
        let names: Vec<_> = snap.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["home", "a", "b", "c"]);
        // home: 32 total, 8 used outside the pool, 3.4 live.
        assert_eq!(snap[0].extracts, 1);
        assert!((snap[0].available_capacity - 20.6).abs() < 1e-9);
        assert_eq!(snap[1].reserved_capacity, 7.0);
        assert_eq!(snap[1].available_capacity, 9.0);

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json[1]["name"], "a");
        assert_eq!(json[1]["reserved_capacity"], 7.0);
    }

    #[test]
    fn launch_greedy_fills_in_order_and_stops_short() {
        let env = ring();
        let mut pool = NodePool::discover(Arc::new(env.clone()), "home").unwrap();
        // Stabilize costs 1.75: home 24 free -> 13, a -> 9, b -> 4, c -> 2.
        assert_eq!(pool.available_ops(OperationKind::Stabilize), 28);

        let args = LaunchArgs::new("t", Duration::ZERO);
        let launched = pool
            .launch_greedy(OperationKind::Stabilize, 20, &args)
            .unwrap();
        assert_eq!(launched.threads, 20);
        let per_host: Vec<_> = env
            .executions()
            .iter()
            .map(|e| (e.host.clone(), e.threads))
            .collect();
        assert_eq!(per_host, vec![("home".to_string(), 13), ("a".to_string(), 7)]);

        let rest = pool
            .launch_greedy(OperationKind::Stabilize, 100, &args)
            .unwrap();
        assert_eq!(rest.threads, 8);
        assert!(!pool.has_capacity_for(OperationKind::Stabilize));
    }

    #[test]
    fn total_capacity_tracks_finished_work() {
        let env = ring();
        let mut pool = NodePool::discover(Arc::new(env.clone()), "home").unwrap();
        assert_eq!(pool.total_available_capacity(), 52.0);

        let args = LaunchArgs::new("t", Duration::ZERO);
        pool.launch_greedy(OperationKind::Replenish, 4, &args).unwrap();
        assert_eq!(pool.total_available_capacity(), 45.0);

        env.finish_all();
        assert_eq!(pool.total_available_capacity(), 52.0);
    }
}

//! Worker nodes and the operations running on them.
//!
//! A node's free capacity is `total - reserved - live`, where `live` is the
//! summed capacity of unreserved instances still running. Terminated
//! instances are pruned on every capacity query.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use siphon_core::{CAPACITY_EPSILON, EnvError, Environment, LaunchArgs, OperationKind, ProcessId};

/// Errors raised by node capacity accounting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    #[error("cannot take {requested:.2} capacity on {node}: only {available:.2} free")]
    CapacityExceeded {
        node: String,
        requested: f64,
        available: f64,
    },

    #[error("refusing to launch zero {kind} threads on {node}")]
    EmptyLaunch { node: String, kind: OperationKind },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// One running operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationInstance {
    pub kind: OperationKind,
    pub threads: u32,
    pub node: String,
    pub pid: ProcessId,
    unit_cost: f64,
    /// Runs inside capacity already reserved on the node.
    reserved: bool,
}

impl OperationInstance {
    /// Capacity this instance occupies while alive.
    pub fn capacity(&self) -> f64 {
        f64::from(self.threads) * self.unit_cost
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved
    }
}

/// Serializable view of a node for logging.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub total_capacity: f64,
    pub reserved_capacity: f64,
    pub available_capacity: f64,
    pub extracts: usize,
    pub replenishes: usize,
    pub stabilizes: usize,
}

/// A worker with finite capacity.
pub struct ResourceNode {
    name: String,
    total_capacity: f64,
    reserved_capacity: f64,
    extracts: Vec<OperationInstance>,
    replenishes: Vec<OperationInstance>,
    stabilizes: Vec<OperationInstance>,
    env: Arc<dyn Environment>,
}

impl ResourceNode {
    /// Build a node from the environment's capacity report. Capacity already
    /// in use at this point becomes the node's baseline reservation.
    pub fn new(name: impl Into<String>, env: Arc<dyn Environment>) -> Result<Self, NodeError> {
        let name = name.into();
        let capacity = env.node_capacity(&name)?;
        Ok(Self {
            name,
            total_capacity: capacity.total,
            reserved_capacity: capacity.used.min(capacity.total),
            extracts: Vec::new(),
            replenishes: Vec::new(),
            stabilizes: Vec::new(),
            env,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total_capacity(&self) -> f64 {
        self.total_capacity
    }

    pub fn reserved_capacity(&self) -> f64 {
        self.reserved_capacity
    }

    /// Drop instances whose process has terminated.
    pub fn prune(&mut self) {
        let env = &self.env;
        for list in [&mut self.extracts, &mut self.replenishes, &mut self.stabilizes] {
            list.retain(|inst| env.is_alive(inst.pid));
        }
    }

    /// Capacity held by live instances outside any reservation.
    pub fn live_capacity(&mut self) -> f64 {
        self.prune();
        self.instances()
            .filter(|inst| !inst.reserved)
            .map(OperationInstance::capacity)
            .sum()
    }

    pub fn available_capacity(&mut self) -> f64 {
        let live = self.live_capacity();
        (self.total_capacity - self.reserved_capacity - live).max(0.0)
    }

    /// Whole operations of `unit_cost` that fit right now.
    pub fn available_operation_count(&mut self, unit_cost: f64) -> u32 {
        if unit_cost <= 0.0 {
            return 0;
        }
        (self.available_capacity() / unit_cost + CAPACITY_EPSILON).floor() as u32
    }

    pub fn available_ops(&mut self, kind: OperationKind) -> u32 {
        let cost = self.env.unit_cost(kind);
        self.available_operation_count(cost)
    }

    /// Permanently set aside `amount` capacity. Fails without change if it
    /// is not free.
    pub fn reserve(&mut self, amount: f64) -> Result<(), NodeError> {
        let available = self.available_capacity();
        if amount > available + CAPACITY_EPSILON {
            return Err(NodeError::CapacityExceeded {
                node: self.name.clone(),
                requested: amount,
                available,
            });
        }
        self.reserved_capacity += amount;
        debug!(node = %self.name, amount, reserved = self.reserved_capacity, "capacity reserved");
        Ok(())
    }

    /// Launch an operation on free capacity.
    pub fn launch_operation(
        &mut self,
        kind: OperationKind,
        threads: u32,
        args: &LaunchArgs,
    ) -> Result<ProcessId, NodeError> {
        let requested = f64::from(threads) * self.env.unit_cost(kind);
        let available = self.available_capacity();
        if requested > available + CAPACITY_EPSILON {
            return Err(NodeError::CapacityExceeded {
                node: self.name.clone(),
                requested,
                available,
            });
        }
        self.launch(kind, threads, args, false)
    }

    /// Launch an operation inside capacity this node already reserved for it.
    pub fn launch_reserved(
        &mut self,
        kind: OperationKind,
        threads: u32,
        args: &LaunchArgs,
    ) -> Result<ProcessId, NodeError> {
        self.launch(kind, threads, args, true)
    }

    fn launch(
        &mut self,
        kind: OperationKind,
        threads: u32,
        args: &LaunchArgs,
        reserved: bool,
    ) -> Result<ProcessId, NodeError> {
        if threads == 0 {
            return Err(NodeError::EmptyLaunch {
                node: self.name.clone(),
                kind,
            });
        }

        let pid = self.env.execute(kind, &self.name, threads, args)?;
        let instance = OperationInstance {
            kind,
            threads,
            node: self.name.clone(),
            pid,
            unit_cost: self.env.unit_cost(kind),
            reserved,
        };
        match kind {
            OperationKind::Extract => self.extracts.push(instance),
            OperationKind::Replenish => self.replenishes.push(instance),
            OperationKind::Stabilize => self.stabilizes.push(instance),
        }

        debug!(
            node = %self.name,
            %kind,
            threads,
            %pid,
            delay_ms = args.delay.as_millis() as u64,
            reserved,
            "operation launched"
        );
        Ok(pid)
    }

    /// Instances currently tracked, without pruning.
    pub fn instances(&self) -> impl Iterator<Item = &OperationInstance> {
        self.extracts
            .iter()
            .chain(self.replenishes.iter())
            .chain(self.stabilizes.iter())
    }

    pub fn live_count(&mut self, kind: OperationKind) -> usize {
        self.prune();
        match kind {
            OperationKind::Extract => self.extracts.len(),
            OperationKind::Replenish => self.replenishes.len(),
            OperationKind::Stabilize => self.stabilizes.len(),
        }
    }

    pub fn snapshot(&mut self) -> NodeSnapshot {
        let available_capacity = self.available_capacity();
        NodeSnapshot {
            name: self.name.clone(),
            total_capacity: self.total_capacity,
            reserved_capacity: self.reserved_capacity,
            available_capacity,
            extracts: self.extracts.len(),
            replenishes: self.replenishes.len(),
            stabilizes: self.stabilizes.len(),
        }
    }
}

impl fmt::Debug for ResourceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceNode")
            .field("name", &self.name)
            .field("total_capacity", &self.total_capacity)
            .field("reserved_capacity", &self.reserved_capacity)
            .field("instances", &self.instances().count())
            .finish()
    }
}

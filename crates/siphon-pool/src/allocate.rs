//! Greedy thread allocation against a scratch copy of node availability.
//!
//! An [`Allocator`] snapshots what every node has free, hands out threads in
//! pool order, and only touches real nodes on [`Allocator::commit`]. A plan
//! spanning several operation kinds can therefore be worked out in full and
//! abandoned on the first shortfall with no node mutated.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use siphon_core::{CAPACITY_EPSILON, OperationKind};

use crate::node::NodeError;
use crate::pool::NodePool;

/// Threads placed on one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub node: String,
    pub threads: u32,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AllocationError {
    #[error("could not place {missing} of {requested} {kind} threads")]
    Shortfall {
        kind: OperationKind,
        requested: u32,
        missing: u32,
    },
}

#[derive(Debug, Clone)]
struct Slot {
    node: String,
    available: f64,
}

/// Scratch availability for planning.
#[derive(Debug, Clone)]
pub struct Allocator {
    slots: Vec<Slot>,
}

impl Allocator {
    /// Snapshot the free capacity of every node in `pool`.
    pub fn new(pool: &mut NodePool) -> Self {
        let slots = pool
            .nodes_mut()
            .map(|node| Slot {
                node: node.name().to_string(),
                available: node.available_capacity(),
            })
            .collect();
        Self { slots }
    }

    pub fn available_capacity(&self) -> f64 {
        self.slots.iter().map(|s| s.available).sum()
    }

    fn fits(available: f64, unit_cost: f64) -> u32 {
        if unit_cost <= 0.0 {
            return 0;
        }
        (available / unit_cost + CAPACITY_EPSILON).floor() as u32
    }

    /// Place exactly `threads` threads, or nothing at all.
    pub fn take(
        &mut self,
        kind: OperationKind,
        unit_cost: f64,
        threads: u32,
    ) -> Result<Vec<Allocation>, AllocationError> {
        let fit: u32 = self
            .slots
            .iter()
            .map(|s| Self::fits(s.available, unit_cost))
            .fold(0u32, u32::saturating_add);
        if fit < threads {
            return Err(AllocationError::Shortfall {
                kind,
                requested: threads,
                missing: threads - fit,
            });
        }
        Ok(self.take_partial(kind, unit_cost, threads))
    }

    /// Place as many of `threads` as fit.
    pub fn take_partial(
        &mut self,
        kind: OperationKind,
        unit_cost: f64,
        threads: u32,
    ) -> Vec<Allocation> {
        let mut out = Vec::new();
        let mut remaining = threads;

        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(Self::fits(slot.available, unit_cost));
            if take == 0 {
                continue;
            }
            slot.available = (slot.available - f64::from(take) * unit_cost).max(0.0);
            remaining -= take;
            debug!(node = %slot.node, %kind, threads = take, "threads allocated");
            out.push(Allocation {
                node: slot.node.clone(),
                threads: take,
            });
        }
        out
    }

    /// Reserve `allocations` on the real nodes.
    pub fn commit(
        pool: &mut NodePool,
        allocations: &[Allocation],
        unit_cost: f64,
    ) -> Result<(), NodeError> {
        for alloc in allocations {
            pool.get_mut(&alloc.node)?
                .reserve(f64::from(alloc.threads) * unit_cost)?;
        }
        Ok(())
    }
}

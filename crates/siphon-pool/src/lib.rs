//! Siphon worker pool: capacity accounting and thread placement.
//!
//! This crate tracks what each worker node can still run and decides where
//! operation threads go. It does NOT decide what to run (that's
//! `siphon-scheduler`); it answers "how many threads of this kind fit, and
//! where".
//!
//! # Components
//!
//! - **`node`**: [`ResourceNode`] and its live [`OperationInstance`]s
//! - **`pool`**: [`NodePool`], topology discovery, greedy launching
//! - **`allocate`**: [`Allocator`], all-or-nothing greedy reservation plans

pub mod allocate;
pub mod node;
pub mod pool;

pub use allocate::{Allocation, AllocationError, Allocator};
pub use node::{NodeError, NodeSnapshot, OperationInstance, ResourceNode};
pub use pool::{Launched, NodePool, discover_hosts};

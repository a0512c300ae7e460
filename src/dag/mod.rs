// src/dag/mod.rs

//! Task graph, instance graph and scheduling.
//!
//! - [`graph`] holds the task-level DAG (explicit, inferred and `follows`
//!   edges) and rejects cycles.
//! - [`instance`] defines task instances and their per-run states.
//! - [`resolver`] materialises instances, deferring consumers of splits.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   instances are ready and propagates failures.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod graph;
pub mod instance;
pub mod resolver;
pub mod scheduler;
pub mod scheduler_step;

pub use graph::TaskGraph;
pub use instance::{InstanceId, InstanceState, ScheduledInstance, TaskInstance};
pub use resolver::{DeferredNode, DeferredState, InstanceGraph, ResolveContext};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;

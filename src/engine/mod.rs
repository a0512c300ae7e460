// src/engine/mod.rs

//! Orchestration engine for pipedag.
//!
//! This module ties together:
//! - the instance scheduler
//! - the main runtime event loop that reacts to:
//!   - instance start / completion events from the executor
//!   - shutdown signals (Ctrl-C)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::path::PathBuf;

use crate::dag::InstanceId;

pub use crate::task::TaskName;

/// Terminal status reported by an execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceOutcome {
    /// The body succeeded and its outputs are in place (for a split: the
    /// outputs it actually produced).
    Succeeded(Vec<PathBuf>),
    Failed(String),
    Cancelled,
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// An instance acquired its slot and output locks and is running.
    InstanceStarted { id: InstanceId },
    /// An instance reached a terminal status.
    InstanceCompleted {
        id: InstanceId,
        outcome: InstanceOutcome,
    },
    /// Cancel the whole run (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;
pub mod summary;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
pub use summary::{InstanceReport, RunSummary};

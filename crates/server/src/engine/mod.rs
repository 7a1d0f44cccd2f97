//! Execution engine.
//!
//! Contains the orchestrator that turns execution requests into agent
//! commands and merged results.

pub mod orchestrator;

pub use orchestrator::{
    ExecutionReport, ExecutionRequest, KillReport, Orchestrator, PortCheckReport,
};

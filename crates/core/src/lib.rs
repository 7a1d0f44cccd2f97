//! Test-execution orchestration core.
//!
//! Pure, in-memory building blocks shared by the dispatch and server
//! crates: node inventory and liveness, node selection, dispatch outcome
//! summaries, monitor schedule arithmetic, and sample merging. Nothing in
//! this crate performs I/O.

pub mod error;
pub mod liveness;
pub mod node;
pub mod outcome;
pub mod registry;
pub mod sample;
pub mod schedule;
pub mod selection;
pub mod types;

//! Agent command transport.
//!
//! [`AgentChannel`](channel::AgentChannel) owns the route table of connected
//! agents, pushes command envelopes to them and correlates their replies by
//! invocation id. Every dispatch settles into a
//! [`DispatchOutcome`](testfleet_core::outcome::DispatchOutcome); transport
//! failures are never returned as errors.

pub mod channel;
pub mod error;
pub mod events;
pub mod protocol;
pub mod router;

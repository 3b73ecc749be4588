//! Agent personas and call routing.
//!
//! Resolution is a deterministic function from (direction, called number,
//! calling number, time) to an agent, a forward target, or a rejection.
//! State is read-mostly: whole immutable snapshots swapped under a lock,
//! with a live RAII permit gauge for per-agent concurrency.

pub mod agent;
pub mod resolver;

pub use agent::{AgentConfig, AgentError, BusinessHours, DirectionPolicy, RoutingType};
pub use resolver::{
    CallPermit, NumberMapping, RejectReason, Resolution, RoutingSnapshot, RoutingTable,
};

//! Core types and error definitions for the Cadence control plane.
//!
//! This crate provides the foundational types shared across all Cadence crates:
//! the unified error enum plus the task and agent records that the planner,
//! router and orchestrator operate on.
//!
//! # Main types
//!
//! - [`CadenceError`]: Unified error enum for all Cadence subsystems.
//! - [`CadenceResult`]: Convenience alias for `Result<T, CadenceError>`.
//! - [`Task`]: A unit of work with its lifecycle, context and scheduling hints.
//! - [`TaskContext`] / [`TaskMetadata`]: Typed context fields plus a residual open map.
//! - [`Agent`]: A worker agent with its running performance averages.
//! - [`AgentType`]: Specialisation used for routing hints.

/// Agent records and agent types.
pub mod agent;
/// Error enum and result alias.
pub mod error;
/// Task records, lifecycle and context.
pub mod task;

pub use agent::{Agent, AgentStatus, AgentType};
pub use error::{CadenceError, CadenceResult};
pub use task::{Priority, Task, TaskContext, TaskMetadata, TaskStatus};

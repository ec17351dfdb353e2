//! Scheduler runner -- owns the dispatcher thread and the worker pool.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, shared state, lifecycle and introspection
//! - `dispatcher`: promotion of due tasks from waiting to pending
//! - `worker`: task execution, re-arming and retirement
//! - `submit`: once / interval / thread-entry submission
//! - `control`: cancellation, completion waits and membership queries

mod control;
mod core;
mod dispatcher;
mod submit;
mod worker;
#[cfg(test)]
mod tests;

pub use self::core::Scheduler;

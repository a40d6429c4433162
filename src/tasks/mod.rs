//! # Tasks and their registry.
//!
//! This module provides the task-related types:
//! - [`Task`] - a task instance with progress counters and injected collaborators
//! - [`TaskKind`] - trait implemented by each data-category variant
//! - [`TaskContext`] / [`Collaborators`] - what `init` and restore inject
//! - [`TaskSnapshot`] - checkpoint form of a task
//! - [`TaskRegistry`] - tag → variant constructor, with an unknown-tag stub
//! - [`Mock`] - built-in smoke-test variant

mod builtin;
mod registry;
mod task;

pub use builtin::{Mock, Unknown, MOCK_URL};
pub use registry::TaskRegistry;
pub use task::{Collaborators, Task, TaskContext, TaskKind, TaskSnapshot};

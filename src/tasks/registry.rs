//! # TaskRegistry: tag → variant constructor.
//!
//! The registry is the closed set of task variants a service can build, either
//! from a request name or from a checkpoint's `taskType`. Adding a variant means
//! registering it here.
//!
//! Unknown tags never fail at construction time: they produce an
//! [`Unknown`] stub that keeps the tag (so the checkpoint round-trips) and
//! fails with [`TaskError::UnknownTask`](crate::TaskError::UnknownTask) when run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::builtin::{Mock, Unknown};
use super::task::{Collaborators, Task, TaskKind, TaskSnapshot};

type Ctor = Arc<dyn Fn() -> Arc<dyn TaskKind> + Send + Sync>;

/// Mapping from task tag to variant constructor.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    ctors: HashMap<String, Ctor>,
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl TaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in variants (`Mock`).
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Mock", Mock::default);
        registry
    }

    /// Registers (or replaces) the constructor for `tag`.
    pub fn register<K, F>(&mut self, tag: impl Into<String>, ctor: F) -> &mut Self
    where
        K: TaskKind,
        F: Fn() -> K + Send + Sync + 'static,
    {
        self.ctors
            .insert(tag.into(), Arc::new(move || Arc::new(ctor()) as Arc<dyn TaskKind>));
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.ctors.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.ctors.keys().cloned().collect();
        tags.sort_unstable();
        tags
    }

    fn kind(&self, tag: &str) -> Arc<dyn TaskKind> {
        match self.ctors.get(tag) {
            Some(ctor) => ctor(),
            None => {
                tracing::warn!(tag, "unknown task tag, using stub");
                Arc::new(Unknown::new(tag))
            }
        }
    }

    /// Builds a fresh task for `tag`.
    pub fn create(&self, tag: &str) -> Task {
        Task::new(tag, self.kind(tag))
    }

    /// Rebuilds a task from a checkpoint, restoring its plain fields and
    /// injecting `collaborators`.
    pub fn from_snapshot(&self, snapshot: TaskSnapshot, collaborators: Collaborators) -> Task {
        let kind = self.kind(&snapshot.tag);
        Task::restore(snapshot, kind, collaborators)
    }
}

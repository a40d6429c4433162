//! Built-in task variants.

use async_trait::async_trait;

use crate::error::TaskError;

use super::{Task, TaskKind};

/// Default target of [`Mock`].
pub const MOCK_URL: &str = "https://foo.bar/";

/// Smoke-test variant: a single gated fetch.
#[derive(Debug, Clone)]
pub struct Mock {
    url: String,
}

impl Default for Mock {
    fn default() -> Self {
        Self::new(MOCK_URL)
    }
}

impl Mock {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TaskKind for Mock {
    fn name(&self) -> &str {
        "Mock"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        task.fetcher()?.get(self.url.as_str()).await?;
        task.complete();
        Ok(())
    }
}

/// Stand-in for a tag the registry does not know. Fails only when run.
#[derive(Debug, Clone)]
pub struct Unknown {
    tag: String,
}

impl Unknown {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

#[async_trait]
impl TaskKind for Unknown {
    fn name(&self) -> &str {
        &self.tag
    }

    async fn run(&self, _task: &Task) -> Result<(), TaskError> {
        Err(TaskError::UnknownTask {
            tag: self.tag.clone(),
        })
    }
}

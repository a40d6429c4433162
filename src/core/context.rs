//! # Context: the collaborators shared by a service and everything it runs.
//!
//! One [`Context`] is built per service by
//! [`ServiceBuilder::build`](crate::ServiceBuilder::build) and handed (as an
//! `Arc`) to jobs and tasks. Nothing in the crate reaches for a global instead.
//! Dropping the last `Arc` releases the collaborators; there is no other
//! teardown.

use std::sync::Arc;

use crate::config::Config;
use crate::events::Bus;
use crate::logger::Logger;
use crate::net::CookieJar;
use crate::storage::{Scope, StorageFactory};
use crate::tasks::{Collaborators, TaskRegistry};

use super::{Fetcher, Gate};

pub struct Context {
    pub config: Config,
    pub bus: Bus,
    pub logger: Logger,
    pub gate: Arc<Gate>,
    pub fetcher: Arc<Fetcher>,
    pub storage: Arc<dyn StorageFactory>,
    pub cookies: Arc<dyn CookieJar>,
    pub registry: Arc<TaskRegistry>,
}

impl Context {
    /// Collaborators for a task working against `scope`.
    pub fn collaborators(&self, scope: Arc<dyn Scope>) -> Collaborators {
        Collaborators {
            fetch: self.fetcher.clone(),
            logger: self.logger.clone(),
            scope,
            bus: self.bus.clone(),
        }
    }
}

//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to everything observable about a service: run-loop state
//! changes, log entries, request intake and job/task lifecycle.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Gate` (state changes), `Logger` (log entries), `Service`
//!   (request intake, unit lifecycle), `Job` workers (task lifecycle),
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Service::subscribe()` receivers and the service's
//!   subscriber listener, which fans out to `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};

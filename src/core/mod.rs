//! Service core: run-loop state machine, request pacing, and the loop itself.
//!
//! - [`Gate`] owns the [`RunLoopState`] and decides when work may proceed.
//! - [`Fetcher`] gates and paces every outbound request.
//! - [`Service`] drives the queue of pending requests, one unit at a time.
//! - [`ServiceHandle`] is the message-channel control surface.
//! - [`Context`] bundles the collaborators shared by everything above.
//!
//! Construct a service with [`ServiceBuilder`].

mod builder;
mod context;
mod handle;
mod pacing;
mod service;
mod state;

pub use builder::ServiceBuilder;
pub use context::Context;
pub use handle::{Command, Envelope, Outcome, Reply, ServiceHandle};
pub use pacing::Fetcher;
pub use service::{PendingRequest, Service, ServiceSnapshot, UnitSnapshot, JOB_REQUEST};
pub use state::{Gate, RunLoopState};

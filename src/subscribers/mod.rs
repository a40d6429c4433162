//! # Event subscribers for the jobvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`].
//!
//! ```text
//! Event flow:
//!   Gate / Logger / Service / Job ── publish(Event) ──► Bus
//!                                                        │
//!                                     subscriber listener (in Service)
//!                                                        │
//!                                                 SubscriberSet::emit
//!                                              ┌─────────┼─────────┐
//!                                              ▼         ▼         ▼
//!                                          LogWriter   UI feed   Custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use jobvisor::{Event, EventKind, Subscribe};
//! use async_trait::async_trait;
//!
//! struct Progress;
//!
//! #[async_trait]
//! impl Subscribe for Progress {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == EventKind::TaskStopped {
//!             // repaint progress bar
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "progress" }
//! }
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;

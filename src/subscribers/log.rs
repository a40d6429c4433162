//! # LogWriter: renders runtime events through `tracing`.
//!
//! ## Example output
//! ```text
//! INFO  jobvisor::events: state changed from=stopped to=start_pending
//! INFO  jobvisor::events: task stopped task="follower" job=Some(3)
//! WARN  jobvisor::events: task failed task="note" job=Some(3) reason="upstream returned 502 ..."
//! ```
//!
//! Log entries are not re-rendered: the [`Logger`](crate::Logger) already
//! forwards them to `tracing` when they are written.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let request = e.request.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::StateChanged => {
                tracing::info!(target: "jobvisor::events", from = ?e.from, to = ?e.to, "state changed");
            }
            EventKind::Log => {}
            EventKind::RequestQueued => {
                tracing::debug!(target: "jobvisor::events", request, "request queued");
            }
            EventKind::UnitStarting => {
                tracing::info!(target: "jobvisor::events", request, "unit starting");
            }
            EventKind::UnitFinished => {
                tracing::info!(target: "jobvisor::events", request, "unit finished");
            }
            EventKind::UnitFailed => {
                tracing::error!(target: "jobvisor::events", request, reason, "unit failed");
            }
            EventKind::JobStarted => {
                tracing::info!(target: "jobvisor::events", job = ?e.job, "job started");
            }
            EventKind::JobFinished => {
                tracing::info!(target: "jobvisor::events", job = ?e.job, "job finished");
            }
            EventKind::TaskStarting => {
                tracing::debug!(target: "jobvisor::events", task, job = ?e.job, "task starting");
            }
            EventKind::TaskStopped => {
                tracing::info!(target: "jobvisor::events", task, job = ?e.job, "task stopped");
            }
            EventKind::TaskProgress => {
                if let Some((completed, total)) = e.progress {
                    tracing::debug!(
                        target: "jobvisor::events",
                        task, job = ?e.job, completed, total, "task progress"
                    );
                }
            }
            EventKind::TaskFailed => {
                tracing::warn!(target: "jobvisor::events", task, job = ?e.job, reason, "task failed");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                tracing::warn!(target: "jobvisor::events", subscriber = task, reason, "subscriber trouble");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}

//! # Run-loop state machine.
//!
//! [`Gate`] owns the single [`RunLoopState`] of a service and decides when the
//! run-loop (and every outbound request) may make progress.
//!
//! ```text
//!            start()                 proceed()
//!  Stopped ───────────► StartPending ─────────► Running
//!     ▲                      │                     │
//!     │ proceed()            │ stop()       stop() │
//!     │ (then parks)         ▼                     │
//!     └──────────────── StopPending ◄──────────────┘
//! ```
//!
//! ## Rules
//! - Transitions are serialized: each one is a compare-and-set on the watch
//!   channel's value, so concurrent `start`/`stop`/`ready` never interleave.
//! - `start()` is valid only from `Stopped`; `stop()` only from `Running` or
//!   `StartPending`. Anything else returns [`RuntimeError::InvalidTransition`]
//!   and leaves the state alone.
//! - `proceed()` only returns in `Running`. In `StopPending` it moves to
//!   `Stopped`; in `Stopped` it parks until `start()` and then re-evaluates.
//! - `ready()` demotes `Running` to `StartPending` and proceeds, so a `stop()`
//!   issued during a unit of work takes effect at the unit boundary.
//! - Every transition publishes [`EventKind::StateChanged`](crate::EventKind::StateChanged).

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::RuntimeError;
use crate::events::{Bus, Event};

/// State of the run-loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunLoopState {
    Stopped,
    StartPending,
    StopPending,
    Running,
}

impl RunLoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunLoopState::Stopped => "stopped",
            RunLoopState::StartPending => "start_pending",
            RunLoopState::StopPending => "stop_pending",
            RunLoopState::Running => "running",
        }
    }
}

impl fmt::Display for RunLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the gate should go from a given state, if anywhere.
enum Step {
    /// Already admitted.
    Pass,
    /// Move to the given state and re-evaluate.
    Move(RunLoopState),
    /// Wait for `start()`.
    Park,
}

/// The run-loop gate. Shared via `Arc` between the service loop and the fetcher.
pub struct Gate {
    tx: watch::Sender<RunLoopState>,
    bus: Bus,
}

impl Gate {
    /// Creates a gate in `Stopped`.
    pub fn new(bus: Bus) -> Self {
        let (tx, _rx) = watch::channel(RunLoopState::Stopped);
        Self { tx, bus }
    }

    /// Current state.
    pub fn status(&self) -> RunLoopState {
        *self.tx.borrow()
    }

    /// A receiver notified on every transition.
    pub fn watch(&self) -> watch::Receiver<RunLoopState> {
        self.tx.subscribe()
    }

    /// `Stopped → StartPending`, waking a parked loop.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.transition("start", |s| {
            matches!(s, RunLoopState::Stopped).then_some(RunLoopState::StartPending)
        })
    }

    /// `Running | StartPending → StopPending`.
    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.transition("stop", |s| {
            matches!(s, RunLoopState::Running | RunLoopState::StartPending)
                .then_some(RunLoopState::StopPending)
        })
    }

    /// Resolves once the state is `Running`.
    ///
    /// `StartPending` is promoted to `Running`. `StopPending` becomes `Stopped`,
    /// after which the caller parks until a later `start()`.
    pub async fn proceed(&self) {
        self.drive(|s| match s {
            RunLoopState::Running => Step::Pass,
            RunLoopState::StartPending => Step::Move(RunLoopState::Running),
            RunLoopState::StopPending => Step::Move(RunLoopState::Stopped),
            RunLoopState::Stopped => Step::Park,
        })
        .await
    }

    /// Called between units of work: `Running` is demoted to `StartPending`
    /// first, then the gate proceeds as usual.
    pub async fn ready(&self) {
        self.tx.send_if_modified(|s| {
            if *s == RunLoopState::Running {
                *s = RunLoopState::StartPending;
                self.bus.publish(Event::state_changed(
                    RunLoopState::Running,
                    RunLoopState::StartPending,
                ));
                true
            } else {
                false
            }
        });
        self.proceed().await
    }

    /// Resolves once a `stop()` is pending.
    pub async fn stop_requested(&self) {
        let mut rx = self.tx.subscribe();
        // `self` keeps the sender alive, so the wait cannot fail here.
        let _ = rx.wait_for(|s| *s == RunLoopState::StopPending).await;
    }

    /// Admission for outbound requests.
    ///
    /// Work already in flight keeps going while a stop is pending; only a
    /// `Stopped` loop holds requests back.
    pub async fn admit(&self) {
        self.drive(|s| match s {
            RunLoopState::Running | RunLoopState::StopPending => Step::Pass,
            RunLoopState::StartPending => Step::Move(RunLoopState::Running),
            RunLoopState::Stopped => Step::Park,
        })
        .await
    }

    fn transition<F>(&self, op: &'static str, next: F) -> Result<(), RuntimeError>
    where
        F: FnOnce(RunLoopState) -> Option<RunLoopState>,
    {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|s| match next(*s) {
            Some(to) => {
                self.bus.publish(Event::state_changed(*s, to));
                *s = to;
                true
            }
            None => {
                outcome = Err(RuntimeError::InvalidTransition { op, state: *s });
                false
            }
        });
        outcome
    }

    async fn drive<F>(&self, plan: F)
    where
        F: Fn(RunLoopState) -> Step,
    {
        let mut rx = self.tx.subscribe();
        loop {
            let mut park = false;
            let mut pass = false;
            self.tx.send_if_modified(|s| match plan(*s) {
                Step::Pass => {
                    pass = true;
                    false
                }
                Step::Move(to) => {
                    self.bus.publish(Event::state_changed(*s, to));
                    *s = to;
                    true
                }
                Step::Park => {
                    park = true;
                    false
                }
            });
            if pass {
                return;
            }
            if park {
                // The sender lives as long as `self`, so this only errs if the
                // gate is being torn down underneath us.
                if rx
                    .wait_for(|s| *s != RunLoopState::Stopped)
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }
    }
}

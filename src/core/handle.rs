//! # Remote control of a service over a message channel.
//!
//! Every operation a remote caller (UI page, popup, another process bridge)
//! may invoke is a [`Command`] variant. Commands travel as [`Envelope`]s with
//! a correlation id over a bounded `mpsc` channel; [`Service::serve`] executes
//! them one at a time and answers on the envelope's `oneshot` with a
//! [`Reply`] carrying the same id.
//!
//! ```text
//! ServiceHandle::call(cmd) ── Envelope{id, cmd, reply} ──► mpsc ──► Service::serve
//!        ▲                                                              │
//!        └────────────── Reply{id, outcome} ◄── oneshot ◄───────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

use super::{RunLoopState, Service, ServiceSnapshot};

/// Operations exposed to remote callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Start,
    Stop,
    Status,
    Emit {
        name: String,
        #[serde(default)]
        args: Value,
    },
    SaveState,
}

/// A command in transit.
#[derive(Debug)]
pub struct Envelope {
    pub id: u64,
    pub command: Command,
    reply: oneshot::Sender<Reply>,
}

/// Result of one command.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Done,
    Status(RunLoopState),
    Snapshot(ServiceSnapshot),
    Rejected(RuntimeError),
}

/// Answer to the envelope with the same `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: u64,
    pub outcome: Outcome,
}

/// Client side of the command channel. Cheap to clone.
#[derive(Clone)]
pub struct ServiceHandle {
    tx: mpsc::Sender<Envelope>,
    next_id: Arc<AtomicU64>,
}

impl ServiceHandle {
    /// Creates a handle and the receiver to pass to [`Service::serve`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                next_id: Arc::new(AtomicU64::new(1)),
            },
            rx,
        )
    }

    /// Sends `command` and waits for its reply.
    pub async fn call(&self, command: Command) -> Result<Reply, RuntimeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { id, command, reply })
            .await
            .map_err(|_| RuntimeError::Closed)?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    async fn expect_done(&self, command: Command) -> Result<(), RuntimeError> {
        match self.call(command).await?.outcome {
            Outcome::Rejected(e) => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn start(&self) -> Result<(), RuntimeError> {
        self.expect_done(Command::Start).await
    }

    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.expect_done(Command::Stop).await
    }

    pub async fn emit(&self, name: impl Into<String>, args: Value) -> Result<(), RuntimeError> {
        self.expect_done(Command::Emit {
            name: name.into(),
            args,
        })
        .await
    }

    pub async fn status(&self) -> Result<RunLoopState, RuntimeError> {
        match self.call(Command::Status).await?.outcome {
            Outcome::Status(state) => Ok(state),
            Outcome::Rejected(e) => Err(e),
            _ => Err(RuntimeError::Closed),
        }
    }

    pub async fn save_state(&self) -> Result<ServiceSnapshot, RuntimeError> {
        match self.call(Command::SaveState).await?.outcome {
            Outcome::Snapshot(snapshot) => Ok(snapshot),
            Outcome::Rejected(e) => Err(e),
            _ => Err(RuntimeError::Closed),
        }
    }
}

impl Service {
    /// Executes one command.
    pub fn execute_command(&self, command: Command) -> Outcome {
        let done = |r: Result<(), RuntimeError>| match r {
            Ok(()) => Outcome::Done,
            Err(e) => Outcome::Rejected(e),
        };
        match command {
            Command::Start => done(self.start()),
            Command::Stop => done(self.stop()),
            Command::Status => Outcome::Status(self.status()),
            Command::Emit { name, args } => {
                self.emit(name, args);
                Outcome::Done
            }
            Command::SaveState => Outcome::Snapshot(self.save_state()),
        }
    }

    /// Answers envelopes from `rx` until `token` is cancelled or every
    /// handle is dropped.
    pub async fn serve(&self, mut rx: mpsc::Receiver<Envelope>, token: CancellationToken) {
        loop {
            let envelope = tokio::select! {
                _ = token.cancelled() => break,
                envelope = rx.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Envelope { id, command, reply } = envelope;
            tracing::debug!(id, ?command, "command");
            let outcome = self.execute_command(command);
            if reply.send(Reply { id, outcome }).is_err() {
                tracing::debug!(id, "caller went away before the reply");
            }
        }
    }

    /// Creates a handle and spawns [`Service::serve`] for it.
    pub fn handle(self: &Arc<Self>, token: CancellationToken) -> ServiceHandle {
        let (handle, rx) = ServiceHandle::channel(self.context().config.command_capacity);
        let me = Arc::clone(self);
        tokio::spawn(async move { me.serve(rx, token).await });
        handle
    }
}

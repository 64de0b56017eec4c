//! # Station Actor
//!
//! Owns the [`Dispatcher`] on a single task. Link workers and presentation
//! layers talk to it through a cloneable [`StationHandle`]; every mutation is
//! serialized through one command channel, so snapshots are always consistent.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::dispatcher::Dispatcher;
use super::state::{LinkStatus, TelemetrySnapshot};
use crate::error::{GroundStationError, Result};
use crate::protocol::frame::{Frame, LinkId};

/// Commands accepted by the station actor
#[derive(Debug)]
pub enum StationCommand {
    /// Apply a decoded frame
    Frame(Frame),
    /// Update a link's connection status
    LinkStatus(LinkId, LinkStatus),
    /// Append a line to the station log
    Log(String),
    /// Reply with a snapshot of the current state
    Snapshot(oneshot::Sender<TelemetrySnapshot>),
}

/// Cloneable sender side of the station actor
#[derive(Debug, Clone)]
pub struct StationHandle {
    tx: mpsc::Sender<StationCommand>,
}

impl StationHandle {
    async fn send(&self, command: StationCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| GroundStationError::StationClosed("command channel closed".to_string()))
    }

    /// Submit a decoded frame for dispatch
    pub async fn submit_frame(&self, frame: Frame) -> Result<()> {
        self.send(StationCommand::Frame(frame)).await
    }

    pub async fn set_link_status(&self, link: LinkId, status: LinkStatus) -> Result<()> {
        self.send(StationCommand::LinkStatus(link, status)).await
    }

    /// Append a human-readable line to the station log
    pub async fn log(&self, message: impl Into<String>) -> Result<()> {
        self.send(StationCommand::Log(message.into())).await
    }

    /// Request a snapshot of the current state
    ///
    /// # Errors
    ///
    /// Returns `GroundStationError::StationClosed` if the actor has stopped
    pub async fn snapshot(&self) -> Result<TelemetrySnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(StationCommand::Snapshot(reply)).await?;
        rx.await
            .map_err(|_| GroundStationError::StationClosed("snapshot reply dropped".to_string()))
    }

    /// Whether the actor is still accepting commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the station actor
///
/// The actor runs until every [`StationHandle`] has been dropped, then returns
/// the dispatcher so callers can inspect the final state.
///
/// # Arguments
///
/// * `dispatcher` - Dispatcher owning the station state and sink
/// * `capacity` - Command queue capacity
pub fn spawn(dispatcher: Dispatcher, capacity: usize) -> (StationHandle, JoinHandle<Dispatcher>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run(dispatcher, rx));
    (StationHandle { tx }, task)
}

async fn run(mut dispatcher: Dispatcher, mut rx: mpsc::Receiver<StationCommand>) -> Dispatcher {
    debug!("Station actor started");

    while let Some(command) = rx.recv().await {
        match command {
            StationCommand::Frame(frame) => dispatcher.dispatch(frame),
            StationCommand::LinkStatus(link, status) => dispatcher.set_link_status(link, status),
            StationCommand::Log(message) => dispatcher.log(message),
            StationCommand::Snapshot(reply) => {
                // Receiver may have given up waiting
                let _ = reply.send(dispatcher.snapshot());
            }
        }
    }

    info!("Station actor stopped");
    dispatcher
}

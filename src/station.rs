//! # Ground Station
//!
//! Supervises the station actor and one worker per configured link.
//!
//! Each worker runs under a child of the station's cancellation token, so a
//! single link can be disconnected and reconnected while the other keeps
//! running, and stopping the station stops every link.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{GroundStationError, Result};
use crate::protocol::frame::{LinkId, MAX_LINKS};
use crate::serial::{LinkExit, LinkWorker, PortOpener};
use crate::telemetry::actor::{self, StationHandle};
use crate::telemetry::dispatcher::Dispatcher;
use crate::telemetry::sink::StationSink;
use crate::telemetry::state::TelemetrySnapshot;

struct WorkerSlot {
    cancel: CancellationToken,
    task: JoinHandle<LinkExit>,
}

/// Running ground station
pub struct GroundStation {
    config: Config,
    opener: Arc<dyn PortOpener>,
    handle: StationHandle,
    actor: JoinHandle<Dispatcher>,
    cancel: CancellationToken,
    workers: [Option<WorkerSlot>; MAX_LINKS],
}

impl std::fmt::Debug for GroundStation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundStation")
            .field("links", &self.config.links.len())
            .field("running", &LinkId::ALL.map(|l| self.is_running(l)))
            .finish_non_exhaustive()
    }
}

impl GroundStation {
    /// Start the station and connect every configured link
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Validated station configuration
    /// * `opener` - Port factory shared by all links
    /// * `sink` - Receives images, log lines and history updates
    ///
    /// # Errors
    ///
    /// Returns `GroundStationError::Config` if the configuration is invalid
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use balloon_ground::config::Config;
    /// use balloon_ground::serial::SerialOpener;
    /// use balloon_ground::station::GroundStation;
    /// use balloon_ground::telemetry::DirectorySink;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = Config::load("config/default.toml")?;
    ///     let sink = DirectorySink::from_config(&config.output);
    ///     let station = GroundStation::start(config, Arc::new(SerialOpener), Box::new(sink))?;
    ///
    ///     println!("{}", station.snapshot().await?.status_line());
    ///     station.stop().await?;
    ///     Ok(())
    /// }
    /// ```
    pub fn start(config: Config, opener: Arc<dyn PortOpener>, sink: Box<dyn StationSink>) -> Result<Self> {
        config.validate()?;

        let dispatcher = Dispatcher::from_config(&config, sink);
        let (handle, actor) = actor::spawn(dispatcher, config.station.command_queue_capacity);

        let mut station = Self {
            config,
            opener,
            handle,
            actor,
            cancel: CancellationToken::new(),
            workers: [None, None],
        };

        for link in station.links() {
            station.connect(link)?;
        }

        info!("Ground station started with {} link(s)", station.config.links.len());
        Ok(station)
    }

    /// Configured links, in physical order
    pub fn links(&self) -> Vec<LinkId> {
        LinkId::ALL
            .into_iter()
            .take(self.config.links.len())
            .collect()
    }

    /// Handle for submitting commands and reading snapshots
    pub fn handle(&self) -> StationHandle {
        self.handle.clone()
    }

    pub async fn snapshot(&self) -> Result<TelemetrySnapshot> {
        self.handle.snapshot().await
    }

    /// Whether a link's worker is still running
    pub fn is_running(&self, link: LinkId) -> bool {
        self.workers[link.index()]
            .as_ref()
            .is_some_and(|slot| !slot.task.is_finished())
    }

    /// Start a worker for a link
    ///
    /// # Returns
    ///
    /// * `Result<bool>` - `false` if the link already had a running worker
    ///
    /// # Errors
    ///
    /// Returns `GroundStationError::Serial` if the link is not configured
    pub fn connect(&mut self, link: LinkId) -> Result<bool> {
        let link_config = self
            .config
            .links
            .get(link.index())
            .cloned()
            .ok_or_else(|| GroundStationError::Serial(format!("{} is not configured", link)))?;

        if self.is_running(link) {
            return Ok(false);
        }

        let cancel = self.cancel.child_token();
        let worker = LinkWorker::new(
            link,
            link_config,
            &self.config.station,
            self.opener.clone(),
            self.handle.clone(),
        );
        let task = tokio::spawn(worker.run(cancel.clone()));

        info!("Started worker for {}", link);
        self.workers[link.index()] = Some(WorkerSlot { cancel, task });
        Ok(true)
    }

    /// Stop a link's worker and wait for it to release its port
    ///
    /// # Returns
    ///
    /// * `Option<LinkExit>` - How the worker ended, `None` if it was never started
    pub async fn disconnect(&mut self, link: LinkId) -> Option<LinkExit> {
        let slot = self.workers[link.index()].take()?;
        slot.cancel.cancel();
        Self::join(link, slot.task).await
    }

    /// Stop every link and the station actor
    ///
    /// # Returns
    ///
    /// * `Result<TelemetrySnapshot>` - Final state after all links stopped
    ///
    /// # Errors
    ///
    /// Returns `GroundStationError::StationClosed` if the actor ended abnormally
    pub async fn stop(mut self) -> Result<TelemetrySnapshot> {
        info!("Stopping ground station");
        self.cancel.cancel();

        for link in LinkId::ALL {
            if let Some(slot) = self.workers[link.index()].take() {
                Self::join(link, slot.task).await;
            }
        }

        let snapshot = self.handle.snapshot().await?;
        drop(self.handle);
        self.actor
            .await
            .map_err(|e| GroundStationError::StationClosed(format!("station task failed: {}", e)))?;
        Ok(snapshot)
    }

    async fn join(link: LinkId, task: JoinHandle<LinkExit>) -> Option<LinkExit> {
        match task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!("{} worker failed: {}", link, e);
                None
            }
        }
    }
}

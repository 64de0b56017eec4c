//! # Serial Link Module
//!
//! Handles the byte stream of one radio link.
//!
//! This module handles:
//! - Opening the link's serial port (115200 baud, 8N1) with fixed-backoff retry
//! - Bounded reads feeding the link's frame reader
//! - Forwarding decoded frames to the station in arrival order
//! - Honouring the per-link stop signal

pub mod port_trait;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use port_trait::{LinkPort, PortOpener, SerialOpener};

use crate::config::{LinkConfig, StationConfig};
use crate::error::{GroundStationError, Result};
use crate::protocol::frame::LinkId;
use crate::protocol::reader::FrameReader;
use crate::telemetry::actor::StationHandle;
use crate::telemetry::state::LinkStatus;

/// Bytes requested per read
const READ_CHUNK_SIZE: usize = 1024;

/// Why a link worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExit {
    /// Stop signal received
    Cancelled,
    /// The port reported end of stream
    PortClosed,
    /// A read failed
    ReadError,
    /// The station actor is gone
    StationClosed,
}

/// Worker owning one link's port
pub struct LinkWorker {
    link: LinkId,
    config: LinkConfig,
    read_timeout: Duration,
    reconnect_interval: Duration,
    opener: Arc<dyn PortOpener>,
    station: StationHandle,
}

impl std::fmt::Debug for LinkWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkWorker")
            .field("link", &self.link)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

impl LinkWorker {
    /// Create a worker for one link
    ///
    /// # Arguments
    ///
    /// * `link` - Which link this worker feeds
    /// * `config` - Port settings
    /// * `station` - Timing settings
    /// * `opener` - Port factory
    /// * `handle` - Station to submit frames to
    pub fn new(
        link: LinkId,
        config: LinkConfig,
        station: &StationConfig,
        opener: Arc<dyn PortOpener>,
        handle: StationHandle,
    ) -> Self {
        Self {
            link,
            config,
            read_timeout: station.read_timeout(),
            reconnect_interval: station.reconnect_interval(),
            opener,
            station: handle,
        }
    }

    /// Run until stopped, the stream ends or the station shuts down
    ///
    /// The link's status is `Disconnected` once this returns.
    pub async fn run(self, cancel: CancellationToken) -> LinkExit {
        let exit = match self.session(&cancel).await {
            Ok(exit) => exit,
            Err(e) => {
                debug!("{}: {}", self.link, e);
                LinkExit::StationClosed
            }
        };

        if let Err(e) = self.station.set_link_status(self.link, LinkStatus::Disconnected).await {
            debug!("{}: could not report disconnect: {}", self.link, e);
        }
        info!("{} worker stopped: {:?}", self.link, exit);
        exit
    }

    async fn session(&self, cancel: &CancellationToken) -> Result<LinkExit> {
        let port = match self.open_with_retry(cancel).await? {
            Some(port) => port,
            None => return Ok(LinkExit::Cancelled),
        };

        self.station.set_link_status(self.link, LinkStatus::Connected).await?;
        info!("{} connected to {}", self.link, self.config.port);
        self.station.log(format!("✓ Connected to {}", self.config.port)).await?;

        self.read_loop(port, cancel).await
    }

    /// Open the port, retrying every reconnect interval
    ///
    /// # Returns
    ///
    /// * `Result<Option<Box<dyn LinkPort>>>` - The open port, or `None` if
    ///   stopped before an attempt succeeded
    async fn open_with_retry(&self, cancel: &CancellationToken) -> Result<Option<Box<dyn LinkPort>>> {
        self.station.set_link_status(self.link, LinkStatus::Connecting).await?;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            match self.opener.open(&self.config) {
                Ok(port) => return Ok(Some(port)),
                Err(e) => {
                    warn!("{}: failed to open {}: {}", self.link, self.config.port, e);
                    self.station
                        .log(format!("✗ Failed to open {}: {}", self.config.port, e))
                        .await?;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }
    }

    async fn read_loop(&self, mut port: Box<dyn LinkPort>, cancel: &CancellationToken) -> Result<LinkExit> {
        let mut reader = FrameReader::new(self.link);
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.report_discarded(&mut reader).await?;
                    self.station.log("Connection closed by user").await?;
                    return Ok(LinkExit::Cancelled);
                }
                result = tokio::time::timeout(self.read_timeout, port.read(&mut buf)) => match result {
                    // Idle line
                    Err(_) => continue,
                    Ok(Ok(0)) => {
                        error!("{}: {} closed", self.link, self.config.port);
                        self.report_discarded(&mut reader).await?;
                        self.station
                            .log(format!("Connection lost: {} closed", self.config.port))
                            .await?;
                        return Ok(LinkExit::PortClosed);
                    }
                    Ok(Ok(n)) => {
                        for frame in reader.feed(&buf[..n]) {
                            self.station.submit_frame(frame).await?;
                        }
                    }
                    Ok(Err(e)) => {
                        error!("{}: read error on {}: {}", self.link, self.config.port, e);
                        self.report_discarded(&mut reader).await?;
                        self.station
                            .log(format!("Connection lost: {}", GroundStationError::Io(e)))
                            .await?;
                        return Ok(LinkExit::ReadError);
                    }
                }
            }
        }
    }

    /// Drop whatever the reader holds of an unfinished frame
    async fn report_discarded(&self, reader: &mut FrameReader) -> Result<()> {
        let discarded = reader.reset();
        if discarded > 0 {
            warn!("{}: discarded {} partially received bytes", self.link, discarded);
            self.station
                .log(format!("Discarded {} partially received bytes ({})", discarded, self.link))
                .await?;
        }
        Ok(())
    }
}

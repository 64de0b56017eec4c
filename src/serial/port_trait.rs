//! Trait abstraction for link ports to enable testing

use tokio::io::AsyncRead;
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::debug;

use crate::config::LinkConfig;
use crate::error::{GroundStationError, Result};

/// Byte source for one link
///
/// Implemented for every async reader, so serial streams, in-memory duplex
/// pipes and `tokio_test` mocks all qualify.
pub trait LinkPort: AsyncRead + Unpin + Send {}

impl<T: AsyncRead + Unpin + Send> LinkPort for T {}

/// Opens the byte source for a link
pub trait PortOpener: Send + Sync {
    /// Open the port described by `link`
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be opened; callers retry
    fn open(&self, link: &LinkConfig) -> Result<Box<dyn LinkPort>>;
}

/// Opens real serial ports with 8N1 framing and no flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn open(&self, link: &LinkConfig) -> Result<Box<dyn LinkPort>> {
        let port = tokio_serial::new(&link.port, link.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| GroundStationError::Serial(format!("Failed to open {}: {}", link.port, e)))?;

        // Stale bytes would desynchronize the framing
        if let Err(e) = port.clear(tokio_serial::ClearBuffer::Input) {
            debug!("Could not clear input buffer of {}: {}", link.port, e);
        }

        Ok(Box::new(port))
    }
}

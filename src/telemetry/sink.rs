//! # Station Sinks
//!
//! Collaborator callbacks the station invokes as state changes: persisting
//! flushed images, appending log lines and recording history updates.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::history::{HistoryUpdate, LogEntry};
use super::reassembly::CompletedImage;
use crate::config::OutputConfig;
use crate::error::{GroundStationError, Result};

/// Output side of the station
///
/// Implementations must not block for long: they run on the station actor.
#[cfg_attr(test, mockall::automock)]
pub trait StationSink: Send {
    /// Persist a flushed image
    fn persist_image(&mut self, image: &CompletedImage) -> Result<()>;

    /// Append one timestamped log line
    fn append_log(&mut self, entry: &LogEntry) -> Result<()>;

    /// Record a change to the RSSI or position history
    fn update_history(&mut self, update: &HistoryUpdate) -> Result<()>;
}

/// Sink writing images and logs to the filesystem
///
/// Images are written as `frame_<sequence>.<extension>` in the image directory.
/// Log lines and history updates (JSON Lines) are appended to their files when
/// configured.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    image_dir: PathBuf,
    image_extension: String,
    log_file: Option<PathBuf>,
    history_file: Option<PathBuf>,
}

impl DirectorySink {
    /// Create a sink that only writes images
    pub fn new(image_dir: impl Into<PathBuf>, image_extension: impl Into<String>) -> Self {
        Self {
            image_dir: image_dir.into(),
            image_extension: image_extension.into(),
            log_file: None,
            history_file: None,
        }
    }

    /// Also append log lines to this file
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// Also append history updates as JSON Lines to this file
    pub fn with_history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = Some(path.into());
        self
    }

    /// Build a sink from the `[output]` configuration section
    ///
    /// Empty `log_file` / `history_file` settings disable those outputs.
    pub fn from_config(config: &OutputConfig) -> Self {
        let mut sink = Self::new(&config.image_dir, &config.image_extension);
        if !config.log_file.is_empty() {
            sink = sink.with_log_file(&config.log_file);
        }
        if !config.history_file.is_empty() {
            sink = sink.with_history_file(&config.history_file);
        }
        sink
    }

    /// Path an image with this sequence number is written to
    pub fn image_path(&self, sequence: u64) -> PathBuf {
        self.image_dir
            .join(format!("frame_{}.{}", sequence, self.image_extension))
    }

    fn append_line(path: &Path, line: &str) -> Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

impl StationSink for DirectorySink {
    fn persist_image(&mut self, image: &CompletedImage) -> Result<()> {
        fs::create_dir_all(&self.image_dir)?;
        let path = self.image_path(image.sequence);
        fs::write(&path, &image.data).map_err(|e| {
            GroundStationError::Sink(format!("Failed to write {}: {}", path.display(), e))
        })
    }

    fn append_log(&mut self, entry: &LogEntry) -> Result<()> {
        match &self.log_file {
            Some(path) => Self::append_line(path, &entry.to_string()),
            None => Ok(()),
        }
    }

    fn update_history(&mut self, update: &HistoryUpdate) -> Result<()> {
        match &self.history_file {
            Some(path) => Self::append_line(path, &serde_json::to_string(update)?),
            None => Ok(()),
        }
    }
}

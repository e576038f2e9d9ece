//! Resolved run parameters and application settings.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{HourSlot, WarehouseKind};

use super::{DEFAULT_CHUNK_ROWS, DEFAULT_MAX_ERRORS};

/// What the pipeline does when a cleaned chunk cannot be written locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageFailurePolicy {
    /// End the run with a fatal error.
    #[default]
    Abort,
    /// Log, count the failure in the run summary and move on.
    Skip,
}

/// The day and hours to ingest, and where to send them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub date: NaiveDate,
    pub hours: BTreeSet<u32>,
    /// Base URL without a trailing slash.
    pub base_url: String,
    pub warehouse: WarehouseKind,
}

impl RunConfig {
    /// Hour slots in ascending order.
    pub fn slots(&self) -> impl Iterator<Item = HourSlot> + '_ {
        self.hours.iter().map(|&h| HourSlot::new(self.date, h))
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory for staged chunk files.
    pub staging_dir: PathBuf,
    /// Directory for query CSV exports.
    pub output_dir: PathBuf,
    /// Directory holding the credential documents.
    pub credentials_dir: PathBuf,
    /// Rows read per chunk.
    pub chunk_rows: usize,
    /// Rejected rows tolerated per bulk load.
    pub max_errors: u64,
    /// HTTP connect/read timeout in seconds.
    pub request_timeout: u64,
    /// Warehouse connect and statement timeout in seconds.
    pub statement_timeout: u64,
    pub stage_failure: StageFailurePolicy,
    /// Leave staged files on disk after a successful load.
    pub keep_staged: bool,
    /// Disable TLS for Redshift connections.
    pub no_tls: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_base_dir(Path::new("."))
    }
}

impl Settings {
    /// Default layout rooted at `base_dir`: `intermediate/` and `output/`.
    pub fn with_base_dir(base_dir: &Path) -> Self {
        Self {
            staging_dir: base_dir.join("intermediate"),
            output_dir: base_dir.join("output"),
            credentials_dir: base_dir.to_path_buf(),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            max_errors: DEFAULT_MAX_ERRORS,
            request_timeout: 60,
            statement_timeout: 1800,
            stage_failure: StageFailurePolicy::default(),
            keep_staged: true,
            no_tls: false,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout)
    }

    /// Ensure staging and output directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (label, dir) in [("staging", &self.staging_dir), ("output", &self.output_dir)] {
            std::fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", label, dir.display(), e),
                )
            })?;
        }
        Ok(())
    }
}

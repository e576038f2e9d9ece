//! The ETL pipeline: fetch → clean → stage → upload → load, one hour at a time.
//!
//! Only a [`StageWriteError`] under the `abort` policy ends a run early. Every
//! other stage failure is logged, counted in the [`RunSummary`] and the run
//! moves on to the next unit of work.

pub mod clean;
pub mod fetch;
pub mod stage;
pub mod upload;

use std::fmt;
use std::sync::Arc;

use object_store::ObjectStore;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ResolvedConfig, RunConfig, Settings, StageFailurePolicy};
use crate::error::{ConfigError, PipelineError, StageWriteError};
use crate::models::{CleanRecord, HourSlot};
use crate::utils::redact::redact_url_password;
use crate::utils::{format_count, format_size};
use crate::warehouse::Warehouse;

pub use clean::clean_chunk;
pub use fetch::{dump_url, ChunkReader, SourceFetcher};
pub use stage::{StageWriter, StagedFile};
pub use upload::{UploadedObject, Uploader};

/// Progress events emitted while a run is in flight.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Download of an hour started
    HourStarted { slot: HourSlot, url: String },
    /// A cleaned chunk was written to the staging directory
    ChunkStaged { slot: HourSlot, rows: usize, key: String },
    /// An uploaded object was committed to the warehouse
    Loaded { key: String, rows: Option<u64> },
    /// Every chunk of an hour was processed
    HourFinished { slot: HourSlot },
    /// The hour could not be opened or read to the end
    HourSkipped { slot: HourSlot, error: String },
}

/// Per-stage counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub hours_fetched: usize,
    pub hours_skipped: usize,
    pub chunks_read: usize,
    pub chunks_empty: usize,
    pub chunks_dropped: usize,
    pub rows_read: u64,
    pub rows_cleaned: u64,
    pub files_staged: usize,
    pub stage_failures: usize,
    pub uploads_ok: usize,
    pub uploads_failed: usize,
    pub loads_ok: usize,
    pub loads_failed: usize,
    pub rows_loaded: u64,
    /// Rows the warehouse skipped as malformed within the MAXERROR budget
    pub rows_rejected: u64,
}

impl RunSummary {
    /// True when every unit of work reached the warehouse.
    pub fn is_clean(&self) -> bool {
        self.hours_skipped == 0
            && self.chunks_dropped == 0
            && self.stage_failures == 0
            && self.uploads_failed == 0
            && self.loads_failed == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "hours:   {} fetched, {} skipped", self.hours_fetched, self.hours_skipped)?;
        writeln!(
            f,
            "chunks:  {} read, {} empty, {} dropped",
            self.chunks_read, self.chunks_empty, self.chunks_dropped
        )?;
        writeln!(
            f,
            "rows:    {} read, {} cleaned, {} loaded, {} rejected",
            format_count(self.rows_read),
            format_count(self.rows_cleaned),
            format_count(self.rows_loaded),
            format_count(self.rows_rejected)
        )?;
        writeln!(
            f,
            "files:   {} staged, {} stage failures",
            self.files_staged, self.stage_failures
        )?;
        writeln!(f, "uploads: {} ok, {} failed", self.uploads_ok, self.uploads_failed)?;
        write!(f, "loads:   {} ok, {} failed", self.loads_ok, self.loads_failed)
    }
}

/// Drives every stage for the configured day and hours.
pub struct Pipeline {
    run: RunConfig,
    settings: Settings,
    fetcher: SourceFetcher,
    writer: StageWriter,
    uploader: Uploader,
    warehouse: Arc<dyn Warehouse>,
    events: Option<mpsc::Sender<PipelineEvent>>,
}

impl Pipeline {
    pub fn new(
        resolved: &ResolvedConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Result<Self, PipelineError> {
        let fetcher = SourceFetcher::new(&resolved.settings)
            .map_err(|e| ConfigError::Invalid(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            run: resolved.run.clone(),
            settings: resolved.settings.clone(),
            fetcher,
            writer: StageWriter::new(&resolved.settings.staging_dir),
            uploader: Uploader::new(store, resolved.object_store.bucket.clone()),
            warehouse,
            events: None,
        })
    }

    /// Send progress events to `tx` while running.
    pub fn with_events(mut self, tx: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }

    /// Process every configured hour in ascending order.
    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::default();
        for slot in self.run.slots() {
            self.run_hour(slot, &mut summary).await?;
        }
        info!(
            "Run finished: {} hours fetched, {} skipped, {} rows loaded",
            summary.hours_fetched,
            summary.hours_skipped,
            format_count(summary.rows_loaded)
        );
        Ok(summary)
    }

    async fn run_hour(&self, slot: HourSlot, summary: &mut RunSummary) -> Result<(), PipelineError> {
        let url = dump_url(&self.run.base_url, &slot);
        let shown = redact_url_password(&url);
        info!("Downloading {}", shown);
        self.emit(PipelineEvent::HourStarted { slot, url: shown }).await;

        let mut reader = match self.fetcher.open(&url).await {
            Ok(reader) => reader,
            Err(e) => {
                error!("{}", e);
                summary.hours_skipped += 1;
                self.emit(PipelineEvent::HourSkipped {
                    slot,
                    error: e.to_string(),
                })
                .await;
                return Ok(());
            }
        };

        let timestamp = slot.timestamp();
        loop {
            let chunk = match reader.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    error!("{}; skipping the rest of {}", e, slot);
                    summary.hours_skipped += 1;
                    self.emit(PipelineEvent::HourSkipped {
                        slot,
                        error: e.to_string(),
                    })
                    .await;
                    return Ok(());
                }
            };
            summary.chunks_read += 1;
            summary.rows_read += chunk.len() as u64;

            let batch = match clean_chunk(&chunk, &timestamp) {
                Ok(Some(batch)) => batch,
                Ok(None) => {
                    debug!("Chunk {} of {} is empty after cleaning", summary.chunks_read, slot);
                    summary.chunks_empty += 1;
                    continue;
                }
                Err(e) => {
                    error!("Dropping chunk of {}: {}", slot, e);
                    summary.chunks_dropped += 1;
                    continue;
                }
            };
            summary.rows_cleaned += batch.len() as u64;

            self.process_batch(slot, &batch, summary).await?;
        }

        summary.hours_fetched += 1;
        self.emit(PipelineEvent::HourFinished { slot }).await;
        Ok(())
    }

    /// Stage, upload and load one cleaned batch.
    async fn process_batch(
        &self,
        slot: HourSlot,
        batch: &[CleanRecord],
        summary: &mut RunSummary,
    ) -> Result<(), StageWriteError> {
        let staged = match self.writer.write(batch) {
            Ok(staged) => staged,
            Err(e) => {
                error!("{}", e);
                summary.stage_failures += 1;
                return match self.settings.stage_failure {
                    StageFailurePolicy::Abort => Err(e),
                    StageFailurePolicy::Skip => Ok(()),
                };
            }
        };
        summary.files_staged += 1;
        info!(
            "Staged {} rows ({}) to {}",
            format_count(staged.rows as u64),
            format_size(staged.bytes),
            staged.path.display()
        );
        self.emit(PipelineEvent::ChunkStaged {
            slot,
            rows: staged.rows,
            key: staged.key().unwrap_or_default().to_string(),
        })
        .await;

        let object = match self.uploader.upload(&staged).await {
            Ok(object) => object,
            Err(e) => {
                error!("{}", e);
                summary.uploads_failed += 1;
                return Ok(());
            }
        };
        summary.uploads_ok += 1;
        info!("Uploaded {}", object.uri());

        match self.warehouse.bulk_load(&object).await {
            Ok(report) => {
                summary.loads_ok += 1;
                summary.rows_loaded += report.rows_loaded.unwrap_or(0);
                info!("Loaded {} into {}", object.uri(), self.warehouse.kind());
                if let Some(rejected) = report.rows_rejected.filter(|&n| n > 0) {
                    summary.rows_rejected += rejected;
                    warn!(
                        "{} rows of {} were rejected as malformed and not loaded",
                        format_count(rejected),
                        object.uri()
                    );
                }
                self.emit(PipelineEvent::Loaded {
                    key: object.key.clone(),
                    rows: report.rows_loaded,
                })
                .await;

                if !self.settings.keep_staged {
                    if let Err(e) = tokio::fs::remove_file(&staged.path).await {
                        warn!("Failed to remove {}: {}", staged.path.display(), e);
                    }
                }
            }
            Err(e) => {
                error!("{}", e);
                summary.loads_failed += 1;
            }
        }
        Ok(())
    }
}

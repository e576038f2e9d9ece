//! Stage writer: serializes cleaned batches to pipe-delimited files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Local;

use crate::error::StageWriteError;
use crate::models::CleanRecord;

/// Field delimiter for staged files and query exports.
pub const DELIMITER: u8 = b'|';

/// A staged chunk on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

impl StagedFile {
    /// Object key: the file's basename.
    pub fn key(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// Writes staged files into one directory with collision-free names.
#[derive(Debug)]
pub struct StageWriter {
    dir: PathBuf,
    seq: AtomicU64,
}

impl StageWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seq: AtomicU64::new(0),
        }
    }

    /// Next file name: microsecond timestamp, per-run sequence and a random suffix.
    fn next_name(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "wiki_{}_{:06}_{}.csv",
            Local::now().format("%Y%m%d-%H%M%S%.6f"),
            seq,
            &suffix[..8]
        )
    }

    /// Write `batch` with a header row and no index column.
    pub fn write(&self, batch: &[CleanRecord]) -> Result<StagedFile, StageWriteError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| StageWriteError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(self.next_name());
        let write_err = |source| StageWriteError::Write {
            path: path.clone(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .from_path(&path)
            .map_err(write_err)?;
        for record in batch {
            writer.serialize(record).map_err(write_err)?;
        }
        writer.flush().map_err(|source| StageWriteError::Flush {
            path: path.clone(),
            source,
        })?;
        drop(writer);

        let bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        tracing::debug!("Staged {} rows to {}", batch.len(), path.display());
        Ok(StagedFile {
            path,
            rows: batch.len(),
            bytes,
        })
    }
}

/// Read a staged file back into records.
pub fn read_staged(path: &Path) -> Result<Vec<CleanRecord>, csv::Error> {
    csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .from_path(path)?
        .deserialize()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page: &str, views: i32, lang: &str) -> CleanRecord {
        CleanRecord {
            page_name: page.to_string(),
            view_count: views,
            timestamp_hour: "2012-01-21 04:00".to_string(),
            language_code: lang.to_string(),
        }
    }

    #[test]
    fn header_and_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StageWriter::new(dir.path());
        let staged = writer.write(&[record("Bar", 10, "en")]).unwrap();

        let text = std::fs::read_to_string(&staged.path).unwrap();
        assert_eq!(text, "page_name|num_views|time|language\nBar|10|2012-01-21 04:00|en\n");
        assert_eq!(staged.rows, 1);
        assert_eq!(staged.bytes, text.len() as u64);
    }

    #[test]
    fn reparsing_reproduces_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StageWriter::new(dir.path());
        let batch = vec![
            record("Bar", 10, "en"),
            record("Pipe|In|Name", 3, "de"),
            record("Quote\"d", 7, "fr"),
            record("Ünïcödé", 1, "commons"),
        ];
        let staged = writer.write(&batch).unwrap();
        assert_eq!(read_staged(&staged.path).unwrap(), batch);
    }

    #[test]
    fn names_are_unique_within_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let writer = StageWriter::new(dir.path());
        let names: std::collections::HashSet<String> = (0..50)
            .map(|_| {
                writer
                    .write(&[record("A", 1, "en")])
                    .unwrap()
                    .key()
                    .unwrap()
                    .to_string()
            })
            .collect();
        assert_eq!(names.len(), 50);
    }

    #[test]
    fn unwritable_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let writer = StageWriter::new(blocker.join("staging"));
        assert!(matches!(
            writer.write(&[record("A", 1, "en")]),
            Err(StageWriteError::CreateDir { .. })
        ));
    }
}

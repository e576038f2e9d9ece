//! Query service: the three aggregate reads and their CSV exports.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::error::QueryError;
use crate::models::Selection;
use crate::pipeline::stage::DELIMITER;
use crate::warehouse::Warehouse;

pub const TOP_N_FILE: &str = "top_n_pages_by_language.csv";
pub const BY_LANGUAGE_FILE: &str = "total_pages_by_language.csv";
pub const BY_DATE_FILE: &str = "total_pages_by_date.csv";

/// Runs read queries against a warehouse and exports the results.
pub struct QueryService {
    warehouse: Arc<dyn Warehouse>,
    output_dir: PathBuf,
}

impl QueryService {
    pub fn new(warehouse: Arc<dyn Warehouse>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            warehouse,
            output_dir: output_dir.into(),
        }
    }

    /// Top `n` pages per language by summed views, densely ranked.
    pub async fn top_n(&self, n: u32, language: &Selection<String>) -> Result<PathBuf, QueryError> {
        let rows = self
            .warehouse
            .top_n(n, language)
            .await
            .inspect_err(|e| error!("top_n({}, {:?}) failed: {}", n, language, e))?;
        self.export(TOP_N_FILE, &rows)
    }

    pub async fn total_by_language(&self, language: &Selection<String>) -> Result<PathBuf, QueryError> {
        let rows = self
            .warehouse
            .total_by_language(language)
            .await
            .inspect_err(|e| error!("total_by_language({:?}) failed: {}", language, e))?;
        self.export(BY_LANGUAGE_FILE, &rows)
    }

    pub async fn total_by_date(&self, date: &Selection<NaiveDate>) -> Result<PathBuf, QueryError> {
        let rows = self
            .warehouse
            .total_by_date(date)
            .await
            .inspect_err(|e| error!("total_by_date({:?}) failed: {}", date, e))?;
        self.export(BY_DATE_FILE, &rows)
    }

    /// Write `rows` to `file_name` in the output directory, replacing any
    /// earlier result only once the new file is complete.
    fn export<T: Serialize>(&self, file_name: &str, rows: &[T]) -> Result<PathBuf, QueryError> {
        let target = self.output_dir.join(file_name);
        let output_err = |message: String| QueryError::Output {
            path: target.clone(),
            message,
        };

        std::fs::create_dir_all(&self.output_dir).map_err(|e| output_err(e.to_string()))?;
        let tmp = NamedTempFile::new_in(&self.output_dir).map_err(|e| output_err(e.to_string()))?;

        let mut writer = csv::WriterBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .from_writer(tmp);
        for row in rows {
            writer.serialize(row).map_err(|e| output_err(e.to_string()))?;
        }
        let tmp = writer
            .into_inner()
            .map_err(|e| output_err(e.error().to_string()))?;
        tmp.persist(&target).map_err(|e| output_err(e.error.to_string()))?;

        info!("Wrote {} rows to {}", rows.len(), target.display());
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, WarehouseCredentials};
    use crate::pipeline::{StageWriter, Uploader};
    use crate::models::CleanRecord;
    use crate::warehouse::SqliteWarehouse;
    use object_store::memory::InMemory;
    use object_store::ObjectStore;
    use std::path::Path;

    fn record(page: &str, views: i32, time: &str, lang: &str) -> CleanRecord {
        CleanRecord {
            page_name: page.to_string(),
            view_count: views,
            timestamp_hour: time.to_string(),
            language_code: lang.to_string(),
        }
    }

    async fn service(dir: &Path, records: &[CleanRecord]) -> QueryService {
        let settings = Settings::with_base_dir(dir);
        let creds = WarehouseCredentials {
            host: String::new(),
            port: 0,
            database: dir.join("wiki.db").to_string_lossy().into_owned(),
            user: String::new(),
            password: String::new(),
            schema: "main".to_string(),
            table: "wikidumps".to_string(),
        };
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let warehouse = Arc::new(SqliteWarehouse::new(&creds, store.clone(), &settings));

        let staged = StageWriter::new(&settings.staging_dir).write(records).unwrap();
        let object = Uploader::new(store, "dumps").upload(&staged).await.unwrap();
        warehouse.bulk_load(&object).await.unwrap();

        QueryService::new(warehouse, settings.output_dir)
    }

    #[tokio::test]
    async fn date_export_has_header_and_exact_rows() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            &[
                record("Bar", 10, "2012-01-21 04:00", "en"),
                record("Baz", 3, "2012-01-22 01:00", "en"),
            ],
        )
        .await;

        let day = NaiveDate::from_ymd_opt(2012, 1, 21).unwrap();
        let path = svc.total_by_date(&Selection::Only(day)).await.unwrap();
        assert_eq!(path.file_name().unwrap(), BY_DATE_FILE);
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "date|total_views\n2012-01-21|10\n"
        );
    }

    #[tokio::test]
    async fn exports_overwrite_previous_results() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            dir.path(),
            &[
                record("A", 5, "2012-01-21 04:00", "en"),
                record("B", 7, "2012-01-21 04:00", "de"),
            ],
        )
        .await;

        let path = svc.total_by_language(&Selection::All).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "language|total_views\nde|7\nen|5\n"
        );

        svc.total_by_language(&Selection::Only("en".to_string()))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "language|total_views\nen|5\n"
        );
    }

    #[tokio::test]
    async fn top_n_export_columns() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), &[record("A|B", 5, "2012-01-21 04:00", "en")]).await;

        let path = svc.top_n(3, &Selection::All).await.unwrap();
        assert_eq!(path.file_name().unwrap(), TOP_N_FILE);
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("language|page_name|number_of_views|rank_num"));
        assert_eq!(lines.next(), Some("en|\"A|B\"|5|1"));
    }

    #[tokio::test]
    async fn failed_query_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::with_base_dir(dir.path());
        let creds = WarehouseCredentials {
            host: String::new(),
            port: 0,
            database: dir.path().join("missing").join("wiki.db").to_string_lossy().into_owned(),
            user: String::new(),
            password: String::new(),
            schema: "main".to_string(),
            table: "wikidumps".to_string(),
        };
        let warehouse = Arc::new(SqliteWarehouse::new(&creds, Arc::new(InMemory::new()), &settings));
        let svc = QueryService::new(warehouse, &settings.output_dir);

        assert!(matches!(
            svc.total_by_language(&Selection::All).await,
            Err(QueryError::Connect(_))
        ));
        assert!(!settings.output_dir.join(BY_LANGUAGE_FILE).exists());
    }
}

//! SQLite warehouse backend.
//!
//! Mirrors the Redshift load contract on a local database file: the object is
//! read back from the bucket, the header line is skipped, rows are parsed as
//! `|`-delimited with quotes removed, invalid UTF-8 becomes `^`, and the whole
//! load rolls back once rejected rows exceed MAXERROR.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use object_store::ObjectStore;
use rusqlite::{params, Connection, TransactionBehavior};

use crate::config::{Settings, WarehouseCredentials};
use crate::error::{LoadError, QueryError};
use crate::models::{DateTotal, LanguageTotal, Selection, TopPage, WarehouseKind};
use crate::pipeline::stage::DELIMITER;
use crate::pipeline::UploadedObject;

use super::sql::{self, Dialect};
use super::{LoadReport, Warehouse};

/// SQLite warehouse backed by a database file.
pub struct SqliteWarehouse {
    path: PathBuf,
    table: String,
    store: Arc<dyn ObjectStore>,
    max_errors: u64,
    timeout: Duration,
}

/// A row parsed from a staged object.
struct LoadRow {
    page_name: String,
    num_views: i32,
    time: String,
    language: String,
}

impl SqliteWarehouse {
    /// The table lives in SQLite's `main` schema; the configured schema name
    /// only applies to Redshift.
    pub fn new(
        creds: &WarehouseCredentials,
        store: Arc<dyn ObjectStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            path: PathBuf::from(&creds.database),
            table: format!("main.{}", creds.table),
            store,
            max_errors: settings.max_errors,
            timeout: settings.statement_timeout(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Open a fresh connection and make sure the target table exists.
    fn connect(path: &Path, table: &str, timeout: Duration) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(timeout)?;
        conn.execute_batch(&format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                page_name TEXT NOT NULL,
                num_views INTEGER NOT NULL,
                "time" TEXT NOT NULL,
                language TEXT NOT NULL
            )"#,
            table
        ))?;
        Ok(conn)
    }

    /// Run a blocking closure against a fresh connection, bounded by the
    /// statement timeout. The connection is dropped when the closure returns.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, QueryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let table = self.table.clone();
        let timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || {
            let conn = Self::connect(&path, &table, timeout)
                .map_err(|e| QueryError::Connect(e.to_string()))?;
            f(&conn).map_err(|e| QueryError::Statement(e.to_string()))
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(QueryError::Statement(join.to_string())),
            Err(_) => Err(QueryError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Decode a field, replacing invalid UTF-8 with `^`.
fn accept_invchars(field: &[u8]) -> String {
    match std::str::from_utf8(field) {
        Ok(s) => s.to_string(),
        Err(_) => String::from_utf8_lossy(field).replace('\u{FFFD}', "^"),
    }
}

fn parse_row(record: &csv::ByteRecord) -> Option<LoadRow> {
    if record.len() != 4 {
        return None;
    }
    let num_views = accept_invchars(&record[1]).trim().parse::<i32>().ok()?;
    Some(LoadRow {
        page_name: accept_invchars(&record[0]),
        num_views,
        time: accept_invchars(&record[2]),
        language: accept_invchars(&record[3]),
    })
}

/// Insert every well-formed row of `body` inside one immediate transaction.
///
/// The transaction only commits before `deadline`; past it the load rolls
/// back and reports a timeout, so a timed-out load never leaves rows behind.
fn load_body(
    conn: &mut Connection,
    table: &str,
    key: &str,
    body: &[u8],
    max_errors: u64,
    deadline: Instant,
    timeout: Duration,
) -> Result<LoadReport, LoadError> {
    let stmt_err = |e: rusqlite::Error| LoadError::Statement {
        key: key.to_string(),
        message: e.to_string(),
    };
    let timed_out = || LoadError::Timeout {
        key: key.to_string(),
        seconds: timeout.as_secs(),
    };

    // IMMEDIATE takes the database write lock up front, serializing loaders.
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(stmt_err)?;

    let mut loaded = 0u64;
    let mut rejected = 0u64;
    {
        let mut insert = tx
            .prepare(&format!(
                r#"INSERT INTO {} (page_name, num_views, "time", language) VALUES (?1, ?2, ?3, ?4)"#,
                table
            ))
            .map_err(stmt_err)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .flexible(true)
            .from_reader(body);

        for record in reader.byte_records() {
            if Instant::now() >= deadline {
                break;
            }
            match record.ok().as_ref().and_then(parse_row) {
                Some(row) => {
                    insert
                        .execute(params![row.page_name, row.num_views, row.time, row.language])
                        .map_err(stmt_err)?;
                    loaded += 1;
                }
                None => rejected += 1,
            }
        }
    }

    if Instant::now() >= deadline {
        tx.rollback().map_err(stmt_err)?;
        return Err(timed_out());
    }

    if rejected > max_errors {
        tx.rollback().map_err(stmt_err)?;
        return Err(LoadError::TooManyErrors {
            key: key.to_string(),
            rejected,
            max_errors,
        });
    }

    tx.commit().map_err(stmt_err)?;
    Ok(LoadReport {
        rows_loaded: Some(loaded),
        rows_rejected: Some(rejected),
    })
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Sqlite
    }

    async fn bulk_load(&self, object: &UploadedObject) -> Result<LoadReport, LoadError> {
        let object_err = |source| LoadError::Object {
            key: object.key.clone(),
            source,
        };
        let body = self
            .store
            .get(&object.location())
            .await
            .map_err(object_err)?
            .bytes()
            .await
            .map_err(object_err)?;

        let path = self.path.clone();
        let table = self.table.clone();
        let key = object.key.clone();
        let max_errors = self.max_errors;
        let timeout = self.timeout;
        // A timeout must roll back, so the deadline is checked inside the transaction.
        let task = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            let mut conn =
                Self::connect(&path, &table, timeout).map_err(|e| LoadError::Connect(e.to_string()))?;
            load_body(&mut conn, &table, &key, &body, max_errors, deadline, timeout)
        });

        task.await.unwrap_or_else(|join| {
            Err(LoadError::Statement {
                key: object.key.clone(),
                message: join.to_string(),
            })
        })
    }

    async fn top_n(
        &self,
        n: u32,
        language: &Selection<String>,
    ) -> Result<Vec<TopPage>, QueryError> {
        let language = language.as_option().cloned();
        let sql = sql::top_n(&self.table, Dialect::Sqlite, language.is_some());
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<TopPage> {
                Ok(TopPage {
                    language: row.get(0)?,
                    page_name: row.get(1)?,
                    number_of_views: row.get(2)?,
                    rank_num: row.get(3)?,
                })
            };
            let rows = match language {
                Some(lang) => stmt.query_map(params![lang, n], map)?,
                None => stmt.query_map(params![n], map)?,
            };
            rows.collect()
        })
        .await
    }

    async fn total_by_language(
        &self,
        language: &Selection<String>,
    ) -> Result<Vec<LanguageTotal>, QueryError> {
        let language = language.as_option().cloned();
        let sql = sql::total_by_language(&self.table, Dialect::Sqlite, language.is_some());
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<LanguageTotal> {
                Ok(LanguageTotal {
                    language: row.get(0)?,
                    total_views: row.get(1)?,
                })
            };
            let rows = match language {
                Some(lang) => stmt.query_map(params![lang], map)?,
                None => stmt.query_map([], map)?,
            };
            rows.collect()
        })
        .await
    }

    async fn total_by_date(
        &self,
        date: &Selection<NaiveDate>,
    ) -> Result<Vec<DateTotal>, QueryError> {
        let date = date.as_option().map(|d| d.format("%Y-%m-%d").to_string());
        let sql = sql::total_by_date(&self.table, Dialect::Sqlite, date.is_some());
        self.with_connection(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let map = |row: &rusqlite::Row<'_>| -> rusqlite::Result<DateTotal> {
                Ok(DateTotal {
                    date: row.get(0)?,
                    total_views: row.get(1)?,
                })
            };
            let rows = match date {
                Some(day) => stmt.query_map(params![day], map)?,
                None => stmt.query_map([], map)?,
            };
            rows.collect()
        })
        .await
    }
}

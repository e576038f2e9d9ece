//! Amazon Redshift backend over the PostgreSQL wire protocol.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_postgres::types::ToSql;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Row};

use crate::config::{ObjectStoreCredentials, Settings, WarehouseCredentials};
use crate::error::{LoadError, QueryError};
use crate::models::{DateTotal, LanguageTotal, Selection, TopPage, WarehouseKind};
use crate::pipeline::UploadedObject;
use crate::utils::redact::redact_secrets;

use super::pg_tls::{connect_raw, error_message};
use super::sql::{self, set_statement_timeout, CopyStatement, Dialect, RESET_TRANSACTION};
use super::{LoadReport, Warehouse};

pub struct RedshiftWarehouse {
    creds: WarehouseCredentials,
    object_store: ObjectStoreCredentials,
    max_errors: u64,
    timeout: Duration,
    no_tls: bool,
}

impl RedshiftWarehouse {
    pub fn new(
        creds: WarehouseCredentials,
        object_store: ObjectStoreCredentials,
        settings: &Settings,
    ) -> Self {
        Self {
            creds,
            object_store,
            max_errors: settings.max_errors,
            timeout: settings.statement_timeout(),
            no_tls: settings.no_tls,
        }
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.creds.host)
            .port(self.creds.port)
            .dbname(&self.creds.database)
            .user(&self.creds.user)
            .password(&self.creds.password)
            .connect_timeout(self.timeout);
        config
    }

    /// Messages from the driver may echo statement text; strip anything secret.
    fn scrub(&self, message: String) -> String {
        redact_secrets(
            &message,
            &[
                self.creds.password.as_str(),
                self.object_store.access_key.as_str(),
                self.object_store.secret_key.as_str(),
            ],
        )
    }

    async fn connect(&self) -> Result<Client, String> {
        connect_raw(&self.pg_config(), self.no_tls)
            .await
            .map_err(|e| self.scrub(error_message(&e)))
    }

    fn copy_statement(&self, object: &UploadedObject) -> CopyStatement {
        CopyStatement {
            table: self.creds.qualified_table(),
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            access_key: self.object_store.access_key.clone(),
            secret_key: self.object_store.secret_key.clone(),
            max_errors: self.max_errors,
        }
    }

    /// Statement batch for one load: the session timeout, then the locked COPY.
    fn load_batch(&self, statement: &CopyStatement) -> String {
        format!("{} {}", set_statement_timeout(self.timeout), statement.render())
    }

    /// Run the COPY batch. The bound is enforced by the server, which rolls
    /// the transaction back on cancellation, so a timeout never commits.
    async fn load(&self, statement: &CopyStatement, key: &str) -> Result<LoadReport, LoadError> {
        let client = self.connect().await.map_err(LoadError::Connect)?;
        let stmt_err = |e: tokio_postgres::Error| {
            if e.code() == Some(&SqlState::QUERY_CANCELED) {
                LoadError::Timeout {
                    key: key.to_string(),
                    seconds: self.timeout.as_secs(),
                }
            } else {
                LoadError::Statement {
                    key: key.to_string(),
                    message: self.scrub(error_message(&e)),
                }
            }
        };

        client
            .batch_execute(&self.load_batch(statement))
            .await
            .map_err(stmt_err)?;

        let rows_loaded = match client.query_one("SELECT pg_last_copy_count()", &[]).await {
            Ok(row) => row.try_get::<_, i64>(0).ok().map(|n| n.max(0) as u64),
            Err(e) => {
                tracing::debug!("pg_last_copy_count unavailable: {}", error_message(&e));
                None
            }
        };

        Ok(LoadReport {
            rows_loaded,
            rows_rejected: None,
        })
    }

    /// Run one query on a fresh connection after clearing any transaction
    /// left open by an earlier failed load.
    async fn query(&self, text: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, QueryError> {
        let work = async {
            let client = self.connect().await.map_err(QueryError::Connect)?;
            let stmt_err = |e: tokio_postgres::Error| QueryError::Statement(self.scrub(error_message(&e)));
            client
                .batch_execute(&format!("{} {}", RESET_TRANSACTION, set_statement_timeout(self.timeout)))
                .await
                .map_err(stmt_err)?;
            client.query(text, params).await.map_err(stmt_err)
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| QueryError::Timeout(self.timeout.as_secs()))?
    }
}

fn column<T>(row: &Row, idx: usize) -> Result<T, QueryError>
where
    T: for<'a> tokio_postgres::types::FromSql<'a>,
{
    row.try_get(idx)
        .map_err(|e| QueryError::Statement(error_message(&e)))
}

#[async_trait]
impl Warehouse for RedshiftWarehouse {
    fn kind(&self) -> WarehouseKind {
        WarehouseKind::Redshift
    }

    async fn bulk_load(&self, object: &UploadedObject) -> Result<LoadReport, LoadError> {
        let statement = self.copy_statement(object);
        tracing::debug!("Executing: {}", statement.redacted());
        self.load(&statement, &object.key).await
    }

    async fn top_n(
        &self,
        n: u32,
        language: &Selection<String>,
    ) -> Result<Vec<TopPage>, QueryError> {
        let text = sql::top_n(&self.creds.qualified_table(), Dialect::Postgres, language.as_option().is_some());
        let n = i64::from(n);
        let rows = match language.as_option() {
            Some(lang) => self.query(&text, &[lang, &n]).await?,
            None => self.query(&text, &[&n]).await?,
        };
        rows.iter()
            .map(|row| {
                Ok(TopPage {
                    language: column(row, 0)?,
                    page_name: column(row, 1)?,
                    number_of_views: column(row, 2)?,
                    rank_num: column(row, 3)?,
                })
            })
            .collect()
    }

    async fn total_by_language(
        &self,
        language: &Selection<String>,
    ) -> Result<Vec<LanguageTotal>, QueryError> {
        let text = sql::total_by_language(
            &self.creds.qualified_table(),
            Dialect::Postgres,
            language.as_option().is_some(),
        );
        let rows = match language.as_option() {
            Some(lang) => self.query(&text, &[lang]).await?,
            None => self.query(&text, &[]).await?,
        };
        rows.iter()
            .map(|row| {
                Ok(LanguageTotal {
                    language: column(row, 0)?,
                    total_views: column(row, 1)?,
                })
            })
            .collect()
    }

    async fn total_by_date(
        &self,
        date: &Selection<NaiveDate>,
    ) -> Result<Vec<DateTotal>, QueryError> {
        let day = date.as_option().map(|d| d.format("%Y-%m-%d").to_string());
        let text = sql::total_by_date(&self.creds.qualified_table(), Dialect::Postgres, day.is_some());
        let rows = match day {
            Some(ref day) => self.query(&text, &[day]).await?,
            None => self.query(&text, &[]).await?,
        };
        rows.iter()
            .map(|row| {
                Ok(DateTotal {
                    date: column(row, 0)?,
                    total_views: column(row, 1)?,
                })
            })
            .collect()
    }
}

//! Warehouse backends: bulk loads of uploaded objects and the aggregate queries.
//!
//! Every operation opens its own connection and drops it before returning,
//! whether the operation succeeded or failed. No connection outlives a call.

#[cfg(feature = "redshift")]
mod pg_tls;
#[cfg(feature = "redshift")]
mod redshift;
pub mod sql;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use object_store::ObjectStore;

use crate::config::ResolvedConfig;
use crate::error::{ConfigError, LoadError, QueryError};
use crate::models::{DateTotal, LanguageTotal, Selection, TopPage, WarehouseKind};
use crate::pipeline::UploadedObject;

#[cfg(feature = "redshift")]
pub use redshift::RedshiftWarehouse;
pub use sqlite::SqliteWarehouse;

/// Outcome of a committed bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows the warehouse reports as loaded, when it reports them.
    pub rows_loaded: Option<u64>,
    /// Rows rejected but tolerated under MAXERROR, when known.
    pub rows_rejected: Option<u64>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    fn kind(&self) -> WarehouseKind;

    /// Ingest one uploaded object in a single locked transaction.
    async fn bulk_load(&self, object: &UploadedObject) -> Result<LoadReport, LoadError>;

    async fn top_n(&self, n: u32, language: &Selection<String>)
        -> Result<Vec<TopPage>, QueryError>;

    async fn total_by_language(
        &self,
        language: &Selection<String>,
    ) -> Result<Vec<LanguageTotal>, QueryError>;

    async fn total_by_date(
        &self,
        date: &Selection<NaiveDate>,
    ) -> Result<Vec<DateTotal>, QueryError>;
}

/// Build the warehouse named by the run configuration.
///
/// `store` is the bucket staged files are uploaded to; backends that cannot
/// read the bucket themselves fetch objects through it.
pub fn connect(
    resolved: &ResolvedConfig,
    store: Arc<dyn ObjectStore>,
) -> Result<Arc<dyn Warehouse>, ConfigError> {
    match resolved.run.warehouse {
        #[cfg(feature = "redshift")]
        WarehouseKind::Redshift => {
            tracing::info!(
                "Using redshift database {} on {} with user {}",
                resolved.warehouse.database,
                resolved.warehouse.host,
                resolved.warehouse.user
            );
            Ok(Arc::new(RedshiftWarehouse::new(
                resolved.warehouse.clone(),
                resolved.object_store.clone(),
                &resolved.settings,
            )))
        }
        #[cfg(not(feature = "redshift"))]
        WarehouseKind::Redshift => Err(ConfigError::Invalid(
            "this build does not include the 'redshift' feature".to_string(),
        )),
        WarehouseKind::Sqlite => {
            tracing::info!("Using sqlite database {}", resolved.warehouse.database);
            Ok(Arc::new(SqliteWarehouse::new(
                &resolved.warehouse,
                store,
                &resolved.settings,
            )))
        }
    }
}

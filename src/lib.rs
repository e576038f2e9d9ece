//! wikicounts - Wikimedia pagecounts ETL and query service.
//!
//! Hourly page-view dumps are fetched, cleaned, staged as pipe-delimited
//! files, uploaded to an object store and bulk-loaded into a warehouse.
//! The query service answers top-N and total-views questions against it.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod utils;
pub mod warehouse;

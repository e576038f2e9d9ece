//! Error types for each pipeline stage.
//!
//! Only [`ConfigError`] and [`StageWriteError`] are fatal to a run; every other
//! kind is logged and contained within the stage that raised it.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration file found (use --config or set WIKICOUNTS_CONFIG)")]
    NotFound,
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("No credentials file for profile '{profile}' in {dir}")]
    MissingCredentials { profile: String, dir: PathBuf },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to read {url}: {source}")]
    Io {
        url: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed record at {url} line {line}: {reason}")]
    Parse {
        url: String,
        line: u64,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum CleanError {
    #[error("View count {value} for page '{page_name}' does not fit in a 32-bit integer")]
    ViewCountOverflow { page_name: String, value: i64 },
}

#[derive(Debug, Error)]
pub enum StageWriteError {
    #[error("Failed to create staging directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write staged file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to flush staged file {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to read staged file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Staged file path has no usable basename: {0}")]
    BadKey(PathBuf),
    #[error("Upload of {key} failed: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Could not connect to warehouse: {0}")]
    Connect(String),
    #[error("Bulk load of {key} failed: {message}")]
    Statement { key: String, message: String },
    #[error("Bulk load of {key} rejected {rejected} rows (MAXERROR {max_errors}); transaction rolled back")]
    TooManyErrors {
        key: String,
        rejected: u64,
        max_errors: u64,
    },
    #[error("Could not read {key} from object store: {source}")]
    Object {
        key: String,
        #[source]
        source: object_store::Error,
    },
    #[error("Bulk load of {key} timed out after {seconds}s")]
    Timeout { key: String, seconds: u64 },
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Could not connect to warehouse: {0}")]
    Connect(String),
    #[error("Query failed: {0}")]
    Statement(String),
    #[error("Query timed out after {0}s")]
    Timeout(u64),
    #[error("Failed to write {path}: {message}")]
    Output { path: PathBuf, message: String },
}

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    StageWrite(#[from] StageWriteError),
}

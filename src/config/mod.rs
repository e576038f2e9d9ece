//! Configuration management for wikicounts using the prefer crate.
//!
//! A run is driven by one settings document plus two credential documents
//! (object store and warehouse). Everything is resolved once into an
//! immutable [`ResolvedConfig`] that the pipeline and query service borrow.

mod credentials;
mod loader;
mod settings;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::WarehouseKind;

pub use credentials::{ObjectStoreCredentials, WarehouseCredentials};
pub use loader::{load_config, LoadOptions};
pub use settings::{RunConfig, Settings, StageFailurePolicy};

/// Rows per chunk when reading a dump.
pub const DEFAULT_CHUNK_ROWS: usize = 2_000_000;

/// Rejected rows tolerated per bulk load before the load is rolled back.
pub const DEFAULT_MAX_ERRORS: u64 = 100_000;

/// Settings file structure.
///
/// Key names follow the historical `conf.yml` layout (`load_to_DB`, `s3`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Target warehouse kind; also names the warehouse credentials document.
    #[serde(alias = "load_to_DB")]
    pub load_to_db: WarehouseKind,
    #[serde(deserialize_with = "number_or_string::one")]
    pub year: u32,
    #[serde(deserialize_with = "number_or_string::one")]
    pub month: u32,
    #[serde(deserialize_with = "number_or_string::one")]
    pub day: u32,
    #[serde(deserialize_with = "number_or_string::many")]
    pub hours: Vec<u32>,
    pub base_url: String,
    /// Object store profile; names the object store credentials document.
    pub s3: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_errors: Option<u64>,
    /// HTTP connect/read timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Upper bound on a single warehouse statement, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_failure: Option<StageFailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_staged: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_tls: Option<bool>,
    /// Path to the file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Locate the settings file using prefer's standard search locations.
    pub async fn discover() -> Result<Self, ConfigError> {
        let pref_config = prefer::load("wikicounts")
            .await
            .map_err(|_| ConfigError::NotFound)?;
        match pref_config.source_path() {
            Some(path) => Self::load_from_path(path).await,
            None => Err(ConfigError::NotFound),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports YAML, TOML and JSON based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = parse_document(path).await?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the file this was loaded from, used to resolve relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Validate and freeze the pipeline parameters.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let date = chrono::NaiveDate::from_ymd_opt(self.year as i32, self.month, self.day)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "{}-{:02}-{:02} is not a calendar date",
                    self.year, self.month, self.day
                ))
            })?;

        if self.hours.is_empty() {
            return Err(ConfigError::Invalid("hours must not be empty".to_string()));
        }
        if let Some(bad) = self.hours.iter().find(|h| **h > 23) {
            return Err(ConfigError::Invalid(format!("hour {} is out of range 0-23", bad)));
        }
        let hours: BTreeSet<u32> = self.hours.iter().copied().collect();

        let base_url = self.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".to_string()));
        }
        if base_url.contains("://") {
            url::Url::parse(&base_url)
                .map_err(|e| ConfigError::Invalid(format!("base_url '{}': {}", base_url, e)))?;
        }

        Ok(RunConfig {
            date,
            hours,
            base_url,
            warehouse: self.load_to_db,
        })
    }

    /// Build ambient settings, resolving relative paths against `base_dir`.
    pub fn settings(&self, base_dir: &Path) -> Result<Settings, ConfigError> {
        let mut settings = Settings::with_base_dir(base_dir);

        if let Some(ref dir) = self.staging_dir {
            settings.staging_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.output_dir {
            settings.output_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(ref dir) = self.credentials_dir {
            settings.credentials_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(rows) = self.chunk_rows {
            if rows == 0 {
                return Err(ConfigError::Invalid("chunk_rows must be positive".to_string()));
            }
            settings.chunk_rows = rows;
        }
        if let Some(max) = self.max_errors {
            settings.max_errors = max;
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(timeout) = self.statement_timeout {
            if timeout == 0 {
                return Err(ConfigError::Invalid(
                    "statement_timeout must be positive".to_string(),
                ));
            }
            settings.statement_timeout = timeout;
        }
        if let Some(policy) = self.stage_failure {
            settings.stage_failure = policy;
        }
        if let Some(keep) = self.keep_staged {
            settings.keep_staged = keep;
        }
        if let Some(no_tls) = self.no_tls {
            settings.no_tls = no_tls;
        }
        Ok(settings)
    }
}

/// Everything a run needs, resolved once and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub run: RunConfig,
    pub settings: Settings,
    pub object_store: ObjectStoreCredentials,
    pub warehouse: WarehouseCredentials,
}

/// Parse a YAML, TOML or JSON document chosen by file extension.
pub(crate) async fn parse_document<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<T, ConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("yml");
    let parsed = match ext {
        "toml" => toml::from_str(&contents).map_err(|e| e.to_string()),
        "json" => serde_json::from_str(&contents).map_err(|e| e.to_string()),
        _ => serde_yaml::from_str(&contents).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Numeric settings were historically written as quoted strings (`month: '01'`).
mod number_or_string {
    use serde::{de, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u32),
        Str(String),
    }

    impl NumOrStr {
        fn into_u32<E: de::Error>(self) -> Result<u32, E> {
            match self {
                Self::Num(n) => Ok(n),
                Self::Str(s) => s
                    .trim()
                    .parse()
                    .map_err(|_| E::custom(format!("expected a number, got '{}'", s))),
            }
        }
    }

    pub fn one<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        NumOrStr::deserialize(d)?.into_u32()
    }

    pub fn many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u32>, D::Error> {
        Vec::<NumOrStr>::deserialize(d)?
            .into_iter()
            .map(NumOrStr::into_u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_yaml::from_str(
            r#"
load_to_DB: redshift
year: '2012'
month: '01'
day: 21
hours: ['04', 1, 4, 23]
base_url: https://dumps.wikimedia.org/other/pagecounts-raw/
s3: s3
"#,
        )
        .unwrap()
    }

    #[test]
    fn quoted_numbers_are_accepted() {
        let config = sample();
        assert_eq!(config.year, 2012);
        assert_eq!(config.month, 1);
        assert_eq!(config.hours, vec![4, 1, 4, 23]);
        assert_eq!(config.load_to_db, WarehouseKind::Redshift);
    }

    #[test]
    fn run_config_dedupes_and_orders_hours() {
        let run = sample().run_config().unwrap();
        assert_eq!(run.hours.into_iter().collect::<Vec<_>>(), vec![1, 4, 23]);
        assert_eq!(run.base_url, "https://dumps.wikimedia.org/other/pagecounts-raw");
    }

    #[test]
    fn run_config_rejects_impossible_dates() {
        let mut config = sample();
        config.month = 2;
        config.day = 30;
        assert!(matches!(config.run_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn run_config_rejects_out_of_range_hours() {
        let mut config = sample();
        config.hours = vec![3, 24];
        assert!(config.run_config().is_err());
    }

    #[test]
    fn settings_resolve_relative_paths_against_base_dir() {
        let mut config = sample();
        config.staging_dir = Some("intermediate".to_string());
        config.max_errors = Some(10);
        config.stage_failure = Some(StageFailurePolicy::Skip);
        let settings = config.settings(Path::new("/srv/wiki")).unwrap();

        assert_eq!(settings.staging_dir, PathBuf::from("/srv/wiki/intermediate"));
        assert_eq!(settings.output_dir, PathBuf::from("/srv/wiki/output"));
        assert_eq!(settings.max_errors, 10);
        assert_eq!(settings.chunk_rows, DEFAULT_CHUNK_ROWS);
        assert_eq!(settings.stage_failure, StageFailurePolicy::Skip);
    }

    #[test]
    fn zero_chunk_rows_is_rejected() {
        let mut config = sample();
        config.chunk_rows = Some(0);
        assert!(config.settings(Path::new("/tmp")).is_err());
    }

    #[test]
    fn zero_statement_timeout_is_rejected() {
        let mut config = sample();
        config.statement_timeout = Some(0);
        assert!(matches!(
            config.settings(Path::new("/tmp")),
            Err(ConfigError::Invalid(_))
        ));
        config.statement_timeout = Some(60);
        assert_eq!(config.settings(Path::new("/tmp")).unwrap().statement_timeout, 60);
    }
}

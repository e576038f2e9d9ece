//! Configuration loading and merging logic.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::models::WarehouseKind;

use super::credentials::{load_object_store, load_warehouse};
use super::{Config, ResolvedConfig};

/// Options for loading configuration.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Directory with credential documents (overrides the config file's setting).
    pub credentials_dir: Option<PathBuf>,
}

impl LoadOptions {
    pub fn with_config(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Load the settings file from the appropriate source.
async fn load_file_config(options: &LoadOptions) -> Result<Config, ConfigError> {
    // Priority 1: explicit --config flag
    if let Some(ref path) = options.config_path {
        return Config::load_from_path(path).await;
    }

    // Priority 2: WIKICOUNTS_CONFIG environment variable
    if let Some(path) = std::env::var_os("WIKICOUNTS_CONFIG").filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        tracing::debug!("Using WIKICOUNTS_CONFIG: {}", path.display());
        return Config::load_from_path(&path).await;
    }

    // Priority 3: auto-discover via prefer
    Config::discover().await
}

/// Resolve settings, run parameters and both credential bundles.
///
/// Any failure here is a [`ConfigError`] and ends the run before any data moves.
pub async fn load_config(options: LoadOptions) -> Result<ResolvedConfig, ConfigError> {
    let config = load_file_config(&options).await?;
    if let Some(ref path) = config.source_path {
        tracing::info!("Loaded configuration from {}", path.display());
    }

    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let run = config.run_config()?;
    let mut settings = config.settings(&base_dir)?;

    if let Some(dir) = options.credentials_dir {
        settings.credentials_dir = dir;
    }

    // WIKICOUNTS_NO_TLS disables TLS for warehouse connections
    let no_tls_env = std::env::var("WIKICOUNTS_NO_TLS").unwrap_or_default();
    if no_tls_env.eq_ignore_ascii_case("1") || no_tls_env.eq_ignore_ascii_case("true") {
        settings.no_tls = true;
    }

    tracing::info!(
        "Parameter values are: date = {}, hours = {:?}, warehouse = {}",
        run.date,
        run.hours,
        run.warehouse
    );

    let mut object_store = load_object_store(&settings.credentials_dir, &config.s3).await?;
    if let Some(ref local) = object_store.local_path {
        object_store.local_path = Some(
            config.resolve_path(&local.to_string_lossy(), &settings.credentials_dir),
        );
    }
    let mut warehouse = load_warehouse(&settings.credentials_dir, run.warehouse).await?;
    if run.warehouse == WarehouseKind::Sqlite {
        warehouse.database = config
            .resolve_path(&warehouse.database, &settings.credentials_dir)
            .to_string_lossy()
            .into_owned();
    }

    Ok(ResolvedConfig {
        run,
        settings,
        object_store,
        warehouse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageFailurePolicy;

    #[tokio::test]
    async fn resolves_config_and_credentials_from_one_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("conf.yml"),
            r#"
load_to_DB: sqlite
year: 2012
month: 1
day: 21
hours: [4]
base_url: https://dumps.wikimedia.org/other/pagecounts-raw/
s3: local
stage_failure: skip
"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.yml"),
            "bucket: dumps\nlocal_path: bucket\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("sqlite.toml"),
            "database_name = \"wiki.db\"\nschema_name = \"main\"\ntable_name = \"wikidumps\"\n",
        )
        .unwrap();

        let resolved = load_config(LoadOptions::with_config(dir.path().join("conf.yml")))
            .await
            .unwrap();

        assert_eq!(resolved.run.warehouse, WarehouseKind::Sqlite);
        assert_eq!(resolved.settings.staging_dir, dir.path().join("intermediate"));
        assert_eq!(resolved.settings.stage_failure, StageFailurePolicy::Skip);
        assert_eq!(resolved.object_store.local_path, Some(dir.path().join("bucket")));
        assert_eq!(resolved.warehouse.qualified_table(), "main.wikidumps");
        assert_eq!(
            std::path::PathBuf::from(&resolved.warehouse.database),
            dir.path().join("wiki.db")
        );
    }

    #[tokio::test]
    async fn unreadable_config_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(LoadOptions::with_config(dir.path().join("missing.yml")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}

//! Credential documents for the object store and the warehouse.
//!
//! Secrets are held in memory only. `Debug` is implemented by hand so that a
//! stray `{:?}` in a log line never prints them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::WarehouseKind;
use crate::utils::redact::REDACTED;

/// Extensions tried, in order, when looking up a credentials document.
const CREDENTIAL_EXTENSIONS: [&str; 4] = ["yml", "yaml", "toml", "json"];

/// Default Redshift port.
const DEFAULT_REDSHIFT_PORT: u16 = 5439;

#[derive(Clone, Deserialize)]
pub struct ObjectStoreCredentials {
    #[serde(rename = "aws_access_key_id", default)]
    pub access_key: String,
    #[serde(rename = "aws_secret_access_key", default)]
    pub secret_key: String,
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Use a local directory as the bucket instead of S3.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
}

impl ObjectStoreCredentials {
    /// Apply `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` overrides.
    fn with_env_overrides(mut self) -> Self {
        if let Some(key) = non_empty_env("AWS_ACCESS_KEY_ID") {
            self.access_key = key;
        }
        if let Some(secret) = non_empty_env("AWS_SECRET_ACCESS_KEY") {
            self.secret_key = secret;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Invalid("object store bucket must not be empty".into()));
        }
        if self.local_path.is_none() && (self.access_key.is_empty() || self.secret_key.is_empty())
        {
            return Err(ConfigError::Invalid(
                "aws_access_key_id and aws_secret_access_key are required for S3".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectStoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreCredentials")
            .field("access_key", &REDACTED)
            .field("secret_key", &REDACTED)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("local_path", &self.local_path)
            .finish()
    }
}

#[derive(Clone, Deserialize)]
pub struct WarehouseCredentials {
    #[serde(rename = "host_name", default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name; for SQLite, the database file path.
    #[serde(rename = "database_name")]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "schema_name")]
    pub schema: String,
    #[serde(rename = "table_name")]
    pub table: String,
}

fn default_port() -> u16 {
    DEFAULT_REDSHIFT_PORT
}

impl WarehouseCredentials {
    /// Fully qualified `schema.table`.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(password) = non_empty_env("WAREHOUSE_PASSWORD") {
            self.password = password;
        }
        self
    }

    fn validate(&self, kind: WarehouseKind) -> Result<(), ConfigError> {
        for (label, ident) in [("schema_name", &self.schema), ("table_name", &self.table)] {
            if !is_sql_identifier(ident) {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' is not a plain SQL identifier",
                    label, ident
                )));
            }
        }
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid("database_name must not be empty".into()));
        }
        if kind == WarehouseKind::Redshift {
            if self.host.trim().is_empty() {
                return Err(ConfigError::Invalid("host_name is required for redshift".into()));
            }
            if self.user.trim().is_empty() {
                return Err(ConfigError::Invalid("user is required for redshift".into()));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for WarehouseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WarehouseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("schema", &self.schema)
            .field("table", &self.table)
            .finish()
    }
}

/// Identifiers are spliced into SQL text, so only plain names are allowed.
pub fn is_sql_identifier(s: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]{0,126}$").expect("valid regex"))
        .is_match(s)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Find `<profile>.<ext>` in `dir`.
fn find_document(dir: &Path, profile: &str) -> Result<PathBuf, ConfigError> {
    CREDENTIAL_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", profile, ext)))
        .find(|p| p.is_file())
        .ok_or_else(|| ConfigError::MissingCredentials {
            profile: profile.to_string(),
            dir: dir.to_path_buf(),
        })
}

/// Load the object store credentials for `profile`.
pub(super) async fn load_object_store(
    dir: &Path,
    profile: &str,
) -> Result<ObjectStoreCredentials, ConfigError> {
    let path = find_document(dir, profile)?;
    tracing::info!("Fetching object store credentials from: {}", path.display());
    let creds: ObjectStoreCredentials = super::parse_document(&path).await?;
    let creds = creds.with_env_overrides();
    creds.validate()?;
    Ok(creds)
}

/// Load the warehouse credentials document named after the warehouse kind.
pub(super) async fn load_warehouse(
    dir: &Path,
    kind: WarehouseKind,
) -> Result<WarehouseCredentials, ConfigError> {
    let path = find_document(dir, kind.as_str())?;
    tracing::info!("Fetching warehouse credentials from: {}", path.display());
    let creds: WarehouseCredentials = super::parse_document(&path).await?;
    let creds = creds.with_env_overrides();
    creds.validate(kind)?;
    Ok(creds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> WarehouseCredentials {
        serde_yaml::from_str(
            r#"
host_name: example.redshift.amazonaws.com
database_name: dev
user: loader
password: hunter2
schema_name: public
table_name: wikidumps
"#,
        )
        .unwrap()
    }

    #[test]
    fn debug_output_hides_secrets() {
        let creds = warehouse();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("wikidumps"));

        let store = ObjectStoreCredentials {
            access_key: "AKIAEXAMPLE".into(),
            secret_key: "topsecret".into(),
            bucket: "dumps".into(),
            region: None,
            endpoint: None,
            local_path: None,
        };
        let debug = format!("{:?}", store);
        assert!(!debug.contains("AKIAEXAMPLE"));
        assert!(!debug.contains("topsecret"));
    }

    #[test]
    fn port_defaults_to_redshift() {
        assert_eq!(warehouse().port, 5439);
        assert_eq!(warehouse().qualified_table(), "public.wikidumps");
    }

    #[test]
    fn identifiers_must_be_plain() {
        assert!(is_sql_identifier("wikidumps"));
        assert!(is_sql_identifier("_stage$1"));
        assert!(!is_sql_identifier("public; drop table x"));
        assert!(!is_sql_identifier("1table"));
        assert!(!is_sql_identifier(""));
    }

    #[test]
    fn redshift_requires_host() {
        let mut creds = warehouse();
        creds.host.clear();
        assert!(creds.validate(WarehouseKind::Redshift).is_err());
        assert!(creds.validate(WarehouseKind::Sqlite).is_ok());
    }

    #[tokio::test]
    async fn missing_document_names_the_profile() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_object_store(dir.path(), "s3").await.unwrap_err();
        assert!(err.to_string().contains("'s3'"));
    }

    #[tokio::test]
    async fn local_store_needs_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("local.yml"),
            "bucket: dumps\nlocal_path: /tmp/dumps\n",
        )
        .unwrap();
        let creds = load_object_store(dir.path(), "local").await.unwrap();
        assert_eq!(creds.bucket, "dumps");
        assert_eq!(creds.local_path, Some(PathBuf::from("/tmp/dumps")));
    }
}

//! Redshift connection helpers using rustls.
//!
//! TLS is required by default; set `no_tls: true` or `WIKICOUNTS_NO_TLS=1`
//! to disable it.

use rustls::ClientConfig;
use tokio_postgres_rustls::MakeRustlsConnect;

fn build_rustls_config() -> ClientConfig {
    let mut root_store = rustls::RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::warn!("Failed to load a native certificate: {}", err);
    }
    for cert in native.certs {
        root_store.add(cert).ok();
    }

    ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

pub fn make_tls_connector() -> MakeRustlsConnect {
    MakeRustlsConnect::new(build_rustls_config())
}

/// Connect and spawn the connection task.
///
/// Returns just the `Client`; dropping it closes the connection.
pub async fn connect_raw(
    config: &tokio_postgres::Config,
    no_tls: bool,
) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    if no_tls {
        let (client, connection) = config.connect(tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Redshift connection error: {}", e);
            }
        });
        Ok(client)
    } else {
        let (client, connection) = config.connect(make_tls_connector()).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Redshift connection error: {}", e);
            }
        });
        Ok(client)
    }
}

/// Readable message for a driver error.
///
/// `tokio_postgres::Error`'s Display only says "db error" for server-side
/// failures, so dig the server message out of it.
pub fn error_message(e: &tokio_postgres::Error) -> String {
    if let Some(db_err) = e.as_db_error() {
        format!(
            "{}: {}{}{}",
            db_err.severity(),
            db_err.message(),
            db_err
                .detail()
                .map(|d| format!(" DETAIL: {}", d))
                .unwrap_or_default(),
            db_err
                .hint()
                .map(|h| format!(" HINT: {}", h))
                .unwrap_or_default(),
        )
    } else {
        let mut msg = e.to_string();
        let mut source = std::error::Error::source(e);
        while let Some(src) = source {
            msg = format!("{}: {}", msg, src);
            source = src.source();
        }
        msg
    }
}

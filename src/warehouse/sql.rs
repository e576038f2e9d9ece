//! SQL text for bulk loads and the aggregate queries.
//!
//! Values supplied by users (language, date, n) are always bound as
//! parameters. Only validated identifiers and credentials are spliced into
//! statement text.

use std::time::Duration;

use crate::utils::redact::REDACTED;

/// Clears a transaction left open by an earlier failed load.
pub const RESET_TRANSACTION: &str = "END; COMMIT;";

/// Server-side bound for every statement that follows on the session. A
/// statement that exceeds it is cancelled and its transaction rolled back.
pub fn set_statement_timeout(timeout: Duration) -> String {
    format!("SET statement_timeout TO {};", timeout.as_millis())
}

/// Placeholder and function differences between the supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::Sqlite => format!("?{}", index),
        }
    }

    /// Date portion (before the first space) of the stored `time` column.
    fn date_part(&self) -> &'static str {
        match self {
            Self::Postgres => r#"split_part("time", ' ', 1)"#,
            Self::Sqlite => r#"substr("time", 1, instr("time", ' ') - 1)"#,
        }
    }
}

fn quote_literal(s: &str) -> String {
    s.replace('\'', "''")
}

/// Redshift `COPY ... FROM 's3://...'` wrapped in a locked transaction.
#[derive(Clone)]
pub struct CopyStatement {
    pub table: String,
    pub bucket: String,
    pub key: String,
    pub access_key: String,
    pub secret_key: String,
    pub max_errors: u64,
}

impl CopyStatement {
    fn render_with(&self, access_key: &str, secret_key: &str) -> String {
        format!(
            "BEGIN; LOCK {table}; COPY {table} FROM 's3://{bucket}/{key}' \
             CREDENTIALS 'aws_access_key_id={access};aws_secret_access_key={secret}' \
             IGNOREHEADER 1 ACCEPTINVCHARS '^' REMOVEQUOTES DELIMITER '|' MAXERROR {max}; COMMIT;",
            table = self.table,
            bucket = quote_literal(&self.bucket),
            key = quote_literal(&self.key),
            access = quote_literal(access_key),
            secret = quote_literal(secret_key),
            max = self.max_errors,
        )
    }

    /// Statement text sent to the warehouse. Contains credentials; never log it.
    pub fn render(&self) -> String {
        self.render_with(&self.access_key, &self.secret_key)
    }

    /// Statement text with credentials replaced by `***`, safe to log.
    pub fn redacted(&self) -> String {
        self.render_with(REDACTED, REDACTED)
    }
}

/// Top-N pages per language with dense ranking.
///
/// Parameters: language (when `filtered`) then n.
pub fn top_n(table: &str, dialect: Dialect, filtered: bool) -> String {
    let (filter, n_param) = if filtered {
        (
            format!(" WHERE language = {}", dialect.placeholder(1)),
            dialect.placeholder(2),
        )
    } else {
        (String::new(), dialect.placeholder(1))
    };
    format!(
        "WITH cte AS (SELECT language, page_name, SUM(num_views) AS sn FROM {table}{filter} \
         GROUP BY language, page_name), \
         cte2 AS (SELECT language, page_name, sn, \
         DENSE_RANK() OVER (PARTITION BY language ORDER BY sn DESC) AS rn FROM cte) \
         SELECT language, page_name, sn AS number_of_views, rn AS rank_num FROM cte2 \
         WHERE rn <= {n_param} ORDER BY language, rn, page_name"
    )
}

/// Total views per language. Parameter: language (when `filtered`).
pub fn total_by_language(table: &str, dialect: Dialect, filtered: bool) -> String {
    let filter = if filtered {
        format!(" WHERE language = {}", dialect.placeholder(1))
    } else {
        String::new()
    };
    format!(
        "SELECT language, SUM(num_views) AS total_views FROM {table}{filter} \
         GROUP BY language ORDER BY language"
    )
}

/// Total views per day. Parameter: `YYYY-MM-DD` (when `filtered`).
pub fn total_by_date(table: &str, dialect: Dialect, filtered: bool) -> String {
    let date = dialect.date_part();
    let filter = if filtered {
        format!(" WHERE {} = {}", date, dialect.placeholder(1))
    } else {
        String::new()
    };
    format!(
        "SELECT {date} AS date, SUM(num_views) AS total_views FROM {table}{filter} \
         GROUP BY {date} ORDER BY {date}"
    )
}

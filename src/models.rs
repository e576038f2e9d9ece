//! Domain types shared by the pipeline stages and the query service.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Supported warehouse backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseKind {
    /// Amazon Redshift, loaded with `COPY ... FROM 's3://...'`.
    Redshift,
    /// Local SQLite database file, loaded by reading the object back from the store.
    Sqlite,
}

impl WarehouseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redshift => "redshift",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for WarehouseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarehouseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redshift" => Ok(Self::Redshift),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!(
                "unsupported warehouse kind '{}' (expected redshift or sqlite)",
                other
            )),
        }
    }
}

/// One hour of one day: the unit of download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HourSlot {
    pub date: NaiveDate,
    pub hour: u32,
}

impl HourSlot {
    pub fn new(date: NaiveDate, hour: u32) -> Self {
        Self { date, hour }
    }

    /// Timestamp attached to every cleaned row, e.g. `2012-01-21 04:00`.
    pub fn timestamp(&self) -> String {
        format!("{} {:02}:00", self.date.format("%Y-%m-%d"), self.hour)
    }
}

impl fmt::Display for HourSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.timestamp())
    }
}

/// A single parsed line of a pagecounts dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub language_token: String,
    pub page_name: String,
    pub view_count: i64,
}

impl RawRecord {
    pub fn new(language_token: &str, page_name: &str, view_count: i64) -> Self {
        Self {
            language_token: language_token.to_string(),
            page_name: page_name.to_string(),
            view_count,
        }
    }
}

/// A row in canonical warehouse shape.
///
/// Field order is the staged file column order: `page_name|num_views|time|language`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRecord {
    pub page_name: String,
    #[serde(rename = "num_views")]
    pub view_count: i32,
    #[serde(rename = "time")]
    pub timestamp_hour: String,
    #[serde(rename = "language")]
    pub language_code: String,
}

/// Either every value or a single one, as accepted by the query operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    All,
    Only(T),
}

impl<T> Selection<T> {
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Self::All => None,
            Self::Only(v) => Some(v),
        }
    }
}

impl FromStr for Selection<String> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err("language code must not be empty".to_string())
        } else if s.eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            Ok(Self::Only(s.to_string()))
        }
    }
}

impl FromStr for Selection<NaiveDate> {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self::Only)
            .map_err(|_| format!("'{}' is not a date in YYYY-MM-DD format", s))
    }
}

/// Row of the top-N pages result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopPage {
    pub language: String,
    pub page_name: String,
    pub number_of_views: i64,
    pub rank_num: i64,
}

/// Row of the total-views-by-language result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageTotal {
    pub language: String,
    pub total_views: i64,
}

/// Row of the total-views-by-date result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateTotal {
    pub date: String,
    pub total_views: i64,
}

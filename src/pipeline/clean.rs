//! Record cleaner: filters raw rows and reshapes them into [`CleanRecord`]s.
//!
//! Everything here is pure; no I/O happens in this module.

use crate::error::CleanError;
use crate::models::{CleanRecord, RawRecord};

/// Page-name prefixes (compared lowercase) that mark non-article namespaces.
pub const RESERVED_PREFIXES: [&str; 7] = [
    "special:",
    "user:",
    "file:",
    "image:",
    "template:",
    "talk:",
    "%",
];

/// Page names must be strictly shorter than this many characters.
pub const MAX_PAGE_NAME_LEN: usize = 255;

/// Whether `page_name` starts with a reserved namespace prefix, ignoring case.
pub fn has_reserved_prefix(page_name: &str) -> bool {
    let lower = page_name.to_lowercase();
    RESERVED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Whether `page_name` fits the warehouse column.
///
/// Length is measured in chars. Dumps are decoded as Latin-1, so this equals
/// the byte length of the token in the source file.
pub fn within_length_limit(page_name: &str) -> bool {
    page_name.chars().count() < MAX_PAGE_NAME_LEN
}

/// Whether a raw row survives every filter predicate. Empty fields count as
/// missing.
pub fn keep(record: &RawRecord) -> bool {
    !record.language_token.is_empty()
        && !record.page_name.is_empty()
        && !has_reserved_prefix(&record.page_name)
        && within_length_limit(&record.page_name)
}

/// Language code: the part of the token before the first `.`.
pub fn language_code(token: &str) -> &str {
    token.split('.').next().unwrap_or(token)
}

/// Clean one chunk of raw rows for the hour stamped `timestamp_hour`.
///
/// Returns `Ok(None)` when nothing survives filtering, in which case nothing
/// downstream should run for the chunk. Any error drops the whole chunk.
pub fn clean_chunk(
    chunk: &[RawRecord],
    timestamp_hour: &str,
) -> Result<Option<Vec<CleanRecord>>, CleanError> {
    let kept: Vec<&RawRecord> = chunk.iter().filter(|r| keep(r)).collect();
    if kept.is_empty() {
        return Ok(None);
    }

    let batch = kept
        .into_iter()
        .map(|r| {
            let view_count =
                i32::try_from(r.view_count).map_err(|_| CleanError::ViewCountOverflow {
                    page_name: r.page_name.clone(),
                    value: r.view_count,
                })?;
            Ok(CleanRecord {
                page_name: r.page_name.clone(),
                view_count,
                timestamp_hour: timestamp_hour.to_string(),
                language_code: language_code(&r.language_token).to_string(),
            })
        })
        .collect::<Result<Vec<_>, CleanError>>()?;

    Ok(Some(batch))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: &str = "2012-01-21 04:00";

    #[test]
    fn reference_chunk_yields_single_row() {
        let chunk = vec![
            RawRecord::new("en.wikipedia", "Talk:Foo", 5),
            RawRecord::new("en.wikipedia", "Bar", 10),
            RawRecord::new("", "Baz", 1),
        ];
        let batch = clean_chunk(&chunk, HOUR).unwrap().unwrap();
        assert_eq!(
            batch,
            vec![CleanRecord {
                page_name: "Bar".to_string(),
                view_count: 10,
                timestamp_hour: HOUR.to_string(),
                language_code: "en".to_string(),
            }]
        );
    }

    #[test]
    fn reserved_prefixes_are_case_insensitive() {
        for name in [
            "Special:Random",
            "USER:Jimbo",
            "file:Logo.png",
            "Image:Cat.jpg",
            "TeMpLaTe:Infobox",
            "talk:Main",
            "%E2%82%AC",
        ] {
            assert!(has_reserved_prefix(name), "{name} should be reserved");
        }
        assert!(!has_reserved_prefix("Userland"));
        assert!(!has_reserved_prefix("Main_Page"));
    }

    #[test]
    fn length_limit_is_strict() {
        assert!(within_length_limit(&"a".repeat(254)));
        assert!(!within_length_limit(&"a".repeat(255)));
        // multi-byte chars count once each
        assert!(within_length_limit(&"é".repeat(254)));
    }

    #[test]
    fn no_emitted_row_violates_a_predicate() {
        let long = "x".repeat(300);
        let chunk: Vec<RawRecord> = [
            ("en", "Special:Export", 1),
            ("de.b", "Berlin", 2),
            ("fr", long.as_str(), 3),
            ("ja.q", "%20", 4),
            ("commons", "Image:Foo", 5),
            ("commons.m", "Valid", 6),
        ]
        .iter()
        .map(|(l, p, v)| RawRecord::new(l, p, *v))
        .collect();

        let batch = clean_chunk(&chunk, HOUR).unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        for row in &batch {
            assert!(!has_reserved_prefix(&row.page_name));
            assert!(row.page_name.chars().count() < MAX_PAGE_NAME_LEN);
            assert!(!row.language_code.is_empty());
        }
    }

    #[test]
    fn fully_filtered_chunk_short_circuits() {
        let chunk = vec![
            RawRecord::new("en", "User:Someone", 1),
            RawRecord::new("", "Orphan", 1),
        ];
        assert_eq!(clean_chunk(&chunk, HOUR).unwrap(), None);
        assert_eq!(clean_chunk(&[], HOUR).unwrap(), None);
    }

    #[test]
    fn empty_page_name_is_dropped() {
        let record = crate::pipeline::fetch::parse_line("en  3").unwrap().unwrap();
        assert_eq!(record.page_name, "");
        assert!(!keep(&record));

        let chunk = vec![record, RawRecord::new("en", "Kept", 2)];
        let batch = clean_chunk(&chunk, HOUR).unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].page_name, "Kept");
    }

    #[test]
    fn language_code_takes_prefix_before_first_dot() {
        assert_eq!(language_code("en.wikipedia"), "en");
        assert_eq!(language_code("zh-classical.b.x"), "zh-classical");
        assert_eq!(language_code("commons"), "commons");
    }

    #[test]
    fn oversized_view_count_drops_the_chunk() {
        let chunk = vec![
            RawRecord::new("en", "Fine", 1),
            RawRecord::new("en", "Huge", i64::from(i32::MAX) + 1),
        ];
        assert!(matches!(
            clean_chunk(&chunk, HOUR),
            Err(CleanError::ViewCountOverflow { .. })
        ));
    }
}

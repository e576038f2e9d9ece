//! End-to-end pipeline tests
//!
//! Runs the whole fetch → clean → stage → upload → load chain offline against a
//! local dump mirror, a filesystem bucket and a SQLite warehouse, then checks
//! the query exports.

use std::path::Path;

use async_compression::tokio::write::GzipEncoder;
use chrono::NaiveDate;
use rusqlite::Connection;
use tokio::io::AsyncWriteExt;

use wikicounts::config::{load_config, LoadOptions};
use wikicounts::models::Selection;
use wikicounts::pipeline::Pipeline;
use wikicounts::query::QueryService;
use wikicounts::storage::create_store;
use wikicounts::warehouse;

async fn gzip(lines: &[&[u8]]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    for line in lines {
        encoder.write_all(line).await.unwrap();
        encoder.write_all(b"\n").await.unwrap();
    }
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

fn write_dump(mirror: &Path, stamp: &str, body: &[u8]) {
    let dir = mirror.join("2012").join("2012-01");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("pagecounts-{stamp}.gz")), body).unwrap();
}

fn write_config(root: &Path, hours: &str, extra: &str) {
    let mirror = url::Url::from_directory_path(root.join("mirror")).unwrap();
    std::fs::write(
        root.join("wikicounts.yml"),
        format!(
            "load_to_DB: sqlite\nyear: 2012\nmonth: \"01\"\nday: 21\nhours: {hours}\n\
             base_url: {mirror}\ns3: local\nchunk_rows: 2\n{extra}"
        ),
    )
    .unwrap();
    std::fs::write(root.join("local.yml"), "bucket: dumps\nlocal_path: bucket\n").unwrap();
    std::fs::write(
        root.join("sqlite.yml"),
        "database_name: wiki.db\nschema_name: main\ntable_name: wikidumps\n",
    )
    .unwrap();
}

#[tokio::test]
async fn full_run_loads_clean_rows_and_answers_queries() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    // Hour 04: two gzip members, a filtered row in each chunk and a Latin-1 name.
    let mut hour4 = gzip(&[
        b"en.wikipedia Bar 10 123",
        b"en.wikipedia Talk:Foo 5 1",
        b" Baz 1 1",
    ])
    .await;
    hour4.extend(gzip(&[b"de.wikipedia K\xf6ln 7 9", b"en.b Main_Page 3 9"]).await);
    write_dump(&root.join("mirror"), "20120121-040000", &hour4);

    // Hour 06: malformed third line, first chunk still loads.
    let hour6 = gzip(&[b"fr Paris 4 0", b"fr Lyon 2 0", b"fr broken"]).await;
    write_dump(&root.join("mirror"), "20120121-060000", &hour6);

    // Hour 05 is missing from the mirror.
    write_config(root, "[4, 5, 6, 4]", "");

    let resolved = load_config(LoadOptions::with_config(root.join("wikicounts.yml")))
        .await
        .unwrap();
    assert_eq!(resolved.run.hours.iter().copied().collect::<Vec<_>>(), vec![4, 5, 6]);

    let store = create_store(&resolved.object_store, &resolved.settings).unwrap();
    let wh = warehouse::connect(&resolved, store.clone()).unwrap();
    let summary = Pipeline::new(&resolved, store, wh.clone())
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.hours_fetched, 1);
    assert_eq!(summary.hours_skipped, 2);
    assert_eq!(summary.rows_cleaned, 5);
    assert_eq!(summary.loads_ok, summary.files_staged);
    assert_eq!(summary.rows_loaded, 5);
    assert_eq!(summary.rows_rejected, 0);

    // Every staged file was uploaded under its basename.
    let staged: Vec<_> = std::fs::read_dir(root.join("intermediate"))
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(staged.len(), summary.files_staged);
    for name in &staged {
        assert!(root.join("bucket").join(name).is_file());
    }

    let conn = Connection::open(root.join("wiki.db")).unwrap();
    let rows: Vec<(String, i64, String, String)> = conn
        .prepare(r#"SELECT page_name, num_views, "time", language FROM wikidumps ORDER BY page_name"#)
        .unwrap()
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(names, vec!["Bar", "Köln", "Lyon", "Main_Page", "Paris"]);
    assert!(rows.iter().all(|r| r.2.starts_with("2012-01-21 0")));
    assert!(rows.iter().any(|r| r.0 == "Main_Page" && r.3 == "en"));

    let service = QueryService::new(wh, &resolved.settings.output_dir);

    let path = service.top_n(1, &Selection::All).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "language|page_name|number_of_views|rank_num\nde|Köln|7|1\nen|Bar|10|1\nfr|Paris|4|1\n"
    );

    let path = service
        .total_by_language(&Selection::Only("en".to_string()))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "language|total_views\nen|13\n"
    );

    let day = NaiveDate::from_ymd_opt(2012, 1, 21).unwrap();
    let path = service.total_by_date(&Selection::Only(day)).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(path).unwrap(),
        "date|total_views\n2012-01-21|26\n"
    );
}

#[tokio::test]
async fn rejected_rows_over_threshold_leave_table_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_dump(
        &root.join("mirror"),
        "20120121-000000",
        &gzip(&[b"en A 1", b"en B 2"]).await,
    );
    write_config(root, "[0]", "max_errors: 0\n");

    let resolved = load_config(LoadOptions::with_config(root.join("wikicounts.yml")))
        .await
        .unwrap();
    let store = create_store(&resolved.object_store, &resolved.settings).unwrap();
    let wh = warehouse::connect(&resolved, store.clone()).unwrap();

    let summary = Pipeline::new(&resolved, store, wh.clone())
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(summary.loads_ok, 1);

    // A bucket object with a malformed row: one rejection exceeds MAXERROR 0.
    let key = "wiki_manual.csv";
    std::fs::write(
        root.join("bucket").join(key),
        "page_name|num_views|time|language\nC|3|2012-01-21 00:00|en\nD|x|2012-01-21 00:00|en\n",
    )
    .unwrap();
    let object = wikicounts::pipeline::UploadedObject {
        bucket: "dumps".to_string(),
        key: key.to_string(),
        bytes: 0,
    };
    assert!(wh.bulk_load(&object).await.is_err());

    let conn = Connection::open(root.join("wiki.db")).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM wikidumps", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

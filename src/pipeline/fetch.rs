//! Source fetcher: builds dump URLs and streams them as bounded-size chunks.
//!
//! Dumps are multi-gigabyte gzip files, so nothing is buffered beyond one
//! chunk of parsed rows. A fetch always starts from byte zero; a failed hour is
//! not resumed.

use std::path::PathBuf;
use std::pin::Pin;

use async_compression::tokio::bufread::GzipDecoder;
use futures::TryStreamExt;
use reqwest::Client;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::config::Settings;
use crate::error::FetchError;
use crate::models::{HourSlot, RawRecord};

type DumpReader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Download URL for one hour: `base/YYYY/YYYY-MM/pagecounts-YYYYMMDD-HH0000.gz`.
pub fn dump_url(base_url: &str, slot: &HourSlot) -> String {
    let date = slot.date;
    format!(
        "{}/{}/{}/pagecounts-{}-{:02}0000.gz",
        base_url.trim_end_matches('/'),
        date.format("%Y"),
        date.format("%Y-%m"),
        date.format("%Y%m%d"),
        slot.hour
    )
}

/// Parse one dump line: `<lang_token> <page_name> <view_count> [ignored...]`.
///
/// Returns `Ok(None)` for blank lines. An empty language token is kept as-is;
/// dropping it is the cleaner's job.
pub fn parse_line(line: &str) -> Result<Option<RawRecord>, String> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = line.splitn(4, ' ');
    let language = fields.next().unwrap_or_default();
    let page_name = fields
        .next()
        .ok_or_else(|| "missing page_name column".to_string())?;
    let views = fields
        .next()
        .ok_or_else(|| "missing num_views column".to_string())?;
    let view_count = views
        .trim()
        .parse::<i64>()
        .map_err(|_| format!("num_views '{}' is not an integer", views))?;

    Ok(Some(RawRecord::new(language, page_name, view_count)))
}

/// Dumps are Latin-1; every byte maps to exactly one char.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Opens dump files over HTTP(S) or from the local filesystem.
#[derive(Clone)]
pub struct SourceFetcher {
    client: Client,
    chunk_rows: usize,
}

impl SourceFetcher {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(concat!("wikicounts/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(settings.request_timeout())
            .read_timeout(settings.request_timeout())
            .build()?;
        Ok(Self {
            client,
            chunk_rows: settings.chunk_rows,
        })
    }

    /// Open the dump at `url` for chunked reading.
    ///
    /// `http(s)://` URLs are downloaded; `file://` URLs and bare paths are read
    /// from disk.
    pub async fn open(&self, url: &str) -> Result<ChunkReader, FetchError> {
        let raw: DumpReader = if url.starts_with("http://") || url.starts_with("https://") {
            let http_err = |source| FetchError::Http {
                url: url.to_string(),
                source,
            };
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(http_err)?
                .error_for_status()
                .map_err(http_err)?;
            debug!(
                "Opened {} ({} bytes)",
                url,
                response
                    .content_length()
                    .map_or_else(|| "unknown".to_string(), |n| n.to_string())
            );
            let stream = response.bytes_stream().map_err(std::io::Error::other);
            Box::pin(StreamReader::new(stream))
        } else {
            let path = local_path(url);
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|source| FetchError::Io {
                    url: url.to_string(),
                    source,
                })?;
            Box::pin(BufReader::new(file))
        };

        Ok(ChunkReader::from_gzip(url, raw, self.chunk_rows))
    }
}

fn local_path(url: &str) -> PathBuf {
    url::Url::parse(url)
        .ok()
        .filter(|u| u.scheme() == "file")
        .and_then(|u| u.to_file_path().ok())
        .unwrap_or_else(|| PathBuf::from(url))
}

/// Lazy, finite sequence of parsed chunks from one dump.
pub struct ChunkReader {
    url: String,
    reader: DumpReader,
    chunk_rows: usize,
    line_no: u64,
    buf: Vec<u8>,
    finished: bool,
}

impl ChunkReader {
    /// Wrap a gzip-compressed byte stream.
    pub(crate) fn from_gzip(url: &str, raw: DumpReader, chunk_rows: usize) -> Self {
        let mut decoder = GzipDecoder::new(raw);
        decoder.multiple_members(true);
        Self {
            url: url.to_string(),
            reader: Box::pin(BufReader::new(decoder)),
            chunk_rows: chunk_rows.max(1),
            line_no: 0,
            buf: Vec::new(),
            finished: false,
        }
    }

    /// Read up to `chunk_rows` records. Returns `Ok(None)` once the stream is
    /// exhausted.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<RawRecord>>, FetchError> {
        if self.finished {
            return Ok(None);
        }

        let mut chunk = Vec::with_capacity(self.chunk_rows.min(64 * 1024));
        while chunk.len() < self.chunk_rows {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|source| FetchError::Io {
                    url: self.url.clone(),
                    source,
                })?;
            if read == 0 {
                self.finished = true;
                break;
            }
            self.line_no += 1;

            let line = decode_latin1(&self.buf);
            match parse_line(&line) {
                Ok(Some(record)) => chunk.push(record),
                Ok(None) => {}
                Err(reason) => {
                    self.finished = true;
                    return Err(FetchError::Parse {
                        url: self.url.clone(),
                        line: self.line_no,
                        reason,
                    });
                }
            }
        }

        if chunk.is_empty() {
            Ok(None)
        } else {
            Ok(Some(chunk))
        }
    }
}

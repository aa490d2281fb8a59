//! On-disk NDJSON spool of raw records.
//!
//! The fetch phase drains every page into the spool before the passes
//! begin, and each pass re-reads it from the start.

use std::fs::File;
use std::io::{BufRead as _, BufReader, BufWriter, Lines, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parcel_map_source::fetch::{FetchSummary, PageFetcher, spawn_fetch};
use parcel_map_source::progress::ProgressCallback;
use parcel_map_source::source_def::FetchPolicy;
use parcel_map_source::FetchOptions;
use serde_json::Value;

use crate::IngestError;

/// Appends raw records, one JSON document per line.
pub struct SpoolWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl SpoolWriter {
    /// Creates (truncating) the spool at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be created.
    pub fn create(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    /// Appends a page of records.
    ///
    /// # Errors
    ///
    /// Returns an error if a record cannot be serialized or written.
    pub fn write_page(&mut self, page: &[Value]) -> Result<(), IngestError> {
        for record in page {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.records += page.len() as u64;
        Ok(())
    }

    /// Flushes the spool, returning the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the flush fails.
    pub fn finish(mut self) -> Result<u64, IngestError> {
        self.writer.flush()?;
        log::debug!("Spooled {} records to {}", self.records, self.path.display());
        Ok(self.records)
    }
}

/// Iterates the records of a spool in write order.
pub struct SpoolReader {
    lines: Lines<BufReader<File>>,
}

impl SpoolReader {
    /// Opens the spool at `path` for a fresh pass.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Io`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        Ok(Self {
            lines: BufReader::new(File::open(path)?).lines(),
        })
    }
}

impl Iterator for SpoolReader {
    type Item = Result<Value, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(Into::into));
        }
    }
}

/// Runs the fetch phase to completion, spooling every page to `path`.
///
/// # Errors
///
/// Returns [`IngestError::Source`] if the fetch fails or is cancelled and
/// [`IngestError::Io`] if the spool cannot be written.
pub async fn fetch_to_spool(
    fetcher: Arc<dyn PageFetcher>,
    policy: FetchPolicy,
    options: FetchOptions,
    path: &Path,
    progress: Arc<dyn ProgressCallback>,
) -> Result<FetchSummary, IngestError> {
    let mut spool = SpoolWriter::create(path)?;
    let (mut rx, fetch_handle) = spawn_fetch(fetcher, policy, options, progress);

    while let Some(page) = rx.recv().await {
        spool.write_page(&page)?;
    }

    let summary = fetch_handle.await??;
    spool.finish()?;
    Ok(summary)
}

//! Local file fetcher.
//!
//! Serves records from a file on disk through the same paging interface as
//! remote providers. Understands `GeoJSON` feature collections, Esri JSON
//! feature sets, bare JSON arrays, and newline-delimited JSON (including
//! `GeoJSONSeq`). The file is read once, on first use.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::SourceError;
use crate::fetch::{Page, PageFetcher};

/// Pages over the records of a local file.
pub struct FileFetcher {
    label: String,
    path: PathBuf,
    page_size: u64,
    records: OnceCell<Vec<Value>>,
}

impl FileFetcher {
    /// A fetcher over `path`.
    #[must_use]
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
            page_size: page_size.max(1),
            records: OnceCell::new(),
        }
    }

    async fn records(&self) -> Result<&[Value], SourceError> {
        self.records
            .get_or_try_init(|| async {
                let records = read_records(&self.path)?;
                log::info!(
                    "[{}] loaded {} records from {}",
                    self.label,
                    records.len(),
                    self.path.display()
                );
                Ok::<_, SourceError>(records)
            })
            .await
            .map(Vec::as_slice)
    }
}

#[async_trait]
impl PageFetcher for FileFetcher {
    fn label(&self) -> &str {
        &self.label
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    async fn total_count(&self) -> Result<Option<u64>, SourceError> {
        Ok(Some(self.records().await?.len() as u64))
    }

    /// Size and modification time of the file.
    async fn change_token(&self) -> Result<Option<String>, SourceError> {
        let metadata = std::fs::metadata(&self.path)?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        Ok(Some(format!("{}-{modified}", metadata.len())))
    }

    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<Page, SourceError> {
        let records = self.records().await?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(records.len());
        let end = usize::try_from(offset.saturating_add(limit))
            .unwrap_or(usize::MAX)
            .min(records.len());
        Ok(Page {
            records: records[start..end].to_vec(),
            has_more: end < records.len(),
        })
    }
}

/// Reads every record from `path`.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read, is not JSON or
/// NDJSON, or has an unrecognized top-level shape.
pub fn read_records(path: &Path) -> Result<Vec<Value>, SourceError> {
    let text = std::fs::read_to_string(path)?;
    let trimmed = text.trim_start_matches('\u{feff}').trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(document) => records_from_document(document),
        Err(whole_err) => {
            // Newline-delimited: one JSON value per line, RS separators
            // allowed for GeoJSONSeq.
            let parsed = trimmed
                .lines()
                .map(|line| line.trim().trim_start_matches('\u{1e}'))
                .filter(|line| !line.is_empty())
                .map(serde_json::from_str::<Value>)
                .collect::<Result<Vec<_>, _>>();
            parsed.map_err(|_| SourceError::Json(whole_err))
        }
    }
}

fn records_from_document(document: Value) -> Result<Vec<Value>, SourceError> {
    match document {
        Value::Array(records) => Ok(records),
        Value::Object(mut obj) => {
            let spatial_reference = obj.remove("spatialReference");
            let Some(Value::Array(mut features)) = obj.remove("features") else {
                return Err(SourceError::Protocol {
                    message: "expected a JSON array or an object with a features array"
                        .to_string(),
                });
            };
            // Esri JSON declares the CRS once for the whole feature set.
            if let Some(sr) = spatial_reference {
                for feature in &mut features {
                    if let Some(f) = feature.as_object_mut() {
                        f.entry("spatialReference").or_insert_with(|| sr.clone());
                    }
                }
            }
            Ok(features)
        }
        other => Err(SourceError::Protocol {
            message: format!("unexpected top-level JSON value: {other}"),
        }),
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Library for running parcel sources through the fetch, dating and
//! clustering pipeline.
//!
//! [`pipeline::sync_source`] is the only place that knows about the two
//! passes over a source's spooled records; everything it calls is
//! stateless per record apart from the cluster map.

pub mod pipeline;
pub mod report;
pub mod spool;

use std::path::Path;

use parcel_map_database::DbError;
use parcel_map_database::paths::DataDir;
use parcel_map_database::source_db;
use parcel_map_dating::DatingError;
use parcel_map_generate::GenerateError;
use parcel_map_parcel_models::SourceMetadata;
use parcel_map_source::SourceError;
use parcel_map_source::source_def::SourceDefinition;

pub use pipeline::{SyncOptions, sync_source};
pub use report::{RunReport, RunStatus};

/// Environment variable holding a comma-separated source filter.
pub const SOURCES_ENV: &str = "PARCEL_MAP_SOURCES";

/// Errors that abort a source run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Source configuration or fetch failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A lookup table or boundary file could not be loaded.
    #[error(transparent)]
    Dating(#[from] DatingError),

    /// Cache failure.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Output failure.
    #[error(transparent)]
    Generate(#[from] GenerateError),

    /// Spool I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A spooled record could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The fetch task panicked or was aborted.
    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,

    /// No source has the requested id.
    #[error("unknown source {id:?} (available: {available})")]
    UnknownSource {
        /// The requested id.
        id: String,
        /// Comma-separated list of known ids.
        available: String,
    },
}

/// Loads the built-in sources plus any in `config_dir`, filtered by
/// `filter` or, failing that, the `PARCEL_MAP_SOURCES` environment
/// variable.
///
/// # Errors
///
/// Returns [`IngestError::Source`] if the config directory cannot be loaded.
pub fn enabled_sources(
    config_dir: Option<&Path>,
    filter: Option<String>,
) -> Result<Vec<SourceDefinition>, IngestError> {
    let all = parcel_map_source::registry::load_sources(config_dir)?;
    let filter = filter.or_else(|| std::env::var(SOURCES_ENV).ok());
    let available = all.iter().map(SourceDefinition::id).collect::<Vec<_>>().join(", ");

    let filtered = parcel_map_source::registry::filter_sources(all, filter.as_deref());
    if filtered.is_empty() {
        log::warn!("No matching sources found for filter {filter:?}. Available: {available}");
    }
    Ok(filtered)
}

/// Finds the source with id `id`.
///
/// # Errors
///
/// Returns [`IngestError::UnknownSource`] if no source matches.
pub fn find_source<'a>(
    sources: &'a [SourceDefinition],
    id: &str,
) -> Result<&'a SourceDefinition, IngestError> {
    sources
        .iter()
        .find(|s| s.id() == id)
        .ok_or_else(|| IngestError::UnknownSource {
            id: id.to_string(),
            available: sources
                .iter()
                .map(SourceDefinition::id)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Stored metadata for each source, `None` for sources never completed.
///
/// Sources without a cache file are reported without opening (and so
/// creating) one.
///
/// # Errors
///
/// Returns [`IngestError::Db`] if an existing cache cannot be read.
pub fn source_status(
    data: &DataDir,
    sources: &[SourceDefinition],
) -> Result<Vec<(String, Option<SourceMetadata>)>, IngestError> {
    sources
        .iter()
        .map(|source| {
            let path = data.source_db_path(source.id());
            let metadata = if path.exists() {
                let conn = source_db::open(&path)?;
                source_db::get_metadata(&conn, source.id())?
            } else {
                None
            };
            Ok((source.id().to_string(), metadata))
        })
        .collect()
}

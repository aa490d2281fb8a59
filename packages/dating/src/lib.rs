#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Construction-year resolution.
//!
//! Parcels with a known year keep it. Everything else goes through the
//! [`waterfall::Waterfall`], which consults progressively weaker evidence
//! (authoritative lookup tables, dated historical boundaries, a distance
//! model, per-category medians) and records which one produced the year.

pub mod boundaries;
pub mod distance;
pub mod lookup;
pub mod statistics;
pub mod waterfall;

use std::path::PathBuf;

pub use waterfall::{DatingSources, Waterfall};

/// Errors loading dating evidence. All of them are fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum DatingError {
    /// A lookup table could not be read.
    #[error("CSV error in {path}: {source}")]
    Csv {
        /// Path to the CSV file.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A lookup table has no `id` or `year` column.
    #[error("{path}: missing required column {column:?}")]
    MissingColumn {
        /// Path to the CSV file.
        path: PathBuf,
        /// Column name.
        column: &'static str,
    },

    /// A boundary file could not be loaded.
    #[error("Boundary file {path}: {source}")]
    Boundary {
        /// Path to the boundary file.
        path: PathBuf,
        /// Underlying error.
        source: parcel_map_spatial::SpatialError,
    },
}

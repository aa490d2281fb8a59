#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Output generation for parcel-map.
//!
//! Dated parcels are streamed into a detailed `GeoJSONSeq` layer (one
//! feature per parcel) and accumulated by [`cluster::ClusterMap`] into an
//! aggregated point layer. The detailed layer can optionally be tiled into
//! `PMTiles` with tippecanoe.
//!
//! All outputs are staged under hidden names and renamed into place
//! together once every one of them is complete.

pub mod cluster;
pub mod output;
pub mod tiles;

pub use cluster::{AggregatedFeature, ClusterMap};
pub use output::{DetailedWriter, OutputPaths, PlacedOutputs, StagedOutput, place_all, write_aggregated};

/// Errors that can occur while writing outputs.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// I/O error writing or renaming an output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A feature could not be serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// tippecanoe exited unsuccessfully.
    #[error("tippecanoe failed: {status}")]
    Tippecanoe {
        /// Exit status reported by the process.
        status: String,
    },
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Point-in-polygon containment for dated historical boundaries.
//!
//! A [`ContainmentChecker`] precomputes bounding boxes for one boundary and
//! answers exact even-odd containment queries. A [`BoundarySet`] indexes
//! many boundaries in an R-tree and returns the earliest-loaded one that
//! contains a point. Used by the date resolution waterfall's spatial join.

pub mod boundary;
pub mod containment;

pub use boundary::{Boundary, BoundaryFeature, BoundarySet, read_boundary_features};
pub use containment::{Bbox, ContainmentChecker};

/// Errors from building boundaries or reading boundary files.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The shape has no polygons.
    #[error("Geometry has no polygons")]
    EmptyGeometry,

    /// A ring cannot enclose any area.
    #[error("Ring {ring} of polygon {polygon} has {distinct} distinct vertices (need at least 3)")]
    DegenerateRing {
        /// Polygon index within the multipolygon.
        polygon: usize,
        /// Ring index within the polygon (0 is the outer ring).
        ring: usize,
        /// Distinct vertices found.
        distinct: usize,
    },

    /// I/O error reading a boundary file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A boundary file is not valid `GeoJSON`.
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

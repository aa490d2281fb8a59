//! Dated historical boundaries and their R-tree index.

use std::path::Path;

use geo::MultiPolygon;
use geojson::{GeoJson, JsonObject};
use rstar::{AABB, RTree, RTreeObject};

use crate::SpatialError;
use crate::containment::{Bbox, ContainmentChecker};

/// A named polygon with the year it was established.
pub struct Boundary {
    name: String,
    year: i32,
    checker: ContainmentChecker,
}

impl Boundary {
    /// # Errors
    ///
    /// Returns [`SpatialError`] if `shape` cannot be prepared for
    /// containment queries.
    pub fn new(name: impl Into<String>, year: i32, shape: &MultiPolygon<f64>) -> Result<Self, SpatialError> {
        Ok(Self {
            name: name.into(),
            year,
            checker: ContainmentChecker::build(shape)?,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn year(&self) -> i32 {
        self.year
    }

    #[must_use]
    pub const fn bbox(&self) -> Bbox {
        self.checker.bbox()
    }

    #[must_use]
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        self.checker.contains(lng, lat)
    }

    /// Full ray casts run against this boundary so far.
    #[must_use]
    pub fn ray_casts(&self) -> u64 {
        self.checker.ray_casts()
    }
}

/// A boundary's envelope and its position in load order.
struct IndexedEnvelope {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Boundaries in load order, indexed by envelope.
///
/// Boundaries may overlap; the one loaded first wins.
pub struct BoundarySet {
    boundaries: Vec<Boundary>,
    index: RTree<IndexedEnvelope>,
}

impl BoundarySet {
    #[must_use]
    pub fn new(boundaries: Vec<Boundary>) -> Self {
        let entries = boundaries
            .iter()
            .enumerate()
            .map(|(index, boundary)| {
                let bbox = boundary.bbox();
                IndexedEnvelope {
                    index,
                    envelope: AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]),
                }
            })
            .collect();

        Self {
            boundaries,
            index: RTree::bulk_load(entries),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    /// Boundaries in load order.
    pub fn iter(&self) -> impl Iterator<Item = &Boundary> {
        self.boundaries.iter()
    }

    /// The earliest-loaded boundary containing `(lng, lat)`.
    #[must_use]
    pub fn containing(&self, lng: f64, lat: f64) -> Option<&Boundary> {
        let query_env = AABB::from_point([lng, lat]);

        self.index
            .locate_in_envelope_intersecting(&query_env)
            .map(|entry| entry.index)
            .filter(|&i| self.boundaries[i].contains(lng, lat))
            .min()
            .map(|i| &self.boundaries[i])
    }
}

/// A polygonal feature read from a boundary file.
pub struct BoundaryFeature {
    pub properties: JsonObject,
    pub shape: MultiPolygon<f64>,
}

/// Reads the polygonal features of a `GeoJSON` file in file order.
///
/// Accepts a `FeatureCollection`, a single `Feature`, or a bare geometry.
/// Features without polygonal geometry are skipped with a warning.
///
/// # Errors
///
/// Returns [`SpatialError`] if the file cannot be read or is not valid
/// `GeoJSON`.
pub fn read_boundary_features(path: &Path) -> Result<Vec<BoundaryFeature>, SpatialError> {
    let text = std::fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse()?;

    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    let mut out = Vec::with_capacity(features.len());
    for (i, feature) in features.into_iter().enumerate() {
        let Some(shape) = feature.geometry.and_then(to_multipolygon) else {
            log::warn!("{}: feature {i} has no polygonal geometry, skipping", path.display());
            continue;
        };
        out.push(BoundaryFeature {
            properties: feature.properties.unwrap_or_default(),
            shape,
        });
    }
    Ok(out)
}

fn to_multipolygon(geometry: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geometry: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geometry {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

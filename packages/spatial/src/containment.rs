//! Exact point-in-polygon tests with bounding-box rejection.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use geo::{BoundingRect, Coord, LineString, MultiPolygon, Rect};

use crate::SpatialError;

/// An axis-aligned bounding box, edges inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bbox {
    #[must_use]
    pub const fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

impl From<Rect<f64>> for Bbox {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            min_x: rect.min().x,
            min_y: rect.min().y,
            max_x: rect.max().x,
            max_y: rect.max().y,
        }
    }
}

struct PreparedPolygon {
    bbox: Bbox,
    exterior: Vec<Coord<f64>>,
    holes: Vec<Vec<Coord<f64>>>,
}

impl PreparedPolygon {
    fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }
}

/// Answers "is this point inside the boundary" for one (multi)polygon.
///
/// Bounding boxes of the whole shape and of each polygon are computed once
/// at build time, so points outside them are rejected without touching the
/// rings. Points inside a polygon's box get an even-odd ray cast against
/// the outer ring and every hole. [`Self::ray_casts`] counts those full
/// evaluations.
pub struct ContainmentChecker {
    bbox: Bbox,
    polygons: Vec<PreparedPolygon>,
    ray_casts: AtomicU64,
}

impl ContainmentChecker {
    /// Prepares `shape` for containment queries.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::EmptyGeometry`] if `shape` has no polygons
    /// and [`SpatialError::DegenerateRing`] if any ring has fewer than 3
    /// distinct vertices.
    pub fn build(shape: &MultiPolygon<f64>) -> Result<Self, SpatialError> {
        let mut polygons = Vec::with_capacity(shape.0.len());

        for (p, polygon) in shape.0.iter().enumerate() {
            validate_ring(polygon.exterior(), p, 0)?;
            for (h, hole) in polygon.interiors().iter().enumerate() {
                validate_ring(hole, p, h + 1)?;
            }
            let Some(rect) = polygon.bounding_rect() else {
                return Err(SpatialError::EmptyGeometry);
            };
            polygons.push(PreparedPolygon {
                bbox: rect.into(),
                exterior: polygon.exterior().0.clone(),
                holes: polygon.interiors().iter().map(|r| r.0.clone()).collect(),
            });
        }

        let bbox = shape
            .bounding_rect()
            .map(Bbox::from)
            .ok_or(SpatialError::EmptyGeometry)?;

        Ok(Self {
            bbox,
            polygons,
            ray_casts: AtomicU64::new(0),
        })
    }

    /// Bounding box of the whole shape.
    #[must_use]
    pub const fn bbox(&self) -> Bbox {
        self.bbox
    }

    /// Whether `(lng, lat)` lies inside any constituent polygon and outside
    /// all of its holes.
    #[must_use]
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        if !self.bbox.contains(lng, lat) {
            return false;
        }
        self.polygons.iter().any(|polygon| {
            if !polygon.bbox.contains(lng, lat) {
                return false;
            }
            self.ray_casts.fetch_add(1, Ordering::Relaxed);
            polygon.contains(lng, lat)
        })
    }

    /// [`Self::contains`] for each `[lng, lat]` in `points`.
    #[must_use]
    pub fn contains_many(&self, points: &[[f64; 2]]) -> Vec<bool> {
        points.iter().map(|[x, y]| self.contains(*x, *y)).collect()
    }

    /// Number of polygons evaluated with a full ray cast so far.
    #[must_use]
    pub fn ray_casts(&self) -> u64 {
        self.ray_casts.load(Ordering::Relaxed)
    }
}

fn validate_ring(ring: &LineString<f64>, polygon: usize, ring_index: usize) -> Result<(), SpatialError> {
    let distinct: BTreeSet<(u64, u64)> = ring
        .0
        .iter()
        .map(|c| (c.x.to_bits(), c.y.to_bits()))
        .collect();
    if distinct.len() < 3 {
        return Err(SpatialError::DegenerateRing {
            polygon,
            ring: ring_index,
            distinct: distinct.len(),
        });
    }
    Ok(())
}

/// Even-odd rule. Works on open or closed rings.
fn ring_contains(ring: &[Coord<f64>], x: f64, y: f64) -> bool {
    let Some(mut prev) = ring.last() else {
        return false;
    };
    let mut inside = false;
    for current in ring {
        if (current.y > y) != (prev.y > y)
            && x < (prev.x - current.x) * (y - current.y) / (prev.y - current.y) + current.x
        {
            inside = !inside;
        }
        prev = current;
    }
    inside
}

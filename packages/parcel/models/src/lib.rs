#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Canonical parcel schema shared across the parcel-map workspace.
//!
//! Every provider dialect is normalized into [`NormalizedParcel`]. The
//! land-use taxonomy is the closed [`LandUseCategory`] set, and the outcome
//! of year resolution is carried as [`DateEvidence`].

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Earliest construction year accepted as plausible.
pub const MIN_PLAUSIBLE_YEAR: i32 = 1400;

/// Latest construction year accepted as plausible.
pub const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// Returns `true` if `year` lies in the plausible construction range.
#[must_use]
pub const fn is_plausible_year(year: i32) -> bool {
    year >= MIN_PLAUSIBLE_YEAR && year <= MAX_PLAUSIBLE_YEAR
}

/// Canonical land-use categories.
///
/// This set is closed: text that matches no categorization rule maps to
/// [`LandUseCategory::Other`], never to an absent value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LandUseCategory {
    /// Detached single-family homes, townhouses.
    SingleFamily,
    /// Apartments, condominiums, duplexes and larger.
    MultiFamily,
    /// Shops, restaurants, general commercial.
    Retail,
    /// Offices, banks, medical offices.
    Office,
    /// Manufacturing, warehousing, utilities.
    Industrial,
    /// Hotels, motels, lodging.
    Hotel,
    /// Public, institutional, and tax-exempt uses.
    Government,
    /// Combined residential and commercial use.
    MixedUse,
    /// Undeveloped or unimproved land.
    Vacant,
    /// Anything not matched by a categorization rule.
    Other,
}

impl LandUseCategory {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::SingleFamily,
            Self::MultiFamily,
            Self::Retail,
            Self::Office,
            Self::Industrial,
            Self::Hotel,
            Self::Government,
            Self::MixedUse,
            Self::Vacant,
            Self::Other,
        ]
    }

    /// Hex color used by the renderer for this category.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::SingleFamily => "#f2c14e",
            Self::MultiFamily => "#f78154",
            Self::Retail => "#e0475b",
            Self::Office => "#5d9cec",
            Self::Industrial => "#8c7ae6",
            Self::Hotel => "#d980fa",
            Self::Government => "#4cb944",
            Self::MixedUse => "#ff9f1c",
            Self::Vacant => "#bdbdbd",
            Self::Other => "#7f8c8d",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::SingleFamily => "Single-family",
            Self::MultiFamily => "Multi-family",
            Self::Retail => "Retail",
            Self::Office => "Office",
            Self::Industrial => "Industrial",
            Self::Hotel => "Hotel",
            Self::Government => "Government",
            Self::MixedUse => "Mixed use",
            Self::Vacant => "Vacant",
            Self::Other => "Other",
        }
    }
}

/// How a construction year was obtained.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DateMethod {
    /// Sourced from the record itself or an authoritative lookup table.
    Exact,
    /// Inherited from the first dated boundary containing the parcel.
    SpatialJoin,
    /// Sampled from a distance-to-center heuristic.
    DistanceModel,
    /// Median known year for the parcel's land-use category.
    CategoryMedian,
}

/// Ordinal confidence attached to [`DateEvidence`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Confidence {
    /// Heuristic models with no direct evidence.
    Lowest = 1,
    /// Statistical fallbacks.
    Low = 2,
    /// Indirect spatial evidence.
    Medium = 3,
    /// Authoritative values.
    High = 4,
}

impl DateMethod {
    /// Confidence assigned to every year produced by this method.
    #[must_use]
    pub const fn confidence(self) -> Confidence {
        match self {
            Self::Exact => Confidence::High,
            Self::SpatialJoin => Confidence::Medium,
            Self::CategoryMedian => Confidence::Low,
            Self::DistanceModel => Confidence::Lowest,
        }
    }
}

/// Outcome of year resolution for one parcel.
///
/// Assigned once per parcel per pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateEvidence {
    /// Resolved construction year.
    pub year: i32,
    /// Which evidence source produced the year.
    pub method: DateMethod,
    /// Confidence of the method.
    pub confidence: Confidence,
}

impl DateEvidence {
    /// Builds evidence for `year` obtained via `method`.
    #[must_use]
    pub const fn new(year: i32, method: DateMethod) -> Self {
        Self {
            year,
            method,
            confidence: method.confidence(),
        }
    }

    /// Evidence for a year that came directly from authoritative data.
    #[must_use]
    pub const fn exact(year: i32) -> Self {
        Self::new(year, DateMethod::Exact)
    }

    /// Whether the year was inferred rather than sourced.
    #[must_use]
    pub const fn is_estimated(&self) -> bool {
        !matches!(self.method, DateMethod::Exact)
    }
}

/// A `[longitude, latitude]` pair (or `[x, y]` before reprojection).
pub type Position = [f64; 2];

/// Parcel geometry, serialized as a `GeoJSON` geometry object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum ParcelGeometry {
    /// A single point (address point or building centroid).
    Point(Position),
    /// Outer ring followed by hole rings.
    Polygon(Vec<Vec<Position>>),
    /// Several polygons, each outer ring followed by its holes.
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl ParcelGeometry {
    /// Applies `f` to every coordinate, short-circuiting on the first error.
    ///
    /// # Errors
    ///
    /// Returns whatever error `f` returns first.
    pub fn try_map_positions<E>(
        &self,
        mut f: impl FnMut(Position) -> Result<Position, E>,
    ) -> Result<Self, E> {
        Ok(match self {
            Self::Point(p) => Self::Point(f(*p)?),
            Self::Polygon(rings) => Self::Polygon(map_rings(rings, &mut f)?),
            Self::MultiPolygon(polygons) => Self::MultiPolygon(
                polygons
                    .iter()
                    .map(|rings| map_rings(rings, &mut f))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    /// Iterates over every coordinate in the geometry.
    pub fn positions(&self) -> Box<dyn Iterator<Item = &Position> + '_> {
        match self {
            Self::Point(p) => Box::new(std::iter::once(p)),
            Self::Polygon(rings) => Box::new(rings.iter().flatten()),
            Self::MultiPolygon(polygons) => Box::new(polygons.iter().flatten().flatten()),
        }
    }

    /// Returns the point used for spatial joins and clustering.
    ///
    /// Points return themselves. Polygons return their area-weighted
    /// centroid (holes subtracted), falling back to the vertex mean for
    /// degenerate rings. Returns `None` when no finite point exists.
    #[must_use]
    pub fn representative_point(&self) -> Option<Position> {
        let point = match self {
            Self::Point(p) => *p,
            Self::Polygon(rings) => polygons_centroid(std::slice::from_ref(rings))?,
            Self::MultiPolygon(polygons) => polygons_centroid(polygons)?,
        };
        (point[0].is_finite() && point[1].is_finite()).then_some(point)
    }

    /// `GeoJSON` geometry type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

fn map_rings<E>(
    rings: &[Vec<Position>],
    f: &mut impl FnMut(Position) -> Result<Position, E>,
) -> Result<Vec<Vec<Position>>, E> {
    rings
        .iter()
        .map(|ring| ring.iter().map(|p| f(*p)).collect::<Result<Vec<_>, E>>())
        .collect()
}

/// Signed shoelace moments of a ring: `(2 * area, sum_x, sum_y)`.
fn ring_moments(ring: &[Position]) -> (f64, f64, f64) {
    let mut a = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for pair in ring.windows(2) {
        let [x0, y0] = pair[0];
        let [x1, y1] = pair[1];
        let cross = x0.mul_add(y1, -(x1 * y0));
        a += cross;
        sx += (x0 + x1) * cross;
        sy += (y0 + y1) * cross;
    }
    if let (Some(first), Some(last)) = (ring.first(), ring.last())
        && first != last
    {
        let [x0, y0] = *last;
        let [x1, y1] = *first;
        let cross = x0.mul_add(y1, -(x1 * y0));
        a += cross;
        sx += (x0 + x1) * cross;
        sy += (y0 + y1) * cross;
    }
    if a < 0.0 { (-a, -sx, -sy) } else { (a, sx, sy) }
}

fn polygons_centroid(polygons: &[Vec<Vec<Position>>]) -> Option<Position> {
    let mut area = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for rings in polygons {
        for (i, ring) in rings.iter().enumerate() {
            let (a, x, y) = ring_moments(ring);
            let sign = if i == 0 { 1.0 } else { -1.0 };
            area += sign * a;
            sx += sign * x;
            sy += sign * y;
        }
    }

    if area.abs() > f64::MIN_POSITIVE {
        return Some([sx / (3.0 * area), sy / (3.0 * area)]);
    }

    // Degenerate: average the outer-ring vertices.
    let outer: Vec<&Position> = polygons.iter().filter_map(|r| r.first()).flatten().collect();
    if outer.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = outer.len() as f64;
    Some([
        outer.iter().map(|p| p[0]).sum::<f64>() / n,
        outer.iter().map(|p| p[1]).sum::<f64>() / n,
    ])
}

/// A cadastral or building record normalized to the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedParcel {
    /// Record identity, unique within its source.
    pub id: String,
    /// Construction year, when the source provides a plausible one.
    pub year_built: Option<i32>,
    /// Renovation or assessment year.
    pub effective_year: Option<i32>,
    /// Land-use description as delivered by the source.
    pub land_use_raw: String,
    /// Canonical land-use category derived from `land_use_raw`.
    pub land_use_category: LandUseCategory,
    /// Site address.
    pub address: Option<String>,
    /// City name.
    pub city: Option<String>,
    /// Floor or lot area in square meters.
    pub area_sqm: Option<f64>,
    /// Number of stories.
    pub stories: Option<f64>,
    /// Number of dwelling or commercial units.
    pub units: Option<u32>,
    /// Geometry in WGS84 longitude/latitude.
    pub geometry: ParcelGeometry,
    /// The original provider record.
    pub raw: serde_json::Value,
}

/// Why a record was excluded from the output or flagged in the run tally.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// No identifier candidate held a value.
    MissingIdentity,
    /// No geometry could be located on the record.
    MissingGeometry,
    /// Geometry was present but unusable.
    MalformedGeometry,
    /// The record declared a coordinate system that is not registered.
    UnregisteredCrs,
    /// Auto-detection could not identify the coordinate system.
    UndetectedCrs,
    /// A date field held text no dialect could parse.
    MalformedDate,
    /// A page of records could not be fetched after all retries.
    FetchFailure,
    /// No waterfall stage produced a year.
    UnresolvedYear,
}

/// Freshness state tracked per source between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetadata {
    /// Source identifier.
    pub source_id: String,
    /// Provider change token (edit date, ETag, file fingerprint).
    pub change_token: Option<String>,
    /// RFC 3339 timestamp of the last successful run.
    pub last_fetched: String,
    /// Number of records processed by the last successful run.
    pub record_count: u64,
}

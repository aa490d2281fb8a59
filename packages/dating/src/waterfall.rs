//! The date resolution waterfall.
//!
//! Evidence is consulted strictly in order and the first source with an
//! answer wins:
//!
//! | Step | Source | Method | Confidence |
//! |---|---|---|---|
//! | 0 | the record's own year | `exact` | high |
//! | 1 | exact lookup table | `exact` | high |
//! | 2 | containing dated boundary | `spatial_join` | medium |
//! | 3 | distance model | `distance_model` | lowest |
//! | 4 | category (or global) median | `category_median` | low |

use std::path::Path;

use parcel_map_parcel_models::{DateEvidence, DateMethod, NormalizedParcel};
use parcel_map_source::source_def::DatingConfig;
use parcel_map_spatial::BoundarySet;

use crate::DatingError;
use crate::boundaries::load_boundary_set;
use crate::distance::{DistanceModel, model_from_config};
use crate::lookup::ExactLookup;
use crate::statistics::YearStatistics;

/// Per-source evidence that does not depend on the dataset itself.
pub struct DatingSources {
    lookup: ExactLookup,
    boundaries: BoundarySet,
    distance: Option<Box<dyn DistanceModel>>,
}

impl Default for DatingSources {
    fn default() -> Self {
        Self::new(ExactLookup::default(), BoundarySet::new(Vec::new()), None)
    }
}

impl DatingSources {
    #[must_use]
    pub const fn new(
        lookup: ExactLookup,
        boundaries: BoundarySet,
        distance: Option<Box<dyn DistanceModel>>,
    ) -> Self {
        Self {
            lookup,
            boundaries,
            distance,
        }
    }

    /// Loads the lookup table, boundary files and distance model a source
    /// configures. Relative paths are resolved against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`DatingError`] if a lookup table or boundary file cannot be
    /// loaded.
    pub fn load(config: &DatingConfig, base_dir: &Path) -> Result<Self, DatingError> {
        let lookup = match &config.lookup {
            Some(path) => ExactLookup::from_path(&base_dir.join(path))?,
            None => ExactLookup::default(),
        };
        let boundaries = load_boundary_set(&config.boundaries, base_dir)?;
        let distance = config.distance_model.as_ref().map(model_from_config);
        Ok(Self::new(lookup, boundaries, distance))
    }

    #[must_use]
    pub const fn boundaries(&self) -> &BoundarySet {
        &self.boundaries
    }
}

/// Assigns [`DateEvidence`] to parcels.
pub struct Waterfall {
    sources: DatingSources,
    statistics: YearStatistics,
}

impl Waterfall {
    #[must_use]
    pub const fn new(sources: DatingSources, statistics: YearStatistics) -> Self {
        Self {
            sources,
            statistics,
        }
    }

    /// The parcel's own year if it has one, otherwise [`Self::resolve`].
    #[must_use]
    pub fn evidence_for(&self, parcel: &NormalizedParcel) -> Option<DateEvidence> {
        parcel
            .year_built
            .map(DateEvidence::exact)
            .or_else(|| self.resolve(parcel))
    }

    /// Infers a year for a parcel without one. `None` only when no evidence
    /// source applies and no statistics were gathered.
    #[must_use]
    pub fn resolve(&self, parcel: &NormalizedParcel) -> Option<DateEvidence> {
        if let Some(year) = self.sources.lookup.get(&parcel.id) {
            return Some(DateEvidence::exact(year));
        }

        if let Some(point) = parcel.geometry.representative_point() {
            if let Some(boundary) = self.sources.boundaries.containing(point[0], point[1]) {
                return Some(DateEvidence::new(boundary.year(), DateMethod::SpatialJoin));
            }
            if let Some(year) = self
                .sources
                .distance
                .as_ref()
                .and_then(|model| model.estimate(&parcel.id, point))
            {
                return Some(DateEvidence::new(year, DateMethod::DistanceModel));
            }
        }

        self.statistics
            .median_for(parcel.land_use_category)
            .map(|year| DateEvidence::new(year, DateMethod::CategoryMedian))
    }

    #[must_use]
    pub const fn statistics(&self) -> &YearStatistics {
        &self.statistics
    }
}

#[cfg(test)]
mod tests {
    use geo::{LineString, MultiPolygon, Polygon};
    use parcel_map_parcel_models::{Confidence, LandUseCategory, ParcelGeometry};
    use parcel_map_source::source_def::{HistoricCenter, RingConfig, RingSampling};
    use parcel_map_spatial::Boundary;

    use super::*;
    use crate::distance::ConcentricRings;

    fn parcel(id: &str, year: Option<i32>, category: LandUseCategory, at: [f64; 2]) -> NormalizedParcel {
        NormalizedParcel {
            id: id.to_string(),
            year_built: year,
            effective_year: None,
            land_use_raw: String::new(),
            land_use_category: category,
            address: None,
            city: None,
            area_sqm: None,
            stories: None,
            units: None,
            geometry: ParcelGeometry::Point(at),
            raw: serde_json::Value::Null,
        }
    }

    fn ward() -> BoundarySet {
        let square = MultiPolygon(vec![Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]),
            vec![],
        )]);
        BoundarySet::new(vec![Boundary::new("Ward 1", 1870, &square).unwrap()])
    }

    fn rings() -> Box<dyn DistanceModel> {
        Box::new(ConcentricRings::new(
            vec![HistoricCenter {
                name: "Center".to_string(),
                lng: 0.5,
                lat: 0.5,
            }],
            vec![RingConfig {
                max_km: 500.0,
                years: (1900, 1900),
            }],
            RingSampling::Interpolate,
        ))
    }

    fn stats() -> YearStatistics {
        let mut stats = YearStatistics::new();
        stats.observe(LandUseCategory::Retail, 1955);
        stats.observe(LandUseCategory::SingleFamily, 1920);
        stats.observe(LandUseCategory::SingleFamily, 1940);
        stats
    }

    fn full_waterfall() -> Waterfall {
        let lookup: ExactLookup = [("looked-up".to_string(), 1888)].into_iter().collect();
        Waterfall::new(DatingSources::new(lookup, ward(), Some(rings())), stats())
    }

    #[test]
    fn source_year_beats_everything() {
        let waterfall = full_waterfall();
        let evidence = waterfall
            .evidence_for(&parcel("looked-up", Some(1999), LandUseCategory::Retail, [0.5, 0.5]))
            .unwrap();
        assert_eq!(evidence.year, 1999);
        assert_eq!(evidence.method, DateMethod::Exact);
        assert_eq!(evidence.confidence, Confidence::High);
        assert!(!evidence.is_estimated());
    }

    #[test]
    fn evidence_is_consulted_in_strict_priority() {
        let waterfall = full_waterfall();
        let at = |id, point| {
            waterfall
                .evidence_for(&parcel(id, None, LandUseCategory::Retail, point))
                .unwrap()
        };

        let lookup = at("looked-up", [0.5, 0.5]);
        assert_eq!((lookup.year, lookup.method), (1888, DateMethod::Exact));

        let joined = at("in-ward", [0.5, 0.5]);
        assert_eq!((joined.year, joined.method), (1870, DateMethod::SpatialJoin));
        assert_eq!(joined.confidence, Confidence::Medium);

        let modeled = at("near", [1.5, 0.5]);
        assert_eq!((modeled.year, modeled.method), (1900, DateMethod::DistanceModel));
        assert_eq!(modeled.confidence, Confidence::Lowest);

        let median = at("far", [40.0, 40.0]);
        assert_eq!((median.year, median.method), (1955, DateMethod::CategoryMedian));
        assert_eq!(median.confidence, Confidence::Low);
        assert!(median.is_estimated());
    }

    #[test]
    fn category_without_known_years_uses_global_median() {
        let waterfall = Waterfall::new(DatingSources::default(), stats());
        let evidence = waterfall
            .evidence_for(&parcel("h", None, LandUseCategory::Hotel, [0.0, 0.0]))
            .unwrap();
        assert_eq!(evidence.year, 1940);
        assert_eq!(evidence.method, DateMethod::CategoryMedian);
    }

    #[test]
    fn nothing_to_go_on_leaves_the_year_unresolved() {
        let waterfall = Waterfall::new(DatingSources::default(), YearStatistics::new());
        assert!(
            waterfall
                .evidence_for(&parcel("x", None, LandUseCategory::Other, [0.0, 0.0]))
                .is_none()
        );
    }
}

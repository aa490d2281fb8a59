//! Grid clustering of dated parcels into the aggregated layer.
//!
//! Parcels are keyed by `(block, grid_x, grid_y)`, where the block comes
//! from [`BlockKey::block_of`] and the grid cell is `floor(coord / size)`.
//! Coordinates are summed as integer nanodegrees so the final centroid
//! does not depend on the order parcels arrive in.

use std::collections::BTreeMap;

use parcel_map_parcel_models::{DateEvidence, LandUseCategory, NormalizedParcel, Position};
use parcel_map_source::source_def::{ClusterConfig, ClusterMeasure};
use serde::Serialize;

const NANOS_PER_DEGREE: f64 = 1e9;

/// Identity of one grid cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterKey {
    pub block: String,
    pub grid_x: i64,
    pub grid_y: i64,
}

#[derive(Debug, Clone, Default)]
struct Cluster {
    sum_x: i128,
    sum_y: i128,
    count: u64,
    /// In first-seen order.
    categories: Vec<(LandUseCategory, u64)>,
    measure: f64,
    earliest_year: Option<i32>,
    has_estimates: bool,
}

impl Cluster {
    fn dominant_category(&self) -> LandUseCategory {
        let mut best: Option<(LandUseCategory, u64)> = None;
        for &(category, count) in &self.categories {
            if best.is_none_or(|(_, top)| count > top) {
                best = Some((category, count));
            }
        }
        best.map_or(LandUseCategory::Other, |(category, _)| category)
    }
}

/// One finalized cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedFeature {
    pub block: String,
    pub grid_x: i64,
    pub grid_y: i64,
    /// Mean position of the member parcels.
    pub position: Position,
    /// Earliest resolved year among the members.
    pub year: Option<i32>,
    pub category: LandUseCategory,
    pub count: u64,
    pub measure: f64,
    /// Whether any member's year was inferred.
    pub estimated: bool,
}

impl AggregatedFeature {
    #[must_use]
    pub const fn color(&self) -> &'static str {
        self.category.color()
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.category.label()
    }

    /// The cluster as a `GeoJSON` point feature.
    #[must_use]
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "Feature",
            "geometry": {
                "type": "Point",
                "coordinates": self.position,
            },
            "properties": {
                "block": self.block,
                "year": self.year,
                "category": self.category,
                "color": self.color(),
                "label": self.label(),
                "count": self.count,
                "measure": self.measure,
                "estimated": self.estimated,
            }
        })
    }
}

/// Accumulates parcels into grid clusters for a single source run.
#[derive(Debug)]
pub struct ClusterMap {
    config: ClusterConfig,
    clusters: BTreeMap<ClusterKey, Cluster>,
    skipped: u64,
}

impl ClusterMap {
    #[must_use]
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            config,
            clusters: BTreeMap::new(),
            skipped: 0,
        }
    }

    /// Adds a parcel. Returns `false` (and counts a skip) when the parcel
    /// has no usable representative point.
    pub fn add(&mut self, parcel: &NormalizedParcel, evidence: Option<&DateEvidence>) -> bool {
        let Some(point) = parcel.geometry.representative_point() else {
            self.skipped += 1;
            return false;
        };
        let (Some(grid_x), Some(grid_y)) = (
            grid_index(point[0], self.config.grid_size),
            grid_index(point[1], self.config.grid_size),
        ) else {
            self.skipped += 1;
            return false;
        };

        let key = ClusterKey {
            block: self.config.block.block_of(&parcel.id),
            grid_x,
            grid_y,
        };
        let measure = match self.config.measure {
            ClusterMeasure::Area => parcel.area_sqm.unwrap_or(0.0),
            ClusterMeasure::Units => f64::from(parcel.units.unwrap_or(0)),
            ClusterMeasure::Count => 1.0,
        };

        let cluster = self.clusters.entry(key).or_default();
        cluster.sum_x += to_nanos(point[0]);
        cluster.sum_y += to_nanos(point[1]);
        cluster.count += 1;
        cluster.measure += measure;

        let category = parcel.land_use_category;
        match cluster.categories.iter_mut().find(|(c, _)| *c == category) {
            Some((_, count)) => *count += 1,
            None => cluster.categories.push((category, 1)),
        }

        if let Some(evidence) = evidence {
            cluster.earliest_year = Some(
                cluster
                    .earliest_year
                    .map_or(evidence.year, |year| year.min(evidence.year)),
            );
            cluster.has_estimates |= evidence.is_estimated();
        }
        true
    }

    /// Number of clusters so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Parcels rejected for lacking a representative point.
    #[must_use]
    pub const fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Emits every cluster in key order.
    #[must_use]
    pub fn finalize(self) -> Vec<AggregatedFeature> {
        self.clusters
            .into_iter()
            .map(|(key, cluster)| {
                let category = cluster.dominant_category();
                AggregatedFeature {
                    position: [
                        mean_degrees(cluster.sum_x, cluster.count),
                        mean_degrees(cluster.sum_y, cluster.count),
                    ],
                    year: cluster.earliest_year,
                    category,
                    count: cluster.count,
                    measure: cluster.measure,
                    estimated: cluster.has_estimates,
                    block: key.block,
                    grid_x: key.grid_x,
                    grid_y: key.grid_y,
                }
            })
            .collect()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_nanos(degrees: f64) -> i128 {
    (degrees * NANOS_PER_DEGREE).round() as i128
}

#[allow(clippy::cast_precision_loss)]
fn mean_degrees(sum: i128, count: u64) -> f64 {
    sum as f64 / count as f64 / NANOS_PER_DEGREE
}

#[allow(clippy::cast_possible_truncation)]
fn grid_index(coord: f64, grid_size: f64) -> Option<i64> {
    let cell = (coord / grid_size).floor();
    cell.is_finite().then_some(cell as i64)
}

#[cfg(test)]
mod tests {
    use parcel_map_parcel_models::{DateMethod, ParcelGeometry};
    use parcel_map_source::source_def::BlockKey;

    use super::*;

    fn parcel(id: &str, category: LandUseCategory, at: [f64; 2]) -> NormalizedParcel {
        NormalizedParcel {
            id: id.to_string(),
            year_built: None,
            effective_year: None,
            land_use_raw: String::new(),
            land_use_category: category,
            address: None,
            city: None,
            area_sqm: Some(100.0),
            stories: None,
            units: Some(2),
            geometry: ParcelGeometry::Point(at),
            raw: serde_json::Value::Null,
        }
    }

    fn config(grid_size: f64) -> ClusterConfig {
        ClusterConfig {
            grid_size,
            block: BlockKey::None,
            measure: ClusterMeasure::Count,
        }
    }

    #[test]
    fn nearby_parcels_share_a_cluster() {
        let mut map = ClusterMap::new(config(0.01));
        map.add(
            &parcel("a", LandUseCategory::Retail, [10.0, 10.0]),
            Some(&DateEvidence::exact(1950)),
        );
        map.add(
            &parcel("b", LandUseCategory::Retail, [10.0001, 10.0001]),
            Some(&DateEvidence::exact(1930)),
        );

        let features = map.finalize();
        assert_eq!(features.len(), 1);
        let cluster = &features[0];
        assert_eq!(cluster.count, 2);
        assert!((cluster.position[0] - 10.00005).abs() < 1e-9);
        assert!((cluster.position[1] - 10.00005).abs() < 1e-9);
        assert_eq!(cluster.year, Some(1930));
        assert_eq!((cluster.grid_x, cluster.grid_y), (1000, 1000));
        assert!(!cluster.estimated);
    }

    #[test]
    fn centroid_does_not_depend_on_insertion_order() {
        let points = [
            [-122.419_416_1, 37.774_929_3],
            [-122.418_7, 37.775_1],
            [-122.411_023_7, 37.779_999_9],
            [-122.410_000_1, 37.770_000_3],
        ];
        let build = |order: &[usize]| {
            let mut map = ClusterMap::new(config(0.05));
            for &i in order {
                map.add(
                    &parcel(&i.to_string(), LandUseCategory::Office, points[i]),
                    Some(&DateEvidence::exact(1900 + i32::try_from(i).unwrap())),
                );
            }
            map.finalize()
        };

        let forward = build(&[0, 1, 2, 3]);
        let backward = build(&[3, 2, 1, 0]);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].position, backward[0].position);
        assert_eq!(forward[0].year, backward[0].year);
        assert_eq!(forward[0].count, backward[0].count);
    }

    #[test]
    fn one_estimate_marks_the_cluster_estimated() {
        let mut map = ClusterMap::new(config(1.0));
        map.add(
            &parcel("a", LandUseCategory::Retail, [0.5, 0.5]),
            Some(&DateEvidence::new(1960, DateMethod::CategoryMedian)),
        );
        for i in 0..5 {
            map.add(
                &parcel(&format!("x{i}"), LandUseCategory::Retail, [0.25, 0.25]),
                Some(&DateEvidence::exact(1990)),
            );
        }
        let features = map.finalize();
        assert!(features[0].estimated);
        assert_eq!(features[0].year, Some(1960));
    }

    #[test]
    fn dominant_category_ties_go_to_the_first_seen() {
        let mut map = ClusterMap::new(config(1.0));
        map.add(&parcel("a", LandUseCategory::Hotel, [0.1, 0.1]), None);
        map.add(&parcel("b", LandUseCategory::Retail, [0.2, 0.2]), None);
        map.add(&parcel("c", LandUseCategory::Retail, [0.3, 0.3]), None);
        map.add(&parcel("d", LandUseCategory::Hotel, [0.4, 0.4]), None);

        let features = map.finalize();
        assert_eq!(features[0].category, LandUseCategory::Hotel);
        assert_eq!(features[0].color(), LandUseCategory::Hotel.color());
        assert_eq!(features[0].year, None);
    }

    #[test]
    fn blocks_and_measures_split_and_sum() {
        let mut map = ClusterMap::new(ClusterConfig {
            grid_size: 1.0,
            block: BlockKey::Prefix { chars: 2 },
            measure: ClusterMeasure::Area,
        });
        map.add(&parcel("01-1", LandUseCategory::Office, [0.5, 0.5]), None);
        map.add(&parcel("01-2", LandUseCategory::Office, [0.6, 0.5]), None);
        map.add(&parcel("02-1", LandUseCategory::Office, [0.5, 0.5]), None);
        map.add(&parcel("01-3", LandUseCategory::Office, [-0.5, 0.5]), None);

        let features = map.finalize();
        let summary: Vec<_> = features
            .iter()
            .map(|f| (f.block.as_str(), f.grid_x, f.count, f.measure))
            .collect();
        assert_eq!(
            summary,
            vec![("01", -1, 1, 100.0), ("01", 0, 2, 200.0), ("02", 0, 1, 100.0)]
        );
    }

    #[test]
    fn parcels_without_a_point_are_counted_as_skipped() {
        let mut map = ClusterMap::new(config(1.0));
        let mut empty = parcel("e", LandUseCategory::Vacant, [0.0, 0.0]);
        empty.geometry = ParcelGeometry::Polygon(vec![]);
        assert!(!map.add(&empty, None));
        assert_eq!(map.skipped(), 1);
        assert!(map.is_empty());
    }
}

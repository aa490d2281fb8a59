//! Distance-based year models.
//!
//! A [`DistanceModel`] guesses a construction year from where a parcel
//! sits. [`ConcentricRings`] is the shipped strategy: bands around the
//! nearest historic center, each mapped to a year range.

use parcel_map_parcel_models::Position;
use parcel_map_source::source_def::{DistanceModelConfig, HistoricCenter, RingConfig, RingSampling};

/// Mean Earth radius (IUGG).
const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Estimates a year for a parcel from its location.
pub trait DistanceModel: Send + Sync {
    /// A year for the parcel `id` located at `point`, or `None` when the
    /// model does not cover that location.
    fn estimate(&self, id: &str, point: Position) -> Option<i32>;
}

/// Builds the model a source definition configures.
#[must_use]
pub fn model_from_config(config: &DistanceModelConfig) -> Box<dyn DistanceModel> {
    match config {
        DistanceModelConfig::ConcentricRings {
            centers,
            rings,
            sampling,
        } => Box::new(ConcentricRings::new(centers.clone(), rings.clone(), *sampling)),
    }
}

/// Year ranges by distance from the nearest historic center.
///
/// Beyond the outermost ring the model has no opinion.
#[derive(Debug, Clone)]
pub struct ConcentricRings {
    centers: Vec<HistoricCenter>,
    rings: Vec<RingConfig>,
    sampling: RingSampling,
}

impl ConcentricRings {
    #[must_use]
    pub fn new(centers: Vec<HistoricCenter>, mut rings: Vec<RingConfig>, sampling: RingSampling) -> Self {
        rings.sort_by(|a, b| a.max_km.total_cmp(&b.max_km));
        Self {
            centers,
            rings,
            sampling,
        }
    }

    fn nearest_center_km(&self, point: Position) -> Option<f64> {
        self.centers
            .iter()
            .map(|c| haversine_km([c.lng, c.lat], point))
            .min_by(f64::total_cmp)
    }
}

impl DistanceModel for ConcentricRings {
    #[allow(clippy::cast_possible_truncation)]
    fn estimate(&self, id: &str, point: Position) -> Option<i32> {
        let distance = self.nearest_center_km(point)?;
        let index = self.rings.iter().position(|r| distance <= r.max_km)?;
        let ring = &self.rings[index];
        let inner = index.checked_sub(1).map_or(0.0, |i| self.rings[i].max_km);
        let (earliest, latest) = ring.years;

        Some(match self.sampling {
            RingSampling::Interpolate => {
                let width = ring.max_km - inner;
                let t = if width > 0.0 {
                    ((distance - inner) / width).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                f64::from(latest - earliest)
                    .mul_add(t, f64::from(earliest))
                    .round() as i32
            }
            RingSampling::Hash => {
                let span = u64::from((latest - earliest).unsigned_abs()) + 1;
                // `span` is at most 2^32, so the offset fits in an i64.
                let offset = i64::try_from(stable_hash(id) % span).unwrap_or_default();
                i32::try_from(i64::from(earliest) + offset).unwrap_or(earliest)
            }
        })
    }
}

/// Great-circle distance between two `[lng, lat]` points.
#[must_use]
pub fn haversine_km(a: Position, b: Position) -> f64 {
    let (lat1, lat2) = (a[1].to_radians(), b[1].to_radians());
    let d_lat = lat2 - lat1;
    let d_lng = (b[0] - a[0]).to_radians();
    let h = (lat1.cos() * lat2.cos()).mul_add((d_lng / 2.0).sin().powi(2), (d_lat / 2.0).sin().powi(2));
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// FNV-1a; stable across runs and platforms.
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

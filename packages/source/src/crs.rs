//! Coordinate reference systems.
//!
//! Providers publish parcels in whatever system their GIS department uses:
//! geographic WGS84, Web Mercator, UTM, US State Plane in survey feet,
//! national grids. A [`ProjectionRegistry`] maps CRS codes to the inverse
//! projection that brings coordinates back to WGS84 longitude/latitude.
//!
//! Datum shifts between WGS84, NAD83, ETRS89, OSGB36 and DHDN are not
//! applied; the residual error (up to a few hundred meters for OSGB36 and
//! DHDN) is below what the aggregated layers resolve.

use std::collections::BTreeMap;
use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use parcel_map_parcel_models::Position;

/// Meters per US survey foot.
pub const US_SURVEY_FOOT: f64 = 1200.0 / 3937.0;

/// Sphere radius used by Web Mercator.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Largest Web Mercator easting (longitude 180°).
const WEB_MERCATOR_MAX_X: f64 = 20_037_508.342_789_244;

/// Largest Web Mercator northing accepted by detection (latitude ~85.1°).
const WEB_MERCATOR_MAX_Y: f64 = 20_048_966.104_014_6;

/// Code reported by [`detect_crs`] when no system fits.
pub const UNKNOWN_CRS: &str = "unknown";

/// A reference ellipsoid given by its semi-major axis and inverse
/// flattening.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Semi-major axis in meters.
    pub a: f64,
    /// Inverse flattening.
    pub inv_f: f64,
}

impl Ellipsoid {
    /// WGS 84.
    pub const WGS84: Self = Self {
        a: 6_378_137.0,
        inv_f: 298.257_223_563,
    };
    /// GRS 1980 (NAD83, ETRS89).
    pub const GRS80: Self = Self {
        a: 6_378_137.0,
        inv_f: 298.257_222_101,
    };
    /// Airy 1830 (OSGB36).
    pub const AIRY_1830: Self = Self {
        a: 6_377_563.396,
        inv_f: 299.324_964_6,
    };
    /// Bessel 1841 (DHDN).
    pub const BESSEL_1841: Self = Self {
        a: 6_377_397.155,
        inv_f: 299.152_812_8,
    };

    /// First eccentricity squared.
    #[must_use]
    pub fn e2(self) -> f64 {
        let f = 1.0 / self.inv_f;
        f * (2.0 - f)
    }
}

/// Transverse Mercator parameters (UTM, Gauss-Krüger, British National
/// Grid, TM State Plane zones).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    /// Reference ellipsoid.
    pub ellipsoid: Ellipsoid,
    /// Latitude of origin in degrees.
    pub lat0: f64,
    /// Central meridian in degrees.
    pub lon0: f64,
    /// Scale factor on the central meridian.
    pub k0: f64,
    /// False easting in meters.
    pub false_easting: f64,
    /// False northing in meters.
    pub false_northing: f64,
    /// Meters per coordinate unit.
    pub unit: f64,
}

/// Lambert Conformal Conic (two standard parallels) parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LambertConformalConic {
    /// Reference ellipsoid.
    pub ellipsoid: Ellipsoid,
    /// First standard parallel in degrees.
    pub lat1: f64,
    /// Second standard parallel in degrees.
    pub lat2: f64,
    /// Latitude of origin in degrees.
    pub lat0: f64,
    /// Central meridian in degrees.
    pub lon0: f64,
    /// False easting in meters.
    pub false_easting: f64,
    /// False northing in meters.
    pub false_northing: f64,
    /// Meters per coordinate unit.
    pub unit: f64,
}

/// An inverse projection to WGS84 longitude/latitude.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Already longitude/latitude degrees.
    Geographic,
    /// Spherical Web Mercator meters.
    WebMercator,
    /// Ellipsoidal Transverse Mercator.
    TransverseMercator(TransverseMercator),
    /// Ellipsoidal Lambert Conformal Conic.
    LambertConformalConic(LambertConformalConic),
}

impl Projection {
    /// Converts a projected `[x, y]` to `[longitude, latitude]`.
    ///
    /// Returns `None` if the result is not a finite, in-range coordinate.
    #[must_use]
    pub fn to_wgs84(&self, [x, y]: Position) -> Option<Position> {
        let [lng, lat] = match self {
            Self::Geographic => [x, y],
            Self::WebMercator => [
                (x / WEB_MERCATOR_RADIUS).to_degrees(),
                2.0f64
                    .mul_add((y / WEB_MERCATOR_RADIUS).exp().atan(), -FRAC_PI_2)
                    .to_degrees(),
            ],
            Self::TransverseMercator(tm) => tm.inverse(x, y),
            Self::LambertConformalConic(lcc) => lcc.inverse(x, y),
        };
        (lng.is_finite() && lat.is_finite() && lng.abs() <= 180.0 && lat.abs() <= 90.0)
            .then_some([lng, lat])
    }
}

impl TransverseMercator {
    /// UTM zone on the given ellipsoid.
    #[must_use]
    pub fn utm(ellipsoid: Ellipsoid, zone: u32, south: bool) -> Self {
        Self {
            ellipsoid,
            lat0: 0.0,
            lon0: f64::from(zone).mul_add(6.0, -183.0),
            k0: 0.9996,
            false_easting: 500_000.0,
            false_northing: if south { 10_000_000.0 } else { 0.0 },
            unit: 1.0,
        }
    }

    #[allow(clippy::suboptimal_flops, clippy::similar_names)]
    fn inverse(&self, x: f64, y: f64) -> Position {
        let a = self.ellipsoid.a;
        let e2 = self.ellipsoid.e2();
        let ep2 = e2 / (1.0 - e2);
        let x = x * self.unit - self.false_easting;
        let y = y * self.unit - self.false_northing;

        let m = meridian_arc(a, e2, self.lat0.to_radians()) + y / self.k0;
        let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
        let root = (1.0 - e2).sqrt();
        let e1 = (1.0 - root) / (1.0 + root);
        let phi1 = mu
            + (1.5 * e1 - 27.0 / 32.0 * e1.powi(3)) * (2.0 * mu).sin()
            + (21.0 / 16.0 * e1.powi(2) - 55.0 / 32.0 * e1.powi(4)) * (4.0 * mu).sin()
            + (151.0 / 96.0 * e1.powi(3)) * (6.0 * mu).sin()
            + (1097.0 / 512.0 * e1.powi(4)) * (8.0 * mu).sin();

        let (sin1, cos1) = phi1.sin_cos();
        let tan1 = phi1.tan();
        let c1 = ep2 * cos1 * cos1;
        let t1 = tan1 * tan1;
        let w = 1.0 - e2 * sin1 * sin1;
        let n1 = a / w.sqrt();
        let r1 = a * (1.0 - e2) / w.powf(1.5);
        let d = x / (n1 * self.k0);

        let lat = phi1
            - (n1 * tan1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1
                        - 252.0 * ep2
                        - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lon = self.lon0.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                    * d.powi(5)
                    / 120.0)
                / cos1;

        [lon.to_degrees(), lat.to_degrees()]
    }
}

/// Meridional arc length from the equator to latitude `phi` (radians).
#[allow(clippy::suboptimal_flops)]
fn meridian_arc(a: f64, e2: f64, phi: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    a * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
        + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

impl LambertConformalConic {
    #[allow(clippy::suboptimal_flops)]
    fn inverse(&self, x: f64, y: f64) -> Position {
        let a = self.ellipsoid.a;
        let e2 = self.ellipsoid.e2();
        let e = e2.sqrt();

        let phi1 = self.lat1.to_radians();
        let phi2 = self.lat2.to_radians();
        let m1 = lcc_m(e2, phi1);
        let t1 = lcc_t(e, phi1);
        let n = if (self.lat1 - self.lat2).abs() < 1e-10 {
            phi1.sin()
        } else {
            (m1.ln() - lcc_m(e2, phi2).ln()) / (t1.ln() - lcc_t(e, phi2).ln())
        };
        let big_f = m1 / (n * t1.powf(n));
        let rho0 = a * big_f * lcc_t(e, self.lat0.to_radians()).powf(n);

        let dx = x * self.unit - self.false_easting;
        let dy = rho0 - (y * self.unit - self.false_northing);
        let sign = n.signum();
        let rho = sign * dx.hypot(dy);
        let theta = (sign * dx).atan2(sign * dy);
        let t = (rho / (a * big_f)).powf(1.0 / n);

        let mut phi = FRAC_PI_2 - 2.0 * t.atan();
        for _ in 0..15 {
            let es = e * phi.sin();
            let next = FRAC_PI_2 - 2.0 * (t * ((1.0 - es) / (1.0 + es)).powf(e / 2.0)).atan();
            let converged = (next - phi).abs() < 1e-12;
            phi = next;
            if converged {
                break;
            }
        }

        let lon = theta / n + self.lon0.to_radians();
        [lon.to_degrees(), phi.to_degrees()]
    }
}

fn lcc_m(e2: f64, phi: f64) -> f64 {
    let s = phi.sin();
    phi.cos() / (1.0 - e2 * s * s).sqrt()
}

fn lcc_t(e: f64, phi: f64) -> f64 {
    let es = e * phi.sin();
    (FRAC_PI_4 - phi / 2.0).tan() / ((1.0 - es) / (1.0 + es)).powf(e / 2.0)
}

/// `(code, lat1, lat2, lat0, lon0, false_easting_m, false_northing_m)` for
/// NAD83 State Plane Lambert zones published in US survey feet.
const STATE_PLANE_LCC_FTUS: &[(u32, f64, f64, f64, f64, f64, f64)] = &[
    // New York Long Island
    (2263, 41.033_333_333_333, 40.666_666_666_667, 40.166_666_666_667, -74.0, 300_000.0, 0.0),
    // California zone 3
    (2227, 38.433_333_333_333, 37.066_666_666_667, 36.5, -120.5, 2_000_000.0, 500_000.0),
    // California zone 5
    (2229, 35.466_666_666_667, 34.033_333_333_333, 33.5, -118.0, 2_000_000.0, 500_000.0),
    // Maryland
    (2248, 39.45, 38.3, 37.666_666_666_667, -77.0, 400_000.0, 0.0),
    // Massachusetts Mainland
    (2249, 42.683_333_333_333, 41.716_666_666_667, 41.0, -71.5, 200_000.0, 750_000.0),
    // Pennsylvania South
    (2272, 40.966_666_666_667, 39.933_333_333_333, 39.333_333_333_333, -77.75, 600_000.0, 0.0),
    // Texas South Central
    (2278, 30.283_333_333_333, 28.383_333_333_333, 27.833_333_333_333, -99.0, 600_000.0, 4_000_000.0),
    // Washington North
    (2285, 48.733_333_333_333, 47.5, 47.0, -120.833_333_333_333, 500_000.0, 0.0),
    // Colorado Central
    (2232, 39.75, 38.45, 37.833_333_333_333, -105.5, 914_401.828_9, 304_800.609_6),
];

/// A registry of CRS codes and their inverse projections.
///
/// Codes are stored canonicalized (see [`canonical_code`]). The registry is
/// an ordinary value handed to whoever needs it; callers extend it with
/// [`Self::register`].
#[derive(Debug, Clone)]
pub struct ProjectionRegistry {
    projections: BTreeMap<String, Projection>,
}

impl Default for ProjectionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ProjectionRegistry {
    /// An empty registry.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            projections: BTreeMap::new(),
        }
    }

    /// The built-in table of common systems.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.register("EPSG:4326", Projection::Geographic);
        registry.register("EPSG:4269", Projection::Geographic);
        registry.register("EPSG:3857", Projection::WebMercator);
        registry.register("EPSG:900913", Projection::WebMercator);
        registry.register("ESRI:102100", Projection::WebMercator);
        registry.register("ESRI:102113", Projection::WebMercator);

        for zone in 1..=60 {
            let north = TransverseMercator::utm(Ellipsoid::WGS84, zone, false);
            let south = TransverseMercator::utm(Ellipsoid::WGS84, zone, true);
            registry.register(
                &format!("EPSG:{}", 32600 + zone),
                Projection::TransverseMercator(north),
            );
            registry.register(
                &format!("EPSG:{}", 32700 + zone),
                Projection::TransverseMercator(south),
            );
        }
        for zone in 1..=23 {
            let utm = TransverseMercator::utm(Ellipsoid::GRS80, zone, false);
            registry.register(
                &format!("EPSG:{}", 26900 + zone),
                Projection::TransverseMercator(utm),
            );
        }
        for zone in 28..=38 {
            let utm = TransverseMercator::utm(Ellipsoid::GRS80, zone, false);
            registry.register(
                &format!("EPSG:{}", 25800 + zone),
                Projection::TransverseMercator(utm),
            );
        }

        for &(code, lat1, lat2, lat0, lon0, false_easting, false_northing) in STATE_PLANE_LCC_FTUS {
            registry.register(
                &format!("EPSG:{code}"),
                Projection::LambertConformalConic(LambertConformalConic {
                    ellipsoid: Ellipsoid::GRS80,
                    lat1,
                    lat2,
                    lat0,
                    lon0,
                    false_easting,
                    false_northing,
                    unit: US_SURVEY_FOOT,
                }),
            );
        }

        // Illinois East
        registry.register(
            "EPSG:3435",
            Projection::TransverseMercator(TransverseMercator {
                ellipsoid: Ellipsoid::GRS80,
                lat0: 36.666_666_666_667,
                lon0: -88.333_333_333_333,
                k0: 0.999_975,
                false_easting: 300_000.0,
                false_northing: 0.0,
                unit: US_SURVEY_FOOT,
            }),
        );

        // Lambert-93
        registry.register(
            "EPSG:2154",
            Projection::LambertConformalConic(LambertConformalConic {
                ellipsoid: Ellipsoid::GRS80,
                lat1: 49.0,
                lat2: 44.0,
                lat0: 46.5,
                lon0: 3.0,
                false_easting: 700_000.0,
                false_northing: 6_600_000.0,
                unit: 1.0,
            }),
        );

        // British National Grid
        registry.register(
            "EPSG:27700",
            Projection::TransverseMercator(TransverseMercator {
                ellipsoid: Ellipsoid::AIRY_1830,
                lat0: 49.0,
                lon0: -2.0,
                k0: 0.999_601_271_7,
                false_easting: 400_000.0,
                false_northing: -100_000.0,
                unit: 1.0,
            }),
        );

        // Gauss-Krüger zone 3
        registry.register(
            "EPSG:31467",
            Projection::TransverseMercator(TransverseMercator {
                ellipsoid: Ellipsoid::BESSEL_1841,
                lat0: 0.0,
                lon0: 9.0,
                k0: 1.0,
                false_easting: 3_500_000.0,
                false_northing: 0.0,
                unit: 1.0,
            }),
        );

        registry
    }

    /// Registers (or replaces) the projection for `code`.
    pub fn register(&mut self, code: &str, projection: Projection) {
        self.projections.insert(canonical_code(code), projection);
    }

    /// Looks up the projection for `code` in any accepted spelling.
    #[must_use]
    pub fn resolve(&self, code: &str) -> Option<&Projection> {
        self.projections.get(&canonical_code(code))
    }

    /// Whether `code` is registered.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.resolve(code).is_some()
    }

    /// All registered canonical codes, sorted.
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.projections.keys().map(String::as_str)
    }
}

/// Canonicalizes a CRS code.
///
/// Accepts `"EPSG:2263"`, `"epsg:2263"`, bare `"2263"`, OGC URNs such as
/// `"urn:ogc:def:crs:EPSG::2263"` and `"urn:ogc:def:crs:OGC:1.3:CRS84"`.
/// Bare numbers of six or more digits are Esri well-known IDs. Anything
/// else is returned trimmed and uppercased so lookups simply miss.
#[must_use]
pub fn canonical_code(code: &str) -> String {
    let upper = code.trim().to_ascii_uppercase();
    if upper.ends_with("CRS84") {
        return "EPSG:4326".to_string();
    }
    let number = upper.rsplit(':').next().unwrap_or_default();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return upper;
    }
    let authority = if upper.contains("ESRI") || (!upper.contains("EPSG") && number.len() >= 6) {
        "ESRI"
    } else {
        "EPSG"
    };
    format!("{authority}:{number}")
}

/// Result of CRS auto-detection.
#[derive(Debug, Clone, PartialEq)]
pub struct CrsGuess {
    /// Canonical code, or [`UNKNOWN_CRS`].
    pub crs: String,
    /// Heuristic confidence in `[0, 1]`.
    pub confidence: f64,
}

impl CrsGuess {
    fn unknown() -> Self {
        Self {
            crs: UNKNOWN_CRS.to_string(),
            confidence: 0.0,
        }
    }

    /// Whether a system was identified.
    #[must_use]
    pub fn is_known(&self) -> bool {
        self.crs != UNKNOWN_CRS
    }
}

/// UTM zone containing longitude `lng`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn utm_zone_for(lng: f64) -> u32 {
    (((lng + 180.0) / 6.0).floor() as u32 + 1).clamp(1, 60)
}

/// Guesses the coordinate system of a sample of coordinates from their
/// magnitudes.
///
/// - every pair inside `[-180, 180] × [-90, 90]`: WGS84 (0.95)
/// - UTM-shaped eastings/northings with a hint longitude: that UTM zone
///   (0.6)
/// - inside the Web Mercator square: Web Mercator (0.8 when some easting
///   is negative, 0.4 otherwise)
/// - anything else: [`UNKNOWN_CRS`] with confidence 0
#[must_use]
pub fn detect_crs(coords: &[Position], hint_lng: Option<f64>) -> CrsGuess {
    let coords: Vec<&Position> = coords
        .iter()
        .filter(|[x, y]| x.is_finite() && y.is_finite())
        .collect();
    if coords.is_empty() {
        return CrsGuess::unknown();
    }

    if coords
        .iter()
        .all(|[x, y]| x.abs() <= 180.0 && y.abs() <= 90.0)
    {
        return CrsGuess {
            crs: "EPSG:4326".to_string(),
            confidence: 0.95,
        };
    }

    let utm_shaped = coords
        .iter()
        .all(|[x, y]| (100_000.0..=900_000.0).contains(x) && (0.0..=9_400_000.0).contains(y));
    if utm_shaped && let Some(lng) = hint_lng {
        return CrsGuess {
            crs: format!("EPSG:{}", 32600 + utm_zone_for(lng)),
            confidence: 0.6,
        };
    }

    if coords
        .iter()
        .all(|[x, y]| x.abs() <= WEB_MERCATOR_MAX_X && y.abs() <= WEB_MERCATOR_MAX_Y)
    {
        let confidence = if coords.iter().any(|[x, _]| *x < 0.0) {
            0.8
        } else {
            0.4
        };
        return CrsGuess {
            crs: "EPSG:3857".to_string(),
            confidence,
        };
    }

    CrsGuess::unknown()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn to_wgs84(code: &str, x: f64, y: f64) -> Position {
        ProjectionRegistry::standard()
            .resolve(code)
            .unwrap()
            .to_wgs84([x, y])
            .unwrap()
    }

    fn assert_close([lng, lat]: Position, expected_lng: f64, expected_lat: f64) {
        assert!(
            (lng - expected_lng).abs() < TOLERANCE && (lat - expected_lat).abs() < TOLERANCE,
            "got ({lng}, {lat}), expected ({expected_lng}, {expected_lat})"
        );
    }

    #[test]
    fn canonicalizes_code_spellings() {
        assert_eq!(canonical_code("epsg:2263"), "EPSG:2263");
        assert_eq!(canonical_code(" 2263 "), "EPSG:2263");
        assert_eq!(canonical_code("urn:ogc:def:crs:EPSG::27700"), "EPSG:27700");
        assert_eq!(canonical_code("urn:ogc:def:crs:OGC:1.3:CRS84"), "EPSG:4326");
        assert_eq!(canonical_code("102100"), "ESRI:102100");
        assert_eq!(canonical_code("EPSG:999999"), "EPSG:999999");
        assert_eq!(canonical_code("local grid"), "LOCAL GRID");
    }

    #[test]
    fn web_mercator_inverse() {
        assert_close(to_wgs84("EPSG:3857", 0.0, 5_621_521.486_192_066), 0.0, 45.0);
        assert_close(to_wgs84("ESRI:102100", 0.0, 0.0), 0.0, 0.0);
    }

    #[test]
    fn utm_central_meridian() {
        assert_close(to_wgs84("EPSG:32633", 500_000.0, 4_982_950.400_480_594), 15.0, 45.0);
        assert_close(to_wgs84("EPSG:32633", 500_000.0, 0.0), 15.0, 0.0);
    }

    #[test]
    fn utm_off_meridian() {
        assert_close(
            to_wgs84("EPSG:32618", 585_628.409_087_815, 4_511_322.447_651_052),
            -73.9857,
            40.7484,
        );
    }

    #[test]
    fn british_national_grid_worked_example() {
        assert_close(
            to_wgs84("EPSG:27700", 651_409.903, 313_177.270),
            1.0 + 43.0 / 60.0 + 4.5177 / 3600.0,
            52.0 + 39.0 / 60.0 + 27.2531 / 3600.0,
        );
    }

    #[test]
    fn gauss_kruger_zone_3() {
        assert_close(
            to_wgs84("EPSG:31467", 3_691_620.686_412_689, 5_336_324.611_096_021),
            11.575,
            48.137,
        );
    }

    #[test]
    fn state_plane_feet() {
        assert_close(
            to_wgs84("EPSG:2263", 988_212.237_182_984_8, 211_939.278_568_327_5),
            -73.9857,
            40.7484,
        );
        assert_close(
            to_wgs84("EPSG:3435", 1_175_844.396_566_970_5, 1_898_954.876_563_066_6),
            -87.6298,
            41.8781,
        );
    }

    #[test]
    fn lambert_origin_maps_to_origin() {
        let x0 = 300_000.0 / US_SURVEY_FOOT;
        assert_close(to_wgs84("EPSG:2263", x0, 0.0), -74.0, 40.166_666_666_667);
        assert_close(to_wgs84("EPSG:2154", 700_000.0, 6_600_000.0), 3.0, 46.5);
    }

    #[test]
    fn lambert_93() {
        assert_close(
            to_wgs84("EPSG:2154", 652_469.022_709_135_9, 6_862_035.259_420_077),
            2.3522,
            48.8566,
        );
    }

    #[test]
    fn unregistered_code_misses() {
        let registry = ProjectionRegistry::standard();
        assert!(registry.resolve("EPSG:999999").is_none());
        assert!(registry.contains("epsg:4326"));
    }

    #[test]
    fn registry_is_extensible() {
        let mut registry = ProjectionRegistry::empty();
        assert!(!registry.contains("EPSG:4326"));
        registry.register("4326", Projection::Geographic);
        assert!(registry.contains("EPSG:4326"));
    }

    #[test]
    fn detects_wgs84() {
        let guess = detect_crs(&[[-87.6, 41.8], [-87.7, 41.9]], None);
        assert_eq!(guess.crs, "EPSG:4326");
        assert!(guess.confidence >= 0.9);
    }

    #[test]
    fn detects_web_mercator() {
        let guess = detect_crs(&[[-9_754_904.0, 5_142_736.0]], None);
        assert_eq!(guess.crs, "EPSG:3857");
        assert!(guess.confidence > 0.5);
    }

    #[test]
    fn detects_utm_with_hint() {
        let guess = detect_crs(&[[448_000.0, 4_636_000.0]], Some(-87.6));
        assert_eq!(guess.crs, "EPSG:32616");
        assert!(guess.is_known());
    }

    #[test]
    fn undetectable_coordinates_are_unknown() {
        let guess = detect_crs(&[[3.0e7, 3.0e7]], None);
        assert!(!guess.is_known());
        assert!(guess.confidence.abs() < f64::EPSILON);
        assert!(!detect_crs(&[], None).is_known());
    }

    #[test]
    fn utm_zone_for_longitude() {
        assert_eq!(utm_zone_for(-87.6), 16);
        assert_eq!(utm_zone_for(15.0), 33);
        assert_eq!(utm_zone_for(180.0), 60);
    }
}

//! Schema normalization.
//!
//! A [`Normalizer`] is built once per source from its definition and a
//! [`ProjectionRegistry`]; it then maps each raw provider record onto a
//! [`NormalizedParcel`] or explains why the record cannot be used.

use parcel_map_parcel_models::{NormalizedParcel, ParcelGeometry, Position, SkipReason};
use serde_json::Value;

use crate::SourceError;
use crate::crs::{Projection, ProjectionRegistry, canonical_code, detect_crs};
use crate::land_use::LandUseClassifier;
use crate::parsing::{DateFormat, parse_coordinate, parse_non_negative, parse_year};
use crate::source_def::{
    AreaUnit, FieldMapping, GeometryExtractor, MalformedDatePolicy, SourceDefinition,
};

/// Why a single record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// No identifier candidate held a value.
    #[error("record has no identifier")]
    MissingIdentity,
    /// No geometry could be located.
    #[error("record {id} has no geometry")]
    MissingGeometry {
        /// Record id.
        id: String,
    },
    /// Geometry was present but unusable.
    #[error("record {id} has malformed geometry: {message}")]
    MalformedGeometry {
        /// Record id.
        id: String,
        /// What was wrong.
        message: String,
    },
    /// The record names a coordinate system that is not registered.
    #[error("record {id} uses unregistered CRS {crs}")]
    UnregisteredCrs {
        /// Record id.
        id: String,
        /// The code as given.
        crs: String,
    },
    /// Auto-detection could not identify the coordinate system.
    #[error("record {id} has coordinates in an undetectable CRS")]
    UndetectedCrs {
        /// Record id.
        id: String,
    },
    /// A year field held unparseable text.
    #[error("record {id} has malformed date {value:?} in {field}")]
    MalformedDate {
        /// Record id.
        id: String,
        /// Raw field name.
        field: String,
        /// The offending value.
        value: String,
    },
}

impl NormalizeError {
    /// The run-report tally bucket for this failure.
    #[must_use]
    pub const fn reason(&self) -> SkipReason {
        match self {
            Self::MissingIdentity => SkipReason::MissingIdentity,
            Self::MissingGeometry { .. } => SkipReason::MissingGeometry,
            Self::MalformedGeometry { .. } => SkipReason::MalformedGeometry,
            Self::UnregisteredCrs { .. } => SkipReason::UnregisteredCrs,
            Self::UndetectedCrs { .. } => SkipReason::UndetectedCrs,
            Self::MalformedDate { .. } => SkipReason::MalformedDate,
        }
    }
}

/// A successfully normalized record plus anything worth tallying.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// The parcel.
    pub parcel: NormalizedParcel,
    /// Problems tolerated while normalizing (e.g. a malformed date kept as
    /// missing).
    pub notes: Vec<SkipReason>,
}

/// How a source's coordinates are brought to WGS84 when the record itself
/// names no CRS.
#[derive(Debug, Clone)]
enum SourceCrs {
    Declared(Projection),
    Detect { hint_lng: Option<f64> },
}

/// Per-source normalization configuration.
#[derive(Debug, Clone)]
pub struct Normalizer {
    fields: FieldMapping,
    city: Option<String>,
    area_unit: AreaUnit,
    date_format: DateFormat,
    malformed_dates: MalformedDatePolicy,
    classifier: LandUseClassifier,
    source_crs: SourceCrs,
    registry: ProjectionRegistry,
}

impl Normalizer {
    /// Builds the normalizer for `definition`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] if the source declares an
    /// unregistered CRS or a land-use pattern does not compile.
    pub fn new(
        definition: &SourceDefinition,
        registry: ProjectionRegistry,
    ) -> Result<Self, SourceError> {
        let source_crs = match &definition.crs {
            Some(code) => SourceCrs::Declared(*registry.resolve(code).ok_or_else(|| {
                SourceError::Config {
                    message: format!(
                        "{}: CRS {code} is not registered",
                        definition.id
                    ),
                }
            })?),
            None if definition.auto_detect_crs => SourceCrs::Detect {
                hint_lng: definition.crs_hint_lng,
            },
            None => SourceCrs::Declared(Projection::Geographic),
        };

        let classifier =
            LandUseClassifier::new(&definition.land_use_rules).map_err(|e| SourceError::Config {
                message: format!("{}: invalid land-use pattern: {e}", definition.id),
            })?;

        Ok(Self {
            fields: definition.fields.clone(),
            city: definition.city.clone(),
            area_unit: definition.area_unit,
            date_format: definition.date_format.clone(),
            malformed_dates: definition.malformed_dates,
            classifier,
            source_crs,
            registry,
        })
    }

    /// Normalizes one raw record.
    ///
    /// # Errors
    ///
    /// Returns [`NormalizeError`] if the record lacks an identity or usable
    /// geometry, uses an unregistered or undetectable CRS, or (under the
    /// `skip` policy) carries a malformed year.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn normalize(&self, raw: &Value) -> Result<Normalized, NormalizeError> {
        let fields = &self.fields;
        let mut notes = Vec::new();

        // ── Identity ─────────────────────────────────────────────────
        let id = first_present(raw, &fields.id)
            .and_then(|(_, v)| value_to_string(v))
            .ok_or(NormalizeError::MissingIdentity)?;

        // ── Geometry ─────────────────────────────────────────────────
        let geometry = self.extract_geometry(raw, &id)?;
        let geometry = self.reproject(raw, &id, &geometry)?;

        // ── Dates ────────────────────────────────────────────────────
        let year_built = self.year_field(raw, &id, &fields.year_built, &mut notes)?;
        let effective_year = self.year_field(raw, &id, &fields.effective_year, &mut notes)?;

        // ── Land use ─────────────────────────────────────────────────
        let land_use_raw = first_string(raw, &fields.land_use).unwrap_or_default();
        let land_use_category = self.classifier.classify(&land_use_raw);

        // ── Optional attributes ──────────────────────────────────────
        let address = first_string(raw, &fields.address);
        let city = first_string(raw, &fields.city).or_else(|| self.city.clone());
        let area_sqm = first_present(raw, &fields.area)
            .and_then(|(_, v)| parse_non_negative(v))
            .map(|area| self.area_unit.to_square_meters(area));
        let stories = first_present(raw, &fields.stories).and_then(|(_, v)| parse_non_negative(v));
        let units = first_present(raw, &fields.units)
            .and_then(|(_, v)| parse_non_negative(v))
            .and_then(|n| u32::try_from(n.round() as u64).ok());

        Ok(Normalized {
            parcel: NormalizedParcel {
                id,
                year_built,
                effective_year,
                land_use_raw,
                land_use_category,
                address,
                city,
                area_sqm,
                stories,
                units,
                geometry,
                raw: raw.clone(),
            },
            notes,
        })
    }

    fn extract_geometry(&self, raw: &Value, id: &str) -> Result<ParcelGeometry, NormalizeError> {
        match &self.fields.geometry {
            GeometryExtractor::Field { field } => {
                let value = lookup(raw, field)
                    .filter(|v| !v.is_null())
                    .ok_or_else(|| NormalizeError::MissingGeometry { id: id.to_string() })?;
                parse_geometry(value).map_err(|message| NormalizeError::MalformedGeometry {
                    id: id.to_string(),
                    message,
                })
            }
            GeometryExtractor::LatLng { lat, lng } => {
                let lat = first_present(raw, lat).map(|(_, v)| parse_coordinate(v));
                let lng = first_present(raw, lng).map(|(_, v)| parse_coordinate(v));
                match (lng, lat) {
                    (Some(Some(x)), Some(Some(y))) => Ok(ParcelGeometry::Point([x, y])),
                    (Some(_), Some(_)) => Err(NormalizeError::MalformedGeometry {
                        id: id.to_string(),
                        message: "coordinate is not a non-zero number".to_string(),
                    }),
                    _ => Err(NormalizeError::MissingGeometry { id: id.to_string() }),
                }
            }
        }
    }

    fn reproject(
        &self,
        raw: &Value,
        id: &str,
        geometry: &ParcelGeometry,
    ) -> Result<ParcelGeometry, NormalizeError> {
        let projection = if let Some((_, value)) = first_present(raw, &self.fields.crs)
            && let Some(code) = crs_code(value)
        {
            *self
                .registry
                .resolve(&code)
                .ok_or_else(|| NormalizeError::UnregisteredCrs {
                    id: id.to_string(),
                    crs: code,
                })?
        } else {
            match &self.source_crs {
                SourceCrs::Declared(projection) => *projection,
                SourceCrs::Detect { hint_lng } => {
                    let sample: Vec<Position> = geometry.positions().copied().collect();
                    let guess = detect_crs(&sample, *hint_lng);
                    *self
                        .registry
                        .resolve(&guess.crs)
                        .ok_or_else(|| NormalizeError::UndetectedCrs { id: id.to_string() })?
                }
            }
        };

        geometry.try_map_positions(|position| {
            projection
                .to_wgs84(position)
                .ok_or_else(|| NormalizeError::MalformedGeometry {
                    id: id.to_string(),
                    message: format!(
                        "({}, {}) is outside the valid range of its CRS",
                        position[0], position[1]
                    ),
                })
        })
    }

    fn year_field(
        &self,
        raw: &Value,
        id: &str,
        candidates: &[String],
        notes: &mut Vec<SkipReason>,
    ) -> Result<Option<i32>, NormalizeError> {
        let Some((field, value)) = first_present(raw, candidates) else {
            return Ok(None);
        };
        match parse_year(value, &self.date_format) {
            Ok(year) => Ok(year),
            Err(e) => match self.malformed_dates {
                MalformedDatePolicy::Skip => Err(NormalizeError::MalformedDate {
                    id: id.to_string(),
                    field: field.to_string(),
                    value: e.0,
                }),
                MalformedDatePolicy::TreatAsMissing => {
                    log::debug!("{id}: ignoring malformed {field} value {:?}", e.0);
                    notes.push(SkipReason::MalformedDate);
                    Ok(None)
                }
            },
        }
    }
}

// ── Field lookup ─────────────────────────────────────────────────────────

/// Looks `name` up at the top level, then under `properties`, then under
/// `attributes`.
fn lookup<'a>(record: &'a Value, name: &str) -> Option<&'a Value> {
    record
        .get(name)
        .or_else(|| record.get("properties")?.get(name))
        .or_else(|| record.get("attributes")?.get(name))
}

/// Whether a value counts as present: non-null, and non-blank if a string.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

/// The first candidate with a present value, with the name that matched.
fn first_present<'a, 'n>(record: &'a Value, candidates: &'n [String]) -> Option<(&'n str, &'a Value)> {
    candidates.iter().find_map(|name| {
        lookup(record, name)
            .filter(|v| is_present(v))
            .map(|v| (name.as_str(), v))
    })
}

fn first_string(record: &Value, candidates: &[String]) -> Option<String> {
    first_present(record, candidates).and_then(|(_, v)| value_to_string(v))
}

/// Stringifies strings (trimmed), numbers and booleans.
fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Reads a CRS code from a string, a bare EPSG number, or an Esri
/// `spatialReference` object (`latestWkid` preferred over `wkid`).
fn crs_code(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(canonical_code(s)),
        Value::Number(n) => Some(canonical_code(&n.to_string())),
        Value::Object(obj) => obj
            .get("latestWkid")
            .or_else(|| obj.get("wkid"))
            .and_then(Value::as_u64)
            .map(|wkid| canonical_code(&wkid.to_string())),
        _ => None,
    }
}

// ── Geometry parsing ─────────────────────────────────────────────────────

/// Parses a `GeoJSON` geometry or an Esri point/polygon object.
fn parse_geometry(value: &Value) -> Result<ParcelGeometry, String> {
    if let Some(kind) = value.get("type").and_then(Value::as_str) {
        let coordinates = value
            .get("coordinates")
            .ok_or_else(|| format!("{kind} without coordinates"))?;
        return match kind {
            "Point" => Ok(ParcelGeometry::Point(parse_position(coordinates)?)),
            "Polygon" => Ok(ParcelGeometry::Polygon(parse_polygon(coordinates)?)),
            "MultiPolygon" => {
                let polygons = as_array(coordinates)?
                    .iter()
                    .map(parse_polygon)
                    .collect::<Result<Vec<_>, _>>()?;
                if polygons.is_empty() {
                    return Err("empty MultiPolygon".to_string());
                }
                Ok(ParcelGeometry::MultiPolygon(polygons))
            }
            other => Err(format!("unsupported geometry type {other}")),
        };
    }

    if let (Some(x), Some(y)) = (value.get("x"), value.get("y")) {
        let position = [
            x.as_f64().ok_or("non-numeric x")?,
            y.as_f64().ok_or("non-numeric y")?,
        ];
        return finite(position).map(ParcelGeometry::Point);
    }

    if let Some(rings) = value.get("rings") {
        return parse_esri_rings(rings);
    }

    Err("unrecognized geometry object".to_string())
}

fn as_array(value: &Value) -> Result<&Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("expected array, got {value}"))
}

fn finite(position: Position) -> Result<Position, String> {
    if position.iter().all(|c| c.is_finite()) {
        Ok(position)
    } else {
        Err("non-finite coordinate".to_string())
    }
}

fn parse_position(value: &Value) -> Result<Position, String> {
    let coords = as_array(value)?;
    match (
        coords.first().and_then(Value::as_f64),
        coords.get(1).and_then(Value::as_f64),
    ) {
        (Some(x), Some(y)) => finite([x, y]),
        _ => Err(format!("invalid position {value}")),
    }
}

fn parse_ring(value: &Value) -> Result<Vec<Position>, String> {
    let ring = as_array(value)?
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>, _>>()?;
    if ring.len() < 3 {
        return Err(format!("ring with {} positions", ring.len()));
    }
    Ok(ring)
}

fn parse_polygon(value: &Value) -> Result<Vec<Vec<Position>>, String> {
    let rings = as_array(value)?
        .iter()
        .map(parse_ring)
        .collect::<Result<Vec<_>, _>>()?;
    if rings.is_empty() {
        return Err("polygon without rings".to_string());
    }
    Ok(rings)
}

/// Esri rings: clockwise rings are outer boundaries, counter-clockwise
/// rings are holes of the preceding outer ring.
fn parse_esri_rings(value: &Value) -> Result<ParcelGeometry, String> {
    let mut polygons: Vec<Vec<Vec<Position>>> = Vec::new();
    for ring in as_array(value)? {
        let ring = parse_ring(ring)?;
        let is_hole = signed_area(&ring) > 0.0;
        match polygons.last_mut() {
            Some(polygon) if is_hole => polygon.push(ring),
            _ => polygons.push(vec![ring]),
        }
    }
    match polygons.len() {
        0 => Err("Esri polygon without rings".to_string()),
        1 => Ok(ParcelGeometry::Polygon(polygons.remove(0))),
        _ => Ok(ParcelGeometry::MultiPolygon(polygons)),
    }
}

/// Shoelace signed area; positive for counter-clockwise rings.
fn signed_area(ring: &[Position]) -> f64 {
    ring.iter()
        .zip(ring.iter().cycle().skip(1))
        .map(|(a, b)| a[0].mul_add(b[1], -(b[0] * a[1])))
        .sum::<f64>()
        / 2.0
}

#[cfg(test)]
mod tests {
    use parcel_map_parcel_models::LandUseCategory;
    use serde_json::json;

    use super::*;
    use crate::source_def::parse_source_toml;

    fn definition(extra: &str) -> SourceDefinition {
        parse_source_toml(&format!(
            r#"
            id = "test"
            name = "Test"
            city = "Testville"
            {extra}

            [fetcher]
            type = "file"
            path = "x.geojson"

            [fields]
            id = ["PIN", "OBJECTID"]
            year_built = ["YEAR_BUILT"]
            land_use = ["USE"]
            area = ["AREA"]
            units = ["UNITS"]
            crs = ["CRS"]
            "#
        ))
        .unwrap()
    }

    fn normalizer(extra: &str) -> Normalizer {
        Normalizer::new(&definition(extra), ProjectionRegistry::standard()).unwrap()
    }

    fn feature(properties: &Value) -> Value {
        json!({
            "type": "Feature",
            "properties": properties,
            "geometry": {"type": "Point", "coordinates": [-87.6298, 41.8781]},
        })
    }

    #[test]
    fn normalizes_geojson_feature() {
        let n = normalizer("area_unit = \"sqft\"");
        let raw = feature(&json!({
            "PIN": " 17-10 ",
            "YEAR_BUILT": "1925",
            "USE": "Single Family",
            "AREA": 1000,
            "UNITS": "2",
        }));
        let out = n.normalize(&raw).unwrap();
        let parcel = out.parcel;
        assert_eq!(parcel.id, "17-10");
        assert_eq!(parcel.year_built, Some(1925));
        assert_eq!(parcel.land_use_category, LandUseCategory::SingleFamily);
        assert!((parcel.area_sqm.unwrap() - 92.903_04).abs() < 1e-9);
        assert_eq!(parcel.units, Some(2));
        assert_eq!(parcel.city.as_deref(), Some("Testville"));
        assert_eq!(parcel.geometry, ParcelGeometry::Point([-87.6298, 41.8781]));
        assert_eq!(parcel.raw, raw);
        assert!(out.notes.is_empty());
    }

    #[test]
    fn numeric_identifier_is_stringified_and_blank_candidates_skipped() {
        let n = normalizer("");
        let raw = feature(&json!({"PIN": "  ", "OBJECTID": 42}));
        assert_eq!(n.normalize(&raw).unwrap().parcel.id, "42");
    }

    #[test]
    fn fields_are_found_under_attributes() {
        let n = normalizer("");
        let raw = json!({
            "attributes": {"PIN": "A1", "USE": "Motel"},
            "geometry": {"x": -87.6, "y": 41.8},
        });
        let parcel = n.normalize(&raw).unwrap().parcel;
        assert_eq!(parcel.id, "A1");
        assert_eq!(parcel.land_use_category, LandUseCategory::Hotel);
        assert_eq!(parcel.geometry, ParcelGeometry::Point([-87.6, 41.8]));
    }

    #[test]
    fn missing_identity_and_geometry() {
        let n = normalizer("");
        let err = n.normalize(&feature(&json!({}))).unwrap_err();
        assert_eq!(err.reason(), SkipReason::MissingIdentity);

        let raw = json!({"properties": {"PIN": "1"}, "geometry": null});
        let err = n.normalize(&raw).unwrap_err();
        assert_eq!(err.reason(), SkipReason::MissingGeometry);
    }

    #[test]
    fn malformed_geometry() {
        let n = normalizer("");
        let raw = json!({
            "properties": {"PIN": "1"},
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 1.0]]]},
        });
        assert_eq!(
            n.normalize(&raw).unwrap_err().reason(),
            SkipReason::MalformedGeometry
        );
    }

    #[test]
    fn record_crs_overrides_source_crs() {
        let n = normalizer("crs = \"EPSG:4326\"");
        let mut raw = feature(&json!({"PIN": "1", "CRS": "EPSG:3857"}));
        raw["geometry"] = json!({"type": "Point", "coordinates": [0.0, 5_621_521.486_192_066]});
        let parcel = n.normalize(&raw).unwrap().parcel;
        let ParcelGeometry::Point([lng, lat]) = parcel.geometry else {
            panic!("expected point");
        };
        assert!(lng.abs() < 1e-9);
        assert!((lat - 45.0).abs() < 1e-6);
    }

    #[test]
    fn esri_spatial_reference_object_is_a_crs() {
        let n = normalizer("");
        let raw = json!({
            "attributes": {"PIN": "1", "CRS": {"wkid": 102100, "latestWkid": 3857}},
            "geometry": {"x": 0.0, "y": 0.0},
        });
        assert!(n.normalize(&raw).is_ok());
    }

    #[test]
    fn unregistered_record_crs_fails_only_that_record() {
        let n = normalizer("");
        let good = feature(&json!({"PIN": "1"}));
        let bad = feature(&json!({"PIN": "2", "CRS": "EPSG:999999"}));
        assert!(n.normalize(&good).is_ok());
        let err = n.normalize(&bad).unwrap_err();
        assert_eq!(err.reason(), SkipReason::UnregisteredCrs);
        assert!(n.normalize(&good).is_ok());
    }

    #[test]
    fn unregistered_source_crs_is_fatal() {
        let result = Normalizer::new(
            &definition("crs = \"EPSG:999999\""),
            ProjectionRegistry::standard(),
        );
        assert!(matches!(result, Err(SourceError::Config { .. })));
    }

    #[test]
    fn auto_detection_and_failure() {
        let n = normalizer("auto_detect_crs = true");
        let mut raw = feature(&json!({"PIN": "1"}));
        raw["geometry"] = json!({"type": "Point", "coordinates": [-9_754_904.0, 5_142_736.0]});
        let ParcelGeometry::Point([lng, _]) = n.normalize(&raw).unwrap().parcel.geometry else {
            panic!("expected point");
        };
        assert!((lng - -87.63).abs() < 0.01);

        raw["geometry"] = json!({"type": "Point", "coordinates": [3.0e7, 3.0e7]});
        assert_eq!(
            n.normalize(&raw).unwrap_err().reason(),
            SkipReason::UndetectedCrs
        );
    }

    #[test]
    fn malformed_date_policies() {
        let raw = feature(&json!({"PIN": "1", "YEAR_BUILT": "circa old"}));

        let skip = normalizer("");
        assert_eq!(
            skip.normalize(&raw).unwrap_err().reason(),
            SkipReason::MalformedDate
        );

        let lenient = normalizer("malformed_dates = \"treat_as_missing\"");
        let out = lenient.normalize(&raw).unwrap();
        assert_eq!(out.parcel.year_built, None);
        assert_eq!(out.notes, vec![SkipReason::MalformedDate]);
    }

    #[test]
    fn esri_rings_group_holes_with_outer_rings() {
        // Clockwise outer ring followed by a counter-clockwise hole, then a
        // second clockwise outer ring.
        let rings = json!([
            [[0.0, 0.0], [0.0, 4.0], [4.0, 4.0], [4.0, 0.0], [0.0, 0.0]],
            [[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0], [1.0, 1.0]],
            [[10.0, 10.0], [10.0, 11.0], [11.0, 11.0], [11.0, 10.0], [10.0, 10.0]],
        ]);
        let ParcelGeometry::MultiPolygon(polygons) = parse_esri_rings(&rings).unwrap() else {
            panic!("expected multipolygon");
        };
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].len(), 2);
        assert_eq!(polygons[1].len(), 1);
    }

    #[test]
    fn lat_lng_fields() {
        let def = parse_source_toml(
            r#"
            id = "points"
            name = "Points"
            [fetcher]
            type = "file"
            path = "x.csv"
            [fields]
            id = ["ID"]
            geometry = { type = "lat_lng", lat = ["LAT"], lng = ["LON", "LNG"] }
            "#,
        )
        .unwrap();
        let n = Normalizer::new(&def, ProjectionRegistry::standard()).unwrap();
        let parcel = n
            .normalize(&json!({"ID": 1, "LAT": "41.5", "LNG": -87.5}))
            .unwrap()
            .parcel;
        assert_eq!(parcel.geometry, ParcelGeometry::Point([-87.5, 41.5]));
        assert_eq!(parcel.land_use_category, LandUseCategory::Other);

        let err = n.normalize(&json!({"ID": 2, "LAT": "41.5"})).unwrap_err();
        assert_eq!(err.reason(), SkipReason::MissingGeometry);
        let err = n
            .normalize(&json!({"ID": 3, "LAT": "n/a", "LNG": -87.5}))
            .unwrap_err();
        assert_eq!(err.reason(), SkipReason::MalformedGeometry);
    }
}

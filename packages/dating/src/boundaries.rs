//! Dated boundary loading.
//!
//! A boundary's year comes from the first of these that yields a plausible
//! year:
//!
//! 1. the configured year property (a number or any supported date string),
//! 2. the first plausible four-digit run inside a document identifier,
//! 3. linear interpolation of a serial number between `(serial, year)`
//!    anchors, clamped to the first and last anchor.
//!
//! Features with no derivable year are skipped.

use std::path::Path;
use std::sync::LazyLock;

use parcel_map_parcel_models::is_plausible_year;
use parcel_map_source::parsing::{DateFormat, parse_year};
use parcel_map_source::source_def::BoundaryConfig;
use parcel_map_spatial::{Boundary, BoundarySet, read_boundary_features};
use regex::Regex;
use serde_json::Value;

use crate::DatingError;

static DIGIT_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4,}").expect("valid digit-run regex"));

/// Loads every configured boundary file into one [`BoundarySet`], keeping
/// configuration order and feature order within each file.
///
/// # Errors
///
/// Returns [`DatingError::Boundary`] if a file cannot be read or parsed.
pub fn load_boundary_set(configs: &[BoundaryConfig], base_dir: &Path) -> Result<BoundarySet, DatingError> {
    let mut boundaries = Vec::new();

    for config in configs {
        let path = base_dir.join(&config.path);
        let features = read_boundary_features(&path).map_err(|source| DatingError::Boundary {
            path: path.clone(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map_or_else(|| "boundary".to_string(), |s| s.to_string_lossy().into_owned());

        let total = features.len();
        let mut undated = 0usize;
        let mut degenerate = 0usize;
        for (i, feature) in features.into_iter().enumerate() {
            let Some(year) = boundary_year(&feature.properties, config) else {
                undated += 1;
                continue;
            };
            let name = config
                .name_field
                .as_deref()
                .and_then(|f| feature.properties.get(f))
                .and_then(value_text)
                .unwrap_or_else(|| format!("{stem}#{i}"));
            match Boundary::new(name, year, &feature.shape) {
                Ok(boundary) => boundaries.push(boundary),
                Err(e) => {
                    log::warn!("{}: feature {i} skipped: {e}", path.display());
                    degenerate += 1;
                }
            }
        }

        log::info!(
            "Loaded {} of {total} boundaries from {} ({undated} undated, {degenerate} degenerate)",
            total - undated - degenerate,
            path.display()
        );
    }

    Ok(BoundarySet::new(boundaries))
}

/// Derives a boundary's year from its properties.
#[must_use]
pub fn boundary_year(properties: &serde_json::Map<String, Value>, config: &BoundaryConfig) -> Option<i32> {
    let field = |name: Option<&str>| name.and_then(|f| properties.get(f));

    if let Some(year) = field(config.year_field.as_deref())
        .and_then(|v| parse_year(v, &DateFormat::Iso).ok().flatten())
    {
        return Some(year);
    }
    if let Some(year) = field(config.document_field.as_deref())
        .and_then(value_text)
        .and_then(|doc| document_year(&doc))
    {
        return Some(year);
    }
    field(config.serial_field.as_deref())
        .and_then(serial_number)
        .and_then(|serial| interpolate_serial(serial, &config.serial_anchors))
}

/// The first plausible year formed by four consecutive digits of `document`.
#[must_use]
pub fn document_year(document: &str) -> Option<i32> {
    DIGIT_RUN.find_iter(document).find_map(|run| {
        let digits = run.as_str().as_bytes();
        digits.windows(4).find_map(|w| {
            let year = std::str::from_utf8(w).ok()?.parse().ok()?;
            is_plausible_year(year).then_some(year)
        })
    })
}

/// Piecewise-linear year for `serial` between anchors sorted by serial,
/// clamped at both ends.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn interpolate_serial(serial: i64, anchors: &[(i64, i32)]) -> Option<i32> {
    let (first, last) = (anchors.first()?, anchors.last()?);
    if serial <= first.0 {
        return Some(first.1);
    }
    if serial >= last.0 {
        return Some(last.1);
    }
    anchors.windows(2).find_map(|w| {
        let ((s0, y0), (s1, y1)) = (w[0], w[1]);
        (s0..=s1).contains(&serial).then(|| {
            if s0 == s1 {
                return y0;
            }
            let t = (serial as f64 - s0 as f64) / (s1 as f64 - s0 as f64);
            (f64::from(y1) - f64::from(y0)).mul_add(t, f64::from(y0)).round() as i32
        })
    })
}

fn serial_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config() -> BoundaryConfig {
        BoundaryConfig {
            path: "wards.geojson".into(),
            name_field: Some("NAME".to_string()),
            year_field: Some("YEAR".to_string()),
            document_field: Some("DOC".to_string()),
            serial_field: Some("SERIAL".to_string()),
            serial_anchors: vec![(100, 1850), (200, 1900), (400, 1960)],
        }
    }

    fn props(value: &Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn year_field_wins() {
        let p = props(&json!({"YEAR": "1887-05-01", "DOC": "PLAT-1901", "SERIAL": 150}));
        assert_eq!(boundary_year(&p, &config()), Some(1887));
    }

    #[test]
    fn document_year_is_the_first_plausible_run() {
        assert_eq!(document_year("BK 0012 PG 1893-A"), Some(1893));
        assert_eq!(document_year("DOC18870412"), Some(1887));
        assert_eq!(document_year("no digits"), None);
        assert_eq!(document_year("0012-0099"), None);

        let p = props(&json!({"YEAR": null, "DOC": "ORD-1911-44"}));
        assert_eq!(boundary_year(&p, &config()), Some(1911));
    }

    #[test]
    fn serials_interpolate_between_anchors() {
        let anchors = config().serial_anchors;
        assert_eq!(interpolate_serial(150, &anchors), Some(1875));
        assert_eq!(interpolate_serial(300, &anchors), Some(1930));
        assert_eq!(interpolate_serial(200, &anchors), Some(1900));
        assert_eq!(interpolate_serial(1, &anchors), Some(1850));
        assert_eq!(interpolate_serial(9_999, &anchors), Some(1960));
        assert_eq!(interpolate_serial(5, &[]), None);
        assert_eq!(
            interpolate_serial(0, &[(i64::MIN, 1800), (i64::MAX, 2000)]),
            Some(1900)
        );
        assert_eq!(
            interpolate_serial(150, &[(100, 1850), (150, 1860), (150, 1870), (200, 1900)]),
            Some(1860)
        );

        let p = props(&json!({"SERIAL": "No. 300"}));
        assert_eq!(boundary_year(&p, &config()), Some(1930));
    }

    #[test]
    fn undatable_features_have_no_year() {
        let p = props(&json!({"NAME": "Ward 9"}));
        assert_eq!(boundary_year(&p, &config()), None);
    }

    #[test]
    fn loads_files_in_configuration_order() {
        let dir = std::env::temp_dir().join(format!("parcel_map_boundaries_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let square = "[[[0,0],[10,0],[10,10],[0,10],[0,0]]]";
        std::fs::write(
            dir.join("early.geojson"),
            format!(
                r#"{{"type":"FeatureCollection","features":[
                    {{"type":"Feature","properties":{{"NAME":"Old Ward","YEAR":1850}},
                      "geometry":{{"type":"Polygon","coordinates":{square}}}}},
                    {{"type":"Feature","properties":{{"NAME":"Undated"}},
                      "geometry":{{"type":"Polygon","coordinates":{square}}}}}
                ]}}"#
            ),
        )
        .unwrap();
        std::fs::write(
            dir.join("late.geojson"),
            format!(
                r#"{{"type":"Feature","properties":{{"YEAR":1950}},
                    "geometry":{{"type":"Polygon","coordinates":{square}}}}}"#
            ),
        )
        .unwrap();

        let configs = vec![
            BoundaryConfig {
                path: "early.geojson".into(),
                ..config()
            },
            BoundaryConfig {
                path: "late.geojson".into(),
                ..config()
            },
        ];
        let set = load_boundary_set(&configs, &dir).unwrap();
        let missing = load_boundary_set(
            &[BoundaryConfig {
                path: "missing.geojson".into(),
                ..config()
            }],
            &dir,
        );
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(set.len(), 2);
        let names: Vec<&str> = set.iter().map(Boundary::name).collect();
        assert_eq!(names, vec!["Old Ward", "late#0"]);
        assert_eq!(set.containing(5.0, 5.0).map(Boundary::year), Some(1850));
        assert!(matches!(missing, Err(DatingError::Boundary { .. })));
    }
}

//! Per-source `DuckDB` parcel cache.
//!
//! Each source gets its own `DuckDB` file at
//! `data/sources/{source_id}.duckdb`. The file contains a `parcels` table
//! keyed by `(source_id, record_id)` and a `source_metadata` table with one
//! row per source, written only after a successful full run.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr as _;

use duckdb::Connection;
use parcel_map_parcel_models::{DateEvidence, DateMethod, NormalizedParcel, SourceMetadata};

use crate::DbError;

/// Number of rows per INSERT chunk (`DuckDB` handles large batches well).
const CHUNK_SIZE: usize = 2_000;

/// Columns bound per parcel row.
const PARCEL_COLUMNS: usize = 9;

/// A normalized parcel together with the year evidence assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedParcel {
    pub parcel: NormalizedParcel,
    pub evidence: Option<DateEvidence>,
}

/// Opens (or creates) a per-source `DuckDB` database and ensures the
/// schema exists.
///
/// # Errors
///
/// Returns [`DbError`] if the connection or schema creation fails.
pub fn open(path: &Path) -> Result<Connection, DbError> {
    if let Some(parent) = path.parent() {
        crate::paths::ensure_dir(parent)?;
    }

    let conn = Connection::open(path)?;

    conn.execute_batch(
        "SET threads = 4;
         SET memory_limit = '512MB';",
    )?;

    create_schema(&conn)?;

    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS parcels (
            source_id TEXT NOT NULL,
            record_id TEXT NOT NULL,
            land_use_category TEXT NOT NULL,
            resolved_year INTEGER,
            date_method TEXT,
            estimated BOOLEAN,
            longitude DOUBLE,
            latitude DOUBLE,
            parcel_json TEXT NOT NULL,
            PRIMARY KEY (source_id, record_id)
        );

        CREATE TABLE IF NOT EXISTS source_metadata (
            source_id TEXT PRIMARY KEY,
            change_token TEXT,
            last_fetched TEXT NOT NULL,
            record_count BIGINT NOT NULL
        );",
    )?;

    Ok(())
}

/// Upserts a batch of parcels for `source_id`.
///
/// Within the batch the last occurrence of each record id wins. Returns the
/// number of rows written.
///
/// # Errors
///
/// Returns [`DbError`] if serialization or any database operation fails.
pub fn upsert_parcels(conn: &Connection, source_id: &str, parcels: &[CachedParcel]) -> Result<u64, DbError> {
    if parcels.is_empty() {
        return Ok(0);
    }

    // Deduplicate within the batch: keep last occurrence of each record id
    let mut last_seen: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, cached) in parcels.iter().enumerate() {
        last_seen.insert(&cached.parcel.id, i);
    }
    let deduped: Vec<&CachedParcel> = parcels
        .iter()
        .enumerate()
        .filter(|(i, cached)| last_seen.get(cached.parcel.id.as_str()) == Some(i))
        .map(|(_, cached)| cached)
        .collect();

    if deduped.len() < parcels.len() {
        log::info!(
            "[{source_id}] deduplicated upsert batch: {} -> {} rows ({} duplicates removed)",
            parcels.len(),
            deduped.len(),
            parcels.len() - deduped.len(),
        );
    }

    let mut total = 0u64;

    for chunk in deduped.chunks(CHUNK_SIZE) {
        let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
        let sql = format!(
            "INSERT INTO parcels (
                source_id, record_id, land_use_category, resolved_year, date_method,
                estimated, longitude, latitude, parcel_json
            ) VALUES {placeholders}
            ON CONFLICT (source_id, record_id) DO UPDATE SET
                land_use_category = EXCLUDED.land_use_category,
                resolved_year = EXCLUDED.resolved_year,
                date_method = EXCLUDED.date_method,
                estimated = EXCLUDED.estimated,
                longitude = EXCLUDED.longitude,
                latitude = EXCLUDED.latitude,
                parcel_json = EXCLUDED.parcel_json"
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut param_idx = 1usize;

        for cached in chunk {
            let parcel = &cached.parcel;
            let point = parcel.geometry.representative_point();
            let json = serde_json::to_string(parcel)?;

            stmt.raw_bind_parameter(param_idx, source_id)?;
            stmt.raw_bind_parameter(param_idx + 1, &parcel.id)?;
            stmt.raw_bind_parameter(param_idx + 2, parcel.land_use_category.as_ref())?;
            stmt.raw_bind_parameter(param_idx + 3, cached.evidence.map(|e| e.year))?;
            stmt.raw_bind_parameter(param_idx + 4, cached.evidence.map(|e| e.method.as_ref().to_string()))?;
            stmt.raw_bind_parameter(param_idx + 5, cached.evidence.map(|e| e.is_estimated()))?;
            stmt.raw_bind_parameter(param_idx + 6, point.map(|p| p[0]))?;
            stmt.raw_bind_parameter(param_idx + 7, point.map(|p| p[1]))?;
            stmt.raw_bind_parameter(param_idx + 8, json)?;

            param_idx += PARCEL_COLUMNS;
        }

        let rows = stmt.raw_execute()?;
        total += u64::try_from(rows).unwrap_or(0);
    }

    Ok(total)
}

/// Returns the number of parcels stored for `source_id`.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn parcel_count(conn: &Connection, source_id: &str) -> Result<u64, DbError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM parcels WHERE source_id = ?",
        [source_id],
        |row| row.get(0),
    )?;
    u64::try_from(count).map_err(|e| DbError::Conversion {
        message: format!("negative parcel count {count}: {e}"),
    })
}

/// Loads one cached parcel.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails or the stored row is corrupt.
pub fn get_parcel(conn: &Connection, source_id: &str, record_id: &str) -> Result<Option<CachedParcel>, DbError> {
    let row = conn.query_row(
        "SELECT parcel_json, resolved_year, date_method FROM parcels WHERE source_id = ? AND record_id = ?",
        [source_id, record_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<i32>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        },
    );
    let (json, year, method) = match row {
        Ok(v) => v,
        Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(DbError::DuckDb(e)),
    };

    let evidence = match (year, method) {
        (Some(year), Some(method)) => {
            let method = DateMethod::from_str(&method).map_err(|e| DbError::Conversion {
                message: format!("unknown date method {method:?}: {e}"),
            })?;
            Some(DateEvidence::new(year, method))
        }
        _ => None,
    };

    Ok(Some(CachedParcel {
        parcel: serde_json::from_str(&json)?,
        evidence,
    }))
}

/// Returns the stored metadata for `source_id`, if a run has completed.
///
/// # Errors
///
/// Returns [`DbError`] if the query fails.
pub fn get_metadata(conn: &Connection, source_id: &str) -> Result<Option<SourceMetadata>, DbError> {
    let result = conn.query_row(
        "SELECT change_token, last_fetched, record_count FROM source_metadata WHERE source_id = ?",
        [source_id],
        |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        },
    );
    match result {
        Ok((change_token, last_fetched, record_count)) => Ok(Some(SourceMetadata {
            source_id: source_id.to_string(),
            change_token,
            last_fetched,
            record_count: u64::try_from(record_count).unwrap_or(0),
        })),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

/// Upserts the metadata row for `metadata.source_id`.
///
/// # Errors
///
/// Returns [`DbError`] if the upsert fails.
pub fn put_metadata(conn: &Connection, metadata: &SourceMetadata) -> Result<(), DbError> {
    let record_count = i64::try_from(metadata.record_count).map_err(|e| DbError::Conversion {
        message: format!("record count {} out of range: {e}", metadata.record_count),
    })?;
    conn.execute(
        "INSERT INTO source_metadata (source_id, change_token, last_fetched, record_count)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (source_id) DO UPDATE SET
            change_token = EXCLUDED.change_token,
            last_fetched = EXCLUDED.last_fetched,
            record_count = EXCLUDED.record_count",
        duckdb::params![
            metadata.source_id,
            metadata.change_token,
            metadata.last_fetched,
            record_count
        ],
    )?;
    Ok(())
}

/// Hours elapsed since an RFC 3339 `last_fetched` timestamp, or `None` if
/// it cannot be parsed.
#[must_use]
pub fn hours_since(last_fetched: &str) -> Option<i64> {
    let then = chrono::DateTime::parse_from_rfc3339(last_fetched).ok()?;
    Some((chrono::Utc::now() - then.with_timezone(&chrono::Utc)).num_hours())
}

/// Discovers all source `DuckDB` files in `dir`.
///
/// Returns a sorted list of source IDs (derived from filenames).
#[must_use]
pub fn discover_source_ids(dir: &Path) -> Vec<String> {
    let mut ids = Vec::new();

    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("duckdb")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                ids.push(stem.to_string());
            }
        }
    }

    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use parcel_map_parcel_models::{LandUseCategory, ParcelGeometry};

    use super::*;

    fn temp_db(name: &str) -> (PathBuf, Connection) {
        let dir = std::env::temp_dir().join(format!("parcel_map_db_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let conn = open(&dir.join("sources").join("test.duckdb")).unwrap();
        (dir, conn)
    }

    fn cached(id: &str, land_use: &str, evidence: Option<DateEvidence>) -> CachedParcel {
        CachedParcel {
            parcel: NormalizedParcel {
                id: id.to_string(),
                year_built: evidence.filter(|e| !e.is_estimated()).map(|e| e.year),
                effective_year: None,
                land_use_raw: land_use.to_string(),
                land_use_category: LandUseCategory::Retail,
                address: Some("1 Main St".to_string()),
                city: None,
                area_sqm: Some(120.5),
                stories: None,
                units: Some(2),
                geometry: ParcelGeometry::Point([-73.98, 40.75]),
                raw: serde_json::json!({"PIN": id}),
            },
            evidence,
        }
    }

    #[test]
    fn upsert_keeps_last_duplicate_and_overwrites() {
        let (dir, conn) = temp_db("upsert");

        let written = upsert_parcels(
            &conn,
            "test",
            &[
                cached("a", "first", Some(DateEvidence::exact(1901))),
                cached("b", "only", None),
                cached("a", "second", Some(DateEvidence::new(1950, DateMethod::CategoryMedian))),
            ],
        )
        .unwrap();
        assert_eq!(written, 2);
        assert_eq!(parcel_count(&conn, "test").unwrap(), 2);

        let a = get_parcel(&conn, "test", "a").unwrap().unwrap();
        assert_eq!(a.parcel.land_use_raw, "second");
        assert_eq!(a.evidence, Some(DateEvidence::new(1950, DateMethod::CategoryMedian)));

        upsert_parcels(&conn, "test", &[cached("b", "updated", Some(DateEvidence::exact(1930)))]).unwrap();
        let b = get_parcel(&conn, "test", "b").unwrap().unwrap();
        assert_eq!(b.parcel.land_use_raw, "updated");
        assert_eq!(b.parcel.geometry, ParcelGeometry::Point([-73.98, 40.75]));
        assert_eq!(parcel_count(&conn, "test").unwrap(), 2);
        assert!(get_parcel(&conn, "test", "zzz").unwrap().is_none());
        assert_eq!(parcel_count(&conn, "other").unwrap(), 0);

        drop(conn);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn metadata_round_trips_and_overwrites() {
        let (dir, conn) = temp_db("meta");
        assert!(get_metadata(&conn, "test").unwrap().is_none());

        let mut metadata = SourceMetadata {
            source_id: "test".to_string(),
            change_token: Some("1700000000000".to_string()),
            last_fetched: chrono::Utc::now().to_rfc3339(),
            record_count: 42,
        };
        put_metadata(&conn, &metadata).unwrap();
        assert_eq!(get_metadata(&conn, "test").unwrap().as_ref(), Some(&metadata));

        metadata.change_token = None;
        metadata.record_count = 7;
        put_metadata(&conn, &metadata).unwrap();
        assert_eq!(get_metadata(&conn, "test").unwrap(), Some(metadata));

        drop(conn);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn uncommitted_transaction_leaves_no_rows() {
        let (dir, mut conn) = temp_db("tx");
        {
            let tx = conn.transaction().unwrap();
            upsert_parcels(&tx, "test", &[cached("a", "x", None)]).unwrap();
            put_metadata(
                &tx,
                &SourceMetadata {
                    source_id: "test".to_string(),
                    change_token: None,
                    last_fetched: chrono::Utc::now().to_rfc3339(),
                    record_count: 1,
                },
            )
            .unwrap();
        }
        assert_eq!(parcel_count(&conn, "test").unwrap(), 0);
        assert!(get_metadata(&conn, "test").unwrap().is_none());

        drop(conn);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn hours_since_parses_rfc3339() {
        let two_hours_ago = (chrono::Utc::now() - chrono::Duration::hours(2)).to_rfc3339();
        assert_eq!(hours_since(&two_hours_ago), Some(2));
        assert_eq!(hours_since("yesterday"), None);
    }

    #[test]
    fn discovers_source_files() {
        let dir = std::env::temp_dir().join(format!("parcel_map_discover_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("b.duckdb"), b"").unwrap();
        std::fs::write(dir.join("a.duckdb"), b"").unwrap();
        std::fs::write(dir.join("notes.txt"), b"").unwrap();
        let ids = discover_source_ids(&dir);
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

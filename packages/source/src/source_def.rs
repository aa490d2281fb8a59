//! Config-driven parcel source definition.
//!
//! [`SourceDefinition`] captures everything unique about a provider dataset
//! in a serializable config struct: where the records come from, how the
//! provider spells each canonical field, which dialect its dates, areas and
//! coordinates use, and how the resulting parcels are dated and clustered.
//! One generic pipeline handles every source.

use std::path::PathBuf;

use serde::Deserialize;

use crate::SourceError;
use crate::land_use::LandUseRule;
use crate::parsing::DateFormat;

// ── Top-level source definition ──────────────────────────────────────────

/// A complete, config-driven parcel source definition.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceDefinition {
    /// Unique identifier (e.g., `"springfield_parcels"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// City assigned to parcels whose record carries none.
    #[serde(default)]
    pub city: Option<String>,
    /// Unit of the raw area field.
    #[serde(default)]
    pub area_unit: AreaUnit,
    /// Declared date dialect of the year fields.
    #[serde(default)]
    pub date_format: DateFormat,
    /// Declared coordinate system. `None` means WGS84 unless
    /// [`Self::auto_detect_crs`] is set.
    #[serde(default)]
    pub crs: Option<String>,
    /// Guess the coordinate system from coordinate magnitudes when
    /// [`Self::crs`] is absent.
    #[serde(default)]
    pub auto_detect_crs: bool,
    /// Longitude near the dataset, used to pick a UTM zone during
    /// auto-detection.
    #[serde(default)]
    pub crs_hint_lng: Option<f64>,
    /// What to do with a record whose year field cannot be parsed.
    #[serde(default)]
    pub malformed_dates: MalformedDatePolicy,
    /// Without a provider change token, re-fetch only after this many hours.
    #[serde(default)]
    pub refresh_after_hours: Option<u64>,
    /// How to fetch raw pages.
    pub fetcher: FetcherConfig,
    /// Concurrency, retry and pacing for the fetch phase.
    #[serde(default)]
    pub fetch: FetchPolicy,
    /// Field name mappings for normalization.
    pub fields: FieldMapping,
    /// Land-use rules replacing the built-in table, in evaluation order.
    #[serde(default)]
    pub land_use_rules: Vec<LandUseRule>,
    /// Clustering parameters for the aggregated layer.
    #[serde(default)]
    pub clustering: ClusterConfig,
    /// Evidence available to the date waterfall.
    #[serde(default)]
    pub dating: DatingConfig,
}

impl SourceDefinition {
    /// Returns the unique source identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the human-readable source name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured page size for this source's fetcher.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        match &self.fetcher {
            FetcherConfig::Arcgis { page_size, .. } | FetcherConfig::File { page_size, .. } => {
                *page_size
            }
        }
    }

    /// Checks constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Config`] describing the first violation.
    pub fn validate(&self) -> Result<(), SourceError> {
        let fail = |message: String| Err(SourceError::Config { message });

        if self.id.trim().is_empty() {
            return fail("source id is empty".to_string());
        }
        if self.fields.id.is_empty() {
            return fail(format!("{}: no id fields", self.id));
        }
        if self.page_size() == 0 {
            return fail(format!("{}: page_size must be positive", self.id));
        }
        if self.fetch.workers == 0 {
            return fail(format!("{}: fetch.workers must be positive", self.id));
        }
        if self.fetch.max_attempts == 0 {
            return fail(format!("{}: fetch.max_attempts must be positive", self.id));
        }
        if !(self.clustering.grid_size.is_finite() && self.clustering.grid_size > 0.0) {
            return fail(format!("{}: clustering.grid_size must be positive", self.id));
        }
        if let GeometryExtractor::LatLng { lat, lng } = &self.fields.geometry
            && (lat.is_empty() || lng.is_empty())
        {
            return fail(format!("{}: lat_lng geometry needs both field lists", self.id));
        }
        for boundary in &self.dating.boundaries {
            if boundary.serial_anchors.windows(2).any(|w| w[0].0 >= w[1].0) {
                return fail(format!(
                    "{}: serial anchors for {} must be strictly increasing",
                    self.id,
                    boundary.path.display()
                ));
            }
        }
        if let Some(DistanceModelConfig::ConcentricRings { centers, rings, .. }) =
            &self.dating.distance_model
        {
            if centers.is_empty() || rings.is_empty() {
                return fail(format!(
                    "{}: concentric rings need at least one center and one ring",
                    self.id
                ));
            }
            if rings.iter().any(|r| r.years.0 > r.years.1) {
                return fail(format!("{}: ring year ranges must be ascending", self.id));
            }
        }
        Ok(())
    }
}

// ── Fetcher config ───────────────────────────────────────────────────────

/// Where raw records come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetcherConfig {
    /// `ArcGIS` REST feature layer (`resultOffset`/`resultRecordCount`).
    Arcgis {
        /// Layer query URL ending in `/query`.
        query_url: String,
        /// Records per page. Must not exceed the layer's `maxRecordCount`.
        page_size: u64,
        /// Optional WHERE clause. Defaults to `1=1`.
        #[serde(default)]
        where_clause: Option<String>,
    },
    /// A local `GeoJSON`, Esri JSON, JSON array or NDJSON file.
    File {
        /// Path to the file, relative paths resolved against the data
        /// directory.
        path: PathBuf,
        /// Records per page.
        #[serde(default = "default_file_page_size")]
        page_size: u64,
    },
}

const fn default_file_page_size() -> u64 {
    5_000
}

/// What the fetch phase does when a page fails after all retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageFailurePolicy {
    /// Abort the run; nothing is committed.
    #[default]
    Abort,
    /// Skip the page, tally it, and carry on.
    TolerateGap,
}

/// Concurrency, retry and pacing parameters for the fetch phase.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchPolicy {
    /// Pages fetched concurrently per wave when the total is known.
    pub workers: usize,
    /// Attempts per page, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub base_delay_ms: u64,
    /// Upper bound on a single retry delay.
    pub max_delay_ms: u64,
    /// Pause after every N pages. `None` pauses after every page (or wave)
    /// whenever [`Self::pause_ms`] is non-zero.
    pub pause_every_pages: Option<u64>,
    /// Length of the pause.
    pub pause_ms: u64,
    /// What to do with a page that exhausted its attempts.
    pub on_page_failure: PageFailurePolicy,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            workers: 4,
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            pause_every_pages: None,
            pause_ms: 0,
            on_page_failure: PageFailurePolicy::Abort,
        }
    }
}

// ── Field mapping ────────────────────────────────────────────────────────

/// Maps provider field names to canonical parcel fields.
///
/// Every entry is a candidate list: the first name whose value is present,
/// non-null and non-empty wins. Names are looked up at the record's top
/// level, then under `properties`, then under `attributes`.
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    /// Record identity.
    pub id: Vec<String>,
    /// Construction year or date.
    #[serde(default)]
    pub year_built: Vec<String>,
    /// Renovation or effective year.
    #[serde(default)]
    pub effective_year: Vec<String>,
    /// Land-use description.
    #[serde(default)]
    pub land_use: Vec<String>,
    /// Site address.
    #[serde(default)]
    pub address: Vec<String>,
    /// City name.
    #[serde(default)]
    pub city: Vec<String>,
    /// Area in [`SourceDefinition::area_unit`].
    #[serde(default)]
    pub area: Vec<String>,
    /// Number of stories.
    #[serde(default)]
    pub stories: Vec<String>,
    /// Number of units.
    #[serde(default)]
    pub units: Vec<String>,
    /// Per-record CRS code, overriding the source CRS.
    #[serde(default)]
    pub crs: Vec<String>,
    /// How to build the geometry.
    #[serde(default)]
    pub geometry: GeometryExtractor,
}

/// How to extract a geometry from a raw record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryExtractor {
    /// A `GeoJSON` geometry object or an Esri `{x, y}` / `{rings}` object.
    Field {
        /// Field holding the geometry.
        field: String,
    },
    /// Separate latitude and longitude fields forming a point.
    LatLng {
        /// Latitude (or northing) candidates.
        lat: Vec<String>,
        /// Longitude (or easting) candidates.
        lng: Vec<String>,
    },
}

impl Default for GeometryExtractor {
    fn default() -> Self {
        Self::Field {
            field: "geometry".to_string(),
        }
    }
}

/// Unit of a raw area value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    /// Square feet.
    Sqft,
    /// Square meters.
    #[default]
    Sqm,
    /// International acres.
    Acres,
    /// Hectares.
    Hectares,
}

impl AreaUnit {
    /// Square meters per unit.
    #[must_use]
    pub const fn square_meters(self) -> f64 {
        match self {
            Self::Sqft => 0.092_903_04,
            Self::Sqm => 1.0,
            Self::Acres => 4_046.856_422_4,
            Self::Hectares => 10_000.0,
        }
    }

    /// Converts `value` in this unit to square meters.
    #[must_use]
    pub fn to_square_meters(self, value: f64) -> f64 {
        value * self.square_meters()
    }
}

/// Handling of year fields that hold unparseable text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedDatePolicy {
    /// Exclude the record.
    #[default]
    Skip,
    /// Keep the record with no year and report a note.
    TreatAsMissing,
}

// ── Clustering ───────────────────────────────────────────────────────────

/// Parameters for the aggregated layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Grid cell size in degrees.
    pub grid_size: f64,
    /// How parcels are grouped into blocks before gridding.
    pub block: BlockKey,
    /// Quantity summed per cluster.
    pub measure: ClusterMeasure,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            grid_size: 0.001,
            block: BlockKey::None,
            measure: ClusterMeasure::Count,
        }
    }
}

/// Derives a block identifier from a parcel id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKey {
    /// Every parcel shares one block.
    #[default]
    None,
    /// The first `chars` characters of the id.
    Prefix {
        /// Number of leading characters.
        chars: usize,
    },
    /// The first `count` segments of the id split on `delimiter`.
    Segments {
        /// Segment separator.
        delimiter: String,
        /// Number of leading segments.
        count: usize,
    },
}

impl BlockKey {
    /// Block identifier for `parcel_id`.
    #[must_use]
    pub fn block_of(&self, parcel_id: &str) -> String {
        match self {
            Self::None => String::new(),
            Self::Prefix { chars } => parcel_id.chars().take(*chars).collect(),
            Self::Segments { delimiter, count } => parcel_id
                .split(delimiter.as_str())
                .take(*count)
                .collect::<Vec<_>>()
                .join(delimiter),
        }
    }
}

/// Quantity accumulated per cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMeasure {
    /// Sum of `area_sqm`.
    Area,
    /// Sum of `units`.
    Units,
    /// Number of parcels.
    #[default]
    Count,
}

// ── Dating ───────────────────────────────────────────────────────────────

/// Evidence sources for the date waterfall.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatingConfig {
    /// CSV of `id,year` rows with authoritative years.
    pub lookup: Option<PathBuf>,
    /// Dated historical boundaries, in tie-break order.
    pub boundaries: Vec<BoundaryConfig>,
    /// Distance-based year model.
    pub distance_model: Option<DistanceModelConfig>,
}

/// One boundary file and how to date its features.
#[derive(Debug, Clone, Deserialize)]
pub struct BoundaryConfig {
    /// `GeoJSON` file of polygon features.
    pub path: PathBuf,
    /// Property naming the boundary.
    #[serde(default)]
    pub name_field: Option<String>,
    /// Property holding a year or date.
    #[serde(default)]
    pub year_field: Option<String>,
    /// Property holding a document identifier with an embedded year.
    #[serde(default)]
    pub document_field: Option<String>,
    /// Property holding a serial number to interpolate.
    #[serde(default)]
    pub serial_field: Option<String>,
    /// `(serial, year)` anchors, strictly increasing by serial.
    #[serde(default)]
    pub serial_anchors: Vec<(i64, i32)>,
}

/// A distance model strategy and its parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DistanceModelConfig {
    /// Year ranges by distance bands around historic centers.
    ConcentricRings {
        /// Historic centers; the nearest one is used.
        centers: Vec<HistoricCenter>,
        /// Bands ordered by increasing outer radius.
        rings: Vec<RingConfig>,
        /// How a year is chosen inside a band's range.
        #[serde(default)]
        sampling: RingSampling,
    },
}

/// A historic town center.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoricCenter {
    /// Display name.
    pub name: String,
    /// Longitude.
    pub lng: f64,
    /// Latitude.
    pub lat: f64,
}

/// A distance band around a center.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RingConfig {
    /// Outer radius in kilometers.
    pub max_km: f64,
    /// Inclusive `(earliest, latest)` year range.
    pub years: (i32, i32),
}

/// How a year is picked inside a ring's range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingSampling {
    /// Linear in the distance across the band.
    #[default]
    Interpolate,
    /// A stable hash of the parcel id.
    Hash,
}

/// Parses a [`SourceDefinition`] from a TOML string and validates it.
///
/// # Errors
///
/// Returns [`SourceError`] if the TOML is malformed, missing required
/// fields, or violates a constraint checked by
/// [`SourceDefinition::validate`].
pub fn parse_source_toml(toml_str: &str) -> Result<SourceDefinition, SourceError> {
    let definition: SourceDefinition = toml::de::from_str(toml_str)?;
    definition.validate()?;
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use parcel_map_parcel_models::LandUseCategory;

    use super::*;

    const MINIMAL: &str = r#"
        id = "test"
        name = "Test"

        [fetcher]
        type = "file"
        path = "raw/test.geojson"

        [fields]
        id = ["PIN"]
    "#;

    #[test]
    fn minimal_definition_uses_defaults() {
        let def = parse_source_toml(MINIMAL).unwrap();
        assert_eq!(def.area_unit, AreaUnit::Sqm);
        assert_eq!(def.date_format, DateFormat::Iso);
        assert_eq!(def.malformed_dates, MalformedDatePolicy::Skip);
        assert_eq!(def.page_size(), 5_000);
        assert_eq!(def.fetch.workers, 4);
        assert_eq!(def.fetch.on_page_failure, PageFailurePolicy::Abort);
        assert_eq!(def.fields.geometry, GeometryExtractor::default());
        assert!(def.land_use_rules.is_empty());
        assert!(def.crs.is_none());
    }

    #[test]
    fn parses_full_definition() {
        let toml = r#"
            id = "full"
            name = "Full"
            city = "Springfield"
            area_unit = "sqft"
            date_format = { custom = "%d-%b-%Y" }
            crs = "EPSG:2263"
            malformed_dates = "treat_as_missing"
            refresh_after_hours = 24

            [fetcher]
            type = "arcgis"
            query_url = "https://example.invalid/FeatureServer/0/query"
            page_size = 2000

            [fetch]
            workers = 2
            on_page_failure = "tolerate_gap"
            pause_every_pages = 10
            pause_ms = 250

            [fields]
            id = ["PIN", "OBJECTID"]
            year_built = ["YR_BUILT"]
            land_use = ["LAND_USE"]
            geometry = { type = "lat_lng", lat = ["LAT"], lng = ["LON"] }

            [[land_use_rules]]
            category = "retail"
            patterns = ["^R"]

            [clustering]
            grid_size = 0.002
            block = { type = "segments", delimiter = "-", count = 2 }
            measure = "area"

            [dating]
            lookup = "lookups/full.csv"

            [[dating.boundaries]]
            path = "boundaries/subdivisions.geojson"
            document_field = "PLAT_DOC"
            serial_field = "PLAT_NO"
            serial_anchors = [[1, 1850], [900, 1960]]

            [dating.distance_model]
            type = "concentric_rings"
            sampling = "hash"
            centers = [{ name = "Old Town", lng = -89.65, lat = 39.8 }]
            rings = [{ max_km = 1.0, years = [1840, 1880] }, { max_km = 5.0, years = [1880, 1950] }]
        "#;
        let def = parse_source_toml(toml).unwrap();
        assert_eq!(def.area_unit, AreaUnit::Sqft);
        assert_eq!(def.date_format, DateFormat::Custom("%d-%b-%Y".to_string()));
        assert_eq!(def.malformed_dates, MalformedDatePolicy::TreatAsMissing);
        assert_eq!(def.page_size(), 2000);
        assert_eq!(def.fetch.on_page_failure, PageFailurePolicy::TolerateGap);
        assert_eq!(def.fetch.max_attempts, 5);
        assert_eq!(def.land_use_rules[0].category, LandUseCategory::Retail);
        assert_eq!(def.clustering.measure, ClusterMeasure::Area);
        assert_eq!(def.dating.boundaries[0].serial_anchors, vec![(1, 1850), (900, 1960)]);
        let Some(DistanceModelConfig::ConcentricRings { rings, sampling, .. }) =
            &def.dating.distance_model
        else {
            panic!("expected concentric rings");
        };
        assert_eq!(rings.len(), 2);
        assert_eq!(*sampling, RingSampling::Hash);
    }

    #[test]
    fn rejects_unordered_anchors() {
        let toml = format!(
            "{MINIMAL}\n[[dating.boundaries]]\npath = \"b.geojson\"\nserial_anchors = [[5, 1900], [5, 1910]]\n"
        );
        assert!(matches!(
            parse_source_toml(&toml),
            Err(SourceError::Config { .. })
        ));
    }

    #[test]
    fn rejects_unknown_fetcher_type() {
        let toml = MINIMAL.replace("type = \"file\"", "type = \"ftp\"");
        assert!(matches!(parse_source_toml(&toml), Err(SourceError::Toml(_))));
    }

    #[test]
    fn area_units_convert_to_square_meters() {
        assert!((AreaUnit::Sqft.to_square_meters(1000.0) - 92.903_04).abs() < 1e-9);
        assert!((AreaUnit::Acres.to_square_meters(1.0) - 4_046.856_422_4).abs() < 1e-9);
        assert!((AreaUnit::Hectares.to_square_meters(0.5) - 5_000.0).abs() < 1e-9);
    }

    #[test]
    fn block_keys() {
        assert_eq!(BlockKey::None.block_of("12-34-56"), "");
        assert_eq!(BlockKey::Prefix { chars: 4 }.block_of("12-34-56"), "12-3");
        let segments = BlockKey::Segments {
            delimiter: "-".to_string(),
            count: 2,
        };
        assert_eq!(segments.block_of("12-34-56"), "12-34");
        assert_eq!(segments.block_of("12"), "12");
    }
}

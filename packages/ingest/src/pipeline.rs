//! The two-pass source pipeline.
//!
//! 1. Freshness check against the stored [`SourceMetadata`].
//! 2. Fetch phase: every page is spooled to disk.
//! 3. Pass 1: normalize each record and gather known-year statistics.
//! 4. Pass 2: normalize again, resolve years through the waterfall, write
//!    the detailed stream, accumulate clusters, and upsert the cache.
//! 5. Finalize: aggregated output, optional tiles, metadata, then every
//!    output is moved into place and the cache committed together.
//!
//! Configuration and infrastructure errors abort the run before any output
//! or metadata is committed. Per-record problems are tallied in the
//! [`RunReport`].

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parcel_map_database::DbError;
use parcel_map_database::paths::{DataDir, ensure_dir};
use parcel_map_database::source_db::{self, CachedParcel};
use parcel_map_dating::statistics::YearStatistics;
use parcel_map_dating::{DatingSources, Waterfall};
use parcel_map_generate::tiles::generate_pmtiles;
use parcel_map_generate::{ClusterMap, DetailedWriter, OutputPaths, place_all, write_aggregated};
use parcel_map_parcel_models::{SkipReason, SourceMetadata};
use parcel_map_source::FetchOptions;
use parcel_map_source::crs::ProjectionRegistry;
use parcel_map_source::fetch::fetcher_for;
use parcel_map_source::normalize::{Normalized, Normalizer};
use parcel_map_source::progress::ProgressCallback;
use parcel_map_source::source_def::SourceDefinition;

use crate::IngestError;
use crate::report::RunReport;
use crate::spool::{SpoolReader, fetch_to_spool};

/// Parcels per cache upsert batch.
const UPSERT_BATCH: usize = 5_000;

/// Layer name used for the `PMTiles` output.
pub const TILE_LAYER: &str = "parcels";

/// Per-invocation options.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Ignore the freshness check.
    pub force: bool,
    /// Fetch at most this many records. Limited runs do not update the
    /// stored metadata.
    pub limit: Option<u64>,
    /// Run tippecanoe over the detailed output.
    pub tiles: bool,
    /// Set to stop the run at the next page or pass boundary.
    pub cancel: Arc<AtomicBool>,
}

impl SyncOptions {
    fn ensure_not_cancelled(&self) -> Result<(), IngestError> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(IngestError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Whether a previous run is still current.
///
/// With a provider change token the stored token must match it. Without
/// one, the previous run must be younger than `refresh_after_hours`.
#[must_use]
pub fn is_fresh(
    stored: Option<&SourceMetadata>,
    change_token: Option<&str>,
    refresh_after_hours: Option<u64>,
) -> bool {
    let Some(stored) = stored else {
        return false;
    };
    if let Some(token) = change_token {
        return stored.change_token.as_deref() == Some(token);
    }
    let (Some(max_hours), Some(elapsed)) = (
        refresh_after_hours,
        source_db::hours_since(&stored.last_fetched),
    ) else {
        return false;
    };
    u64::try_from(elapsed).is_ok_and(|elapsed| elapsed < max_hours)
}

/// Runs the full pipeline for one source.
///
/// # Errors
///
/// Returns [`IngestError`] for anything that makes the run unusable: an
/// invalid definition, an unloadable lookup or boundary file, a failed
/// fetch, an unwritable output, or a cache failure. Nothing is committed
/// in that case.
#[allow(clippy::too_many_lines)]
pub async fn sync_source(
    source: &SourceDefinition,
    data: &DataDir,
    client: &reqwest::Client,
    options: &SyncOptions,
    progress: Arc<dyn ProgressCallback>,
) -> Result<RunReport, IngestError> {
    let start = Instant::now();
    let id = source.id();
    log::info!("[{id}] syncing {}", source.name());

    source.validate()?;
    let normalizer = Normalizer::new(source, ProjectionRegistry::standard())?;
    let dating = DatingSources::load(&source.dating, data.root())?;
    if !dating.boundaries().is_empty() {
        log::info!("[{id}] loaded {} dated boundaries", dating.boundaries().len());
    }

    let generated_dir = data.generated_dir();
    ensure_dir(&generated_dir)?;
    ensure_dir(&data.spool_dir())?;
    let outputs = OutputPaths::for_source(&generated_dir, id);

    let mut conn = source_db::open(&data.source_db_path(id))?;
    let fetcher = fetcher_for(source, data.root(), client);

    // ── Freshness ────────────────────────────────────────────────────
    let change_token = match fetcher.change_token().await {
        Ok(token) => token,
        Err(e) => {
            log::warn!("[{id}] could not read change token: {e}");
            None
        }
    };
    let stored = source_db::get_metadata(&conn, id)?;
    if !options.force
        && outputs.exist()
        && is_fresh(stored.as_ref(), change_token.as_deref(), source.refresh_after_hours)
    {
        log::info!("[{id}] unchanged since last run, skipping (use --force to rebuild)");
        return Ok(RunReport::up_to_date(id));
    }

    // ── Fetch ────────────────────────────────────────────────────────
    let spool_path = data.spool_path(id);
    let fetch_options = FetchOptions {
        limit: options.limit,
        cancel: options.cancel.clone(),
    };
    let fetched = fetch_to_spool(
        fetcher,
        source.fetch.clone(),
        fetch_options,
        &spool_path,
        progress.clone(),
    )
    .await?;

    let mut report = RunReport::new(id);
    report.skip_many(SkipReason::FetchFailure, fetched.failed_pages);

    // ── Pass 1: statistics ───────────────────────────────────────────
    options.ensure_not_cancelled()?;
    let statistics = gather_statistics(&normalizer, &spool_path)?;
    log::info!(
        "[{id}] pass 1: {} known years (global median {:?})",
        statistics.known(),
        statistics.global_median()
    );
    let waterfall = Waterfall::new(dating, statistics);

    // ── Pass 2: resolve, write, cluster, cache ───────────────────────
    options.ensure_not_cancelled()?;
    progress.set_message(format!("{id}: resolving years"));
    progress.set_total(fetched.records);
    progress.set_position(0);

    let mut detailed = DetailedWriter::create(&outputs.detailed)?;
    let mut clusters = ClusterMap::new(source.clustering.clone());
    let tx = conn.transaction().map_err(DbError::from)?;
    let mut batch: Vec<CachedParcel> = Vec::with_capacity(UPSERT_BATCH);

    for record in SpoolReader::open(&spool_path)? {
        let record = record?;
        report.processed += 1;
        progress.inc(1);

        let Normalized { parcel, notes } = match normalizer.normalize(&record) {
            Ok(normalized) => normalized,
            Err(e) => {
                log::debug!("[{id}] skipping record: {e}");
                report.skip(e.reason());
                continue;
            }
        };
        for note in notes {
            report.skip(note);
        }

        let evidence = waterfall.evidence_for(&parcel);
        match evidence {
            Some(evidence) => report.resolved(evidence.method),
            None => report.skip(SkipReason::UnresolvedYear),
        }

        detailed.write(&parcel, evidence.as_ref())?;
        clusters.add(&parcel, evidence.as_ref());
        report.emitted += 1;

        batch.push(CachedParcel { parcel, evidence });
        if batch.len() >= UPSERT_BATCH {
            source_db::upsert_parcels(&tx, id, &batch)?;
            batch.clear();
        }
    }
    source_db::upsert_parcels(&tx, id, &batch)?;

    // ── Finalize ─────────────────────────────────────────────────────
    options.ensure_not_cancelled()?;
    report.unclustered = clusters.skipped();
    let features = clusters.finalize();
    report.clusters = features.len() as u64;

    let detailed = detailed.finish()?;
    let aggregated = write_aggregated(&outputs.aggregated, &features)?;
    let tiles = if options.tiles {
        Some(generate_pmtiles(detailed.staging(), &outputs.tiles, TILE_LAYER)?)
    } else {
        None
    };

    if options.limit.is_none() {
        source_db::put_metadata(
            &tx,
            &SourceMetadata {
                source_id: id.to_string(),
                change_token,
                last_fetched: chrono::Utc::now().to_rfc3339(),
                record_count: report.processed,
            },
        )?;
    } else {
        log::info!("[{id}] limited run, metadata left unchanged");
    }
    options.ensure_not_cancelled()?;
    let staged = [Some(detailed), Some(aggregated), tiles].into_iter().flatten().collect();
    let placed = place_all(staged)?;
    if let Err(e) = tx.commit() {
        placed.rollback();
        return Err(DbError::from(e).into());
    }
    placed.keep();

    if let Err(e) = std::fs::remove_file(&spool_path) {
        log::warn!("[{id}] could not remove spool {}: {e}", spool_path.display());
    }

    progress.finish(format!("{id}: {} parcels", report.emitted));
    log::info!("{report} in {:.1}s", start.elapsed().as_secs_f64());
    Ok(report)
}

/// First pass over the spool: known years by land-use category.
fn gather_statistics(normalizer: &Normalizer, spool_path: &Path) -> Result<YearStatistics, IngestError> {
    let mut statistics = YearStatistics::new();
    for record in SpoolReader::open(spool_path)? {
        if let Ok(normalized) = normalizer.normalize(&record?) {
            statistics.observe_parcel(&normalized.parcel);
        }
    }
    Ok(statistics)
}

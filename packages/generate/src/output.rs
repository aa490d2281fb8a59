//! Per-source output files.
//!
//! Every file is written under a hidden staging name next to its final
//! path. Writers hand back a [`StagedOutput`], and [`place_all`] renames a
//! whole set into place at once, putting earlier files back if any rename
//! fails. Staging files that are never placed are removed on drop, so a
//! failed run never leaves partial output behind.

use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::{Path, PathBuf};

use parcel_map_parcel_models::{DateEvidence, NormalizedParcel};

use crate::GenerateError;
use crate::cluster::AggregatedFeature;

/// Output file locations for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub detailed: PathBuf,
    pub aggregated: PathBuf,
    pub tiles: PathBuf,
}

impl OutputPaths {
    #[must_use]
    pub fn for_source(dir: &Path, source_id: &str) -> Self {
        Self {
            detailed: dir.join(format!("{source_id}.detailed.geojsonseq")),
            aggregated: dir.join(format!("{source_id}.aggregated.geojson")),
            tiles: dir.join(format!("{source_id}.pmtiles")),
        }
    }

    /// Whether both required outputs exist from an earlier run.
    #[must_use]
    pub fn exist(&self) -> bool {
        self.detailed.is_file() && self.aggregated.is_file()
    }
}

/// The hidden sibling a file is written to before being renamed into place.
///
/// The extension is preserved since tippecanoe picks its output format
/// from it.
#[must_use]
pub fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}"))
}

// ── Staging ──────────────────────────────────────────────────────────────

/// A complete output still under its staging name.
///
/// Dropping it removes the staging file.
#[derive(Debug)]
pub struct StagedOutput {
    staging: PathBuf,
    path: PathBuf,
}

impl StagedOutput {
    const fn new(staging: PathBuf, path: PathBuf) -> Self {
        Self { staging, path }
    }

    /// An output for `path` that has not been written yet.
    #[must_use]
    pub fn for_path(path: &Path) -> Self {
        Self::new(staging_path(path), path.to_path_buf())
    }

    /// Where the content currently lives.
    #[must_use]
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    /// Where [`place_all`] will move it.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        // Already gone once placed.
        let _ = std::fs::remove_file(&self.staging);
    }
}

/// Outputs moved into place by [`place_all`], with the files they replaced
/// set aside.
///
/// Call [`Self::keep`] once the run is committed. Dropping it instead puts
/// the previous files back.
#[derive(Debug)]
pub struct PlacedOutputs {
    placed: Vec<Placed>,
    kept: bool,
}

#[derive(Debug)]
struct Placed {
    path: PathBuf,
    previous: Option<PathBuf>,
}

impl PlacedOutputs {
    fn place(&mut self, output: &StagedOutput) -> Result<(), GenerateError> {
        let previous = if output.path.is_file() {
            let previous = previous_path(&output.path);
            std::fs::rename(&output.path, &previous)?;
            Some(previous)
        } else {
            None
        };
        if let Err(e) = std::fs::rename(&output.staging, &output.path) {
            if let Some(previous) = &previous {
                let _ = std::fs::rename(previous, &output.path);
            }
            return Err(e.into());
        }
        self.placed.push(Placed {
            path: output.path.clone(),
            previous,
        });
        Ok(())
    }

    /// Discards the replaced files, making the new outputs final.
    pub fn keep(mut self) {
        self.kept = true;
        for placed in &self.placed {
            if let Some(previous) = &placed.previous {
                let _ = std::fs::remove_file(previous);
            }
            log::info!("Wrote {}", placed.path.display());
        }
    }

    /// Removes the new outputs and restores the ones they replaced.
    pub fn rollback(self) {
        drop(self);
    }
}

impl Drop for PlacedOutputs {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        for placed in self.placed.iter().rev() {
            let _ = std::fs::remove_file(&placed.path);
            if let Some(previous) = &placed.previous {
                let _ = std::fs::rename(previous, &placed.path);
            }
        }
    }
}

fn previous_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "output".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{name}.previous"))
}

/// Renames every staged output into place.
///
/// Either all of them are placed or, on error, none are: outputs placed
/// before the failure are removed and the files they replaced restored.
///
/// # Errors
///
/// Returns [`GenerateError::Io`] if a rename fails.
pub fn place_all(staged: Vec<StagedOutput>) -> Result<PlacedOutputs, GenerateError> {
    let mut placed = PlacedOutputs {
        placed: Vec::with_capacity(staged.len()),
        kept: false,
    };
    for output in &staged {
        placed.place(output)?;
    }
    Ok(placed)
}

// ── Detailed stream ──────────────────────────────────────────────────────

/// Streams one `GeoJSONSeq` feature per parcel.
pub struct DetailedWriter {
    path: PathBuf,
    staging: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl DetailedWriter {
    /// Creates the staging file for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError::Io`] if the staging file cannot be created.
    pub fn create(path: &Path) -> Result<Self, GenerateError> {
        let staging = staging_path(path);
        let file = File::create(&staging)?;
        Ok(Self {
            path: path.to_path_buf(),
            staging,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    /// Appends a parcel with its resolved year. Unresolved parcels are
    /// written with a null year.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(
        &mut self,
        parcel: &NormalizedParcel,
        evidence: Option<&DateEvidence>,
    ) -> Result<(), GenerateError> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        serde_json::to_writer(&mut *writer, &detailed_feature(parcel, evidence))?;
        writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    #[must_use]
    pub const fn written(&self) -> u64 {
        self.written
    }

    /// Flushes the stream, leaving it staged.
    ///
    /// # Errors
    ///
    /// Returns [`GenerateError::Io`] if the flush fails.
    pub fn finish(mut self) -> Result<StagedOutput, GenerateError> {
        let staged = StagedOutput::new(
            std::mem::take(&mut self.staging),
            std::mem::take(&mut self.path),
        );
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        log::debug!("Staged {} detailed features", self.written);
        Ok(staged)
    }
}

impl Drop for DetailedWriter {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}

/// The detailed-layer feature for one parcel.
#[must_use]
pub fn detailed_feature(
    parcel: &NormalizedParcel,
    evidence: Option<&DateEvidence>,
) -> serde_json::Value {
    let category = parcel.land_use_category;
    serde_json::json!({
        "type": "Feature",
        "id": parcel.id,
        "geometry": parcel.geometry,
        "properties": {
            "id": parcel.id,
            "year": evidence.map(|e| e.year),
            "estimated": evidence.is_some_and(DateEvidence::is_estimated),
            "method": evidence.map(|e| e.method),
            "confidence": evidence.map(|e| e.confidence),
            "category": category,
            "color": category.color(),
            "label": category.label(),
            "land_use": parcel.land_use_raw,
            "address": parcel.address,
            "city": parcel.city,
            "area_sqm": parcel.area_sqm,
            "stories": parcel.stories,
            "units": parcel.units,
            "effective_year": parcel.effective_year,
        }
    })
}

// ── Aggregated layer ─────────────────────────────────────────────────────

/// Writes the finalized clusters as a staged `GeoJSON` `FeatureCollection`
/// destined for `path`.
///
/// # Errors
///
/// Returns an error if the staging file cannot be written.
pub fn write_aggregated(path: &Path, features: &[AggregatedFeature]) -> Result<StagedOutput, GenerateError> {
    let staged = StagedOutput::for_path(path);
    write_collection(&staged.staging, features)?;
    log::debug!("Staged {} clusters", features.len());
    Ok(staged)
}

fn write_collection(path: &Path, features: &[AggregatedFeature]) -> Result<(), GenerateError> {
    let mut writer = BufWriter::new(File::create(path)?);
    let collection = serde_json::json!({
        "type": "FeatureCollection",
        "features": features.iter().map(AggregatedFeature::to_geojson).collect::<Vec<_>>(),
    });
    serde_json::to_writer(&mut writer, &collection)?;
    writer.flush()?;
    Ok(())
}

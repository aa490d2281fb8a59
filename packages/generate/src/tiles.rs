//! `PMTiles` generation with tippecanoe.

use std::path::Path;
use std::process::Command;

use crate::GenerateError;
use crate::output::StagedOutput;

/// Arguments passed to tippecanoe to tile `input` into `output`.
#[must_use]
pub fn tippecanoe_args(input: &Path, output: &Path, layer: &str) -> Vec<String> {
    vec![
        "-o".to_string(),
        output.to_string_lossy().into_owned(),
        "--force".to_string(),
        "--no-feature-limit".to_string(),
        "--no-tile-size-limit".to_string(),
        "--minimum-zoom=10".to_string(),
        "--maximum-zoom=16".to_string(),
        "--drop-densest-as-needed".to_string(),
        "--extend-zooms-if-still-dropping".to_string(),
        format!("--layer={layer}"),
        input.to_string_lossy().into_owned(),
    ]
}

/// Runs tippecanoe over a detailed stream, staging the tiles for `output`.
///
/// # Errors
///
/// Returns [`GenerateError::Io`] if tippecanoe cannot be started and
/// [`GenerateError::Tippecanoe`] if it exits unsuccessfully.
pub fn generate_pmtiles(detailed: &Path, output: &Path, layer: &str) -> Result<StagedOutput, GenerateError> {
    log::info!("Running tippecanoe to generate PMTiles...");

    let staged = StagedOutput::for_path(output);
    let status = Command::new("tippecanoe")
        .args(tippecanoe_args(detailed, staged.staging(), layer))
        .status()?;

    if !status.success() {
        return Err(GenerateError::Tippecanoe {
            status: status.to_string(),
        });
    }

    log::info!("PMTiles staged for {}", output.display());
    Ok(staged)
}

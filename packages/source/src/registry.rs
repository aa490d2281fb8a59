//! Source registry: loads source definitions from TOML configs.
//!
//! Each `.toml` file in `packages/source/sources/` is baked into the binary
//! at compile time via [`include_str!`]. Deployments add or override
//! sources with a directory of extra `.toml` files; a file whose `id`
//! matches a built-in source replaces it.

use std::path::Path;

use crate::SourceError;
use crate::source_def::{SourceDefinition, parse_source_toml};

/// TOML configs embedded at compile time.
const SOURCE_TOMLS: &[(&str, &str)] = &[
    (
        "riverside_assessor",
        include_str!("../sources/riverside_assessor.toml"),
    ),
    (
        "lakeport_buildings",
        include_str!("../sources/lakeport_buildings.toml"),
    ),
    (
        "harbor_city_footprints",
        include_str!("../sources/harbor_city_footprints.toml"),
    ),
];

/// Returns all built-in source definitions, parsed from embedded TOML.
///
/// # Panics
///
/// Panics if any embedded TOML config is malformed. The configs ship with
/// the binary and are covered by tests.
#[must_use]
pub fn all_sources() -> Vec<SourceDefinition> {
    SOURCE_TOMLS
        .iter()
        .map(|(name, toml)| {
            parse_source_toml(toml).unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"))
        })
        .collect()
}

/// Loads every `*.toml` file in `dir`, sorted by file name.
///
/// # Errors
///
/// Returns [`SourceError`] if the directory cannot be read or any file
/// fails to parse. The error message names the offending file.
pub fn load_dir(dir: &Path) -> Result<Vec<SourceDefinition>, SourceError> {
    let mut paths = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()?;
    paths.retain(|p| p.extension().is_some_and(|ext| ext == "toml"));
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)?;
            parse_source_toml(&text).map_err(|e| SourceError::Config {
                message: format!("{}: {e}", path.display()),
            })
        })
        .collect()
}

/// Built-in sources merged with those in `config_dir`, if any.
///
/// Sources from the directory replace built-ins with the same id and are
/// otherwise appended in file-name order.
///
/// # Errors
///
/// Returns [`SourceError`] if the directory cannot be loaded.
pub fn load_sources(config_dir: Option<&Path>) -> Result<Vec<SourceDefinition>, SourceError> {
    let mut sources = all_sources();
    let Some(dir) = config_dir else {
        return Ok(sources);
    };

    for extra in load_dir(dir)? {
        if let Some(existing) = sources.iter_mut().find(|s| s.id == extra.id) {
            log::info!("{}: overridden by {}", extra.id, dir.display());
            *existing = extra;
        } else {
            sources.push(extra);
        }
    }
    Ok(sources)
}

/// Keeps only the sources whose id appears in the comma-separated `filter`.
///
/// An absent or blank filter keeps everything.
#[must_use]
pub fn filter_sources(sources: Vec<SourceDefinition>, filter: Option<&str>) -> Vec<SourceDefinition> {
    let Some(filter) = filter.map(str::trim).filter(|f| !f.is_empty()) else {
        return sources;
    };
    let wanted: Vec<&str> = filter
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    sources
        .into_iter()
        .filter(|s| wanted.contains(&s.id.as_str()))
        .collect()
}

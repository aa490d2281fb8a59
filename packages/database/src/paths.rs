#![allow(clippy::module_name_repetitions)]
//! Canonical file paths under the data directory.
//!
//! The data directory defaults to `<workspace>/data` and can be moved with
//! the `PARCEL_MAP_DATA_DIR` environment variable. Relative paths in source
//! definitions (raw files, lookup tables, boundary files) are resolved
//! against it.

use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PARCEL_MAP_DATA_DIR";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// manifest directory itself if it is not nested two levels deep.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest.ancestors().nth(2).unwrap_or(manifest).to_path_buf()
}

/// The data directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// A layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `PARCEL_MAP_DATA_DIR` if set, otherwise `<workspace>/data`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var_os(DATA_DIR_ENV)
            .filter(|v| !v.is_empty())
            .map_or_else(|| Self::new(project_root().join("data")), Self::new)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one `DuckDB` file per source.
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("sources")
    }

    /// Path of a source's `DuckDB` cache.
    #[must_use]
    pub fn source_db_path(&self, source_id: &str) -> PathBuf {
        self.sources_dir().join(format!("{source_id}.duckdb"))
    }

    /// Directory holding fetch spools.
    #[must_use]
    pub fn spool_dir(&self) -> PathBuf {
        self.root.join("spool")
    }

    /// Path of a source's NDJSON spool.
    #[must_use]
    pub fn spool_path(&self, source_id: &str) -> PathBuf {
        self.spool_dir().join(format!("{source_id}.ndjson"))
    }

    /// Directory for generated outputs.
    #[must_use]
    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    /// Resolves a path from a source definition against the data directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_relative_to_root() {
        let data = DataDir::new("/srv/parcels");
        assert_eq!(data.source_db_path("riverside"), Path::new("/srv/parcels/sources/riverside.duckdb"));
        assert_eq!(data.spool_path("riverside"), Path::new("/srv/parcels/spool/riverside.ndjson"));
        assert_eq!(data.generated_dir(), Path::new("/srv/parcels/generated"));
        assert_eq!(data.resolve(Path::new("raw/a.json")), Path::new("/srv/parcels/raw/a.json"));
        assert_eq!(data.resolve(Path::new("/abs/a.json")), Path::new("/abs/a.json"));
    }

    #[test]
    fn project_root_contains_the_workspace_manifest() {
        assert!(project_root().join("Cargo.toml").exists());
    }
}

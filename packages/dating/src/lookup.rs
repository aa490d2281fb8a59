//! Authoritative `id,year` lookup tables.

use std::collections::BTreeMap;
use std::path::Path;

use parcel_map_parcel_models::is_plausible_year;

use crate::DatingError;

/// Construction years keyed by record id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExactLookup {
    years: BTreeMap<String, i32>,
}

impl ExactLookup {
    /// Loads a CSV with `id` and `year` header columns (case-insensitive,
    /// any order, extra columns ignored). Rows with an empty id or an
    /// implausible year are skipped; a repeated id keeps its last row.
    ///
    /// # Errors
    ///
    /// Returns [`DatingError`] if the file cannot be parsed or lacks either
    /// column.
    pub fn from_path(path: &Path) -> Result<Self, DatingError> {
        let csv_err = |source| DatingError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(|h| h.trim().to_ascii_lowercase())
            .collect();
        let column = |name: &'static str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| DatingError::MissingColumn {
                    path: path.to_path_buf(),
                    column: name,
                })
        };
        let id_col = column("id")?;
        let year_col = column("year")?;

        let mut years = BTreeMap::new();
        let mut skipped = 0u64;
        for result in reader.records() {
            let record = result.map_err(csv_err)?;
            let id = record.get(id_col).map(str::trim).unwrap_or_default();
            let year = record
                .get(year_col)
                .and_then(|y| y.trim().parse::<i32>().ok())
                .filter(|y| is_plausible_year(*y));
            match year {
                Some(year) if !id.is_empty() => {
                    years.insert(id.to_string(), year);
                }
                _ => skipped += 1,
            }
        }

        log::info!(
            "Loaded {} exact years from {} ({skipped} rows skipped)",
            years.len(),
            path.display()
        );
        Ok(Self { years })
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<i32> {
        self.years.get(id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.years.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }
}

impl FromIterator<(String, i32)> for ExactLookup {
    fn from_iter<T: IntoIterator<Item = (String, i32)>>(iter: T) -> Self {
        Self {
            years: iter.into_iter().collect(),
        }
    }
}

//! Known-year statistics gathered in the first pass.

use std::collections::BTreeMap;

use parcel_map_parcel_models::{LandUseCategory, NormalizedParcel};

/// Year counts, sorted by year.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Histogram {
    counts: BTreeMap<i32, u64>,
    total: u64,
}

impl Histogram {
    fn add(&mut self, year: i32) {
        *self.counts.entry(year).or_default() += 1;
        self.total += 1;
    }

    /// The lower median: element `(n - 1) / 2` of the sorted years.
    fn lower_median(&self) -> Option<i32> {
        let target = self.total.checked_sub(1)? / 2;
        let mut seen = 0;
        for (&year, &count) in &self.counts {
            seen += count;
            if seen > target {
                return Some(year);
            }
        }
        None
    }
}

/// Known construction years by land-use category and overall.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YearStatistics {
    by_category: BTreeMap<LandUseCategory, Histogram>,
    global: Histogram,
}

impl YearStatistics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, category: LandUseCategory, year: i32) {
        self.by_category.entry(category).or_default().add(year);
        self.global.add(year);
    }

    /// Records the parcel's source year, if it has one.
    pub fn observe_parcel(&mut self, parcel: &NormalizedParcel) {
        if let Some(year) = parcel.year_built {
            self.observe(parcel.land_use_category, year);
        }
    }

    /// Median known year for `category`, falling back to the global median
    /// when the category has no known years.
    #[must_use]
    pub fn median_for(&self, category: LandUseCategory) -> Option<i32> {
        self.by_category
            .get(&category)
            .and_then(Histogram::lower_median)
            .or_else(|| self.global_median())
    }

    #[must_use]
    pub fn global_median(&self) -> Option<i32> {
        self.global.lower_median()
    }

    /// Number of known years observed.
    #[must_use]
    pub const fn known(&self) -> u64 {
        self.global.total
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.global.total == 0
    }
}

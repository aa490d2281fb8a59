//! Per-source run summaries.

use std::collections::BTreeMap;
use std::fmt;

use parcel_map_parcel_models::{DateMethod, SkipReason};

/// How a sync ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The pipeline ran and outputs were rewritten.
    Completed,
    /// The source was unchanged since the last run; nothing was written.
    UpToDate,
}

/// Counters for one source run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub source_id: String,
    pub status: RunStatus,
    /// Raw records read from the spool in the second pass.
    pub processed: u64,
    /// Parcels written to the detailed output.
    pub emitted: u64,
    /// Excluded records and tolerated problems, by reason. The
    /// `fetch_failure` entry counts pages that were never fetched, since
    /// their records are unknown.
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Resolved years, by the method that produced them.
    pub methods: BTreeMap<DateMethod, u64>,
    /// Clusters in the aggregated output.
    pub clusters: u64,
    /// Parcels left out of clustering for lack of a representative point.
    pub unclustered: u64,
}

impl RunReport {
    #[must_use]
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            status: RunStatus::Completed,
            processed: 0,
            emitted: 0,
            skipped: BTreeMap::new(),
            methods: BTreeMap::new(),
            clusters: 0,
            unclustered: 0,
        }
    }

    /// A report for a run skipped by the freshness check.
    #[must_use]
    pub fn up_to_date(source_id: impl Into<String>) -> Self {
        Self {
            status: RunStatus::UpToDate,
            ..Self::new(source_id)
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        self.skip_many(reason, 1);
    }

    pub fn skip_many(&mut self, reason: SkipReason, count: u64) {
        if count > 0 {
            *self.skipped.entry(reason).or_default() += count;
        }
    }

    pub fn resolved(&mut self, method: DateMethod) {
        *self.methods.entry(method).or_default() += 1;
    }

    #[must_use]
    pub fn skipped_for(&self, reason: SkipReason) -> u64 {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }

    /// Pages given up on under the `tolerate_gap` policy.
    #[must_use]
    pub fn failed_pages(&self) -> u64 {
        self.skipped_for(SkipReason::FetchFailure)
    }

    #[must_use]
    pub fn resolved_by(&self, method: DateMethod) -> u64 {
        self.methods.get(&method).copied().unwrap_or(0)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status == RunStatus::UpToDate {
            return write!(f, "{}: up to date", self.source_id);
        }
        write!(
            f,
            "{}: {} processed, {} emitted, {} clusters",
            self.source_id, self.processed, self.emitted, self.clusters
        )?;
        if !self.methods.is_empty() {
            let methods: Vec<String> = self.methods.iter().map(|(m, n)| format!("{m}={n}")).collect();
            write!(f, "; years [{}]", methods.join(", "))?;
        }
        if !self.skipped.is_empty() {
            let skipped: Vec<String> = self
                .skipped
                .iter()
                .map(|(r, n)| match r {
                    SkipReason::FetchFailure => format!("{r}={n} pages"),
                    _ => format!("{r}={n}"),
                })
                .collect();
            write!(f, "; skipped [{}]", skipped.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_methods_and_skips() {
        let mut report = RunReport::new("demo");
        report.processed = 3;
        report.emitted = 2;
        report.clusters = 1;
        report.resolved(DateMethod::Exact);
        report.resolved(DateMethod::CategoryMedian);
        report.skip(SkipReason::MissingGeometry);
        report.skip_many(SkipReason::FetchFailure, 0);

        assert_eq!(
            report.to_string(),
            "demo: 3 processed, 2 emitted, 1 clusters; years [exact=1, category_median=1]; skipped [missing_geometry=1]"
        );
        assert_eq!(report.skipped_for(SkipReason::FetchFailure), 0);
    }

    #[test]
    fn fetch_failures_are_reported_as_pages() {
        let mut report = RunReport::new("demo");
        report.processed = 4;
        report.emitted = 4;
        report.skip_many(SkipReason::FetchFailure, 2);
        report.skip(SkipReason::MalformedDate);

        assert_eq!(report.failed_pages(), 2);
        assert_eq!(
            report.to_string(),
            "demo: 4 processed, 4 emitted, 0 clusters; skipped [malformed_date=1, fetch_failure=2 pages]"
        );
    }

    #[test]
    fn up_to_date_report_is_terse() {
        assert_eq!(RunReport::up_to_date("demo").to_string(), "demo: up to date");
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing for the parcel-map binaries.
//!
//! [`init_logger`] installs `pretty_env_logger` behind
//! `indicatif-log-bridge`, so log lines do not tear the progress bars, and
//! [`IndicatifProgress`] drives those bars through the pipeline's
//! [`ProgressCallback`] trait.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use parcel_map_source::progress::ProgressCallback;

pub use indicatif::MultiProgress;

const TICK: Duration = Duration::from_millis(100);

/// An `indicatif` [`ProgressBar`] behind [`ProgressCallback`].
pub struct IndicatifProgress {
    bar: ProgressBar,
    /// Applied once the total is known.
    counted_style: ProgressStyle,
}

impl IndicatifProgress {
    /// A per-source record bar. Starts as a spinner and becomes a bar with
    /// ETA once the fetcher reports a total.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, source_id: &str) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(TICK);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{msg}] {pos} records")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(source_id.to_string());

        Arc::new(Self::new(bar, counted_style("cyan")))
    }

    /// A bar over a known number of steps (e.g. sources 2/5).
    #[must_use]
    pub fn steps_bar(multi: &MultiProgress, message: &str, total: u64) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new(total));
        let style = ProgressStyle::with_template("{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        bar.set_style(style.clone());
        bar.set_message(message.to_string());

        Arc::new(Self::new(bar, style))
    }

    fn new(bar: ProgressBar, counted_style: ProgressStyle) -> Self {
        Self { bar, counted_style }
    }
}

fn counted_style(color: &str) -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "  [{{msg}}] {{wide_bar:.{color}/dim}} {{pos}}/{{len}} {{percent}}% [{{eta}}]"
    ))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("##-")
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.counted_style.clone());
    }

    fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Installs the global logger (level from `RUST_LOG`) wrapped so that log
/// output is suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] every bar must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // A logger may already be installed (tests).
    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok();

    log::set_max_level(level);

    multi
}

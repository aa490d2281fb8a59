//! Paginated fetching.
//!
//! A [`PageFetcher`] knows how to talk to one kind of provider. The
//! functions here drive it: when the provider reports a total count, pages
//! are requested concurrently in waves of `workers` offsets; otherwise
//! pages are requested one after another until the provider reports no
//! more. Every page goes through [`crate::retry::retry`], an optional pause
//! paces the requests, and cancellation is checked between pages.
//!
//! Pages are streamed through a [`tokio::sync::mpsc`] channel in offset
//! order so the consumer can spool them to disk as they arrive.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::arcgis::ArcgisFetcher;
use crate::file::FileFetcher;
use crate::progress::ProgressCallback;
use crate::retry::{RetryError, RetryPolicy, retry};
use crate::source_def::{FetchPolicy, FetcherConfig, PageFailurePolicy, SourceDefinition};
use crate::{FetchOptions, SourceError};

/// Channel buffer size; lets the fetcher run a few pages ahead of the
/// consumer.
const PAGE_CHANNEL_BUFFER: usize = 4;

/// One page of raw records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Raw records in provider order.
    pub records: Vec<serde_json::Value>,
    /// Whether the provider has records beyond this page.
    pub has_more: bool,
}

/// A provider adapter that serves records by offset.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Label for log messages.
    fn label(&self) -> &str;

    /// Records requested per page.
    fn page_size(&self) -> u64;

    /// Total number of records, if the provider can tell cheaply.
    async fn total_count(&self) -> Result<Option<u64>, SourceError>;

    /// An opaque token that changes whenever the dataset changes (last edit
    /// date, `ETag`, file fingerprint).
    async fn change_token(&self) -> Result<Option<String>, SourceError>;

    /// Fetches up to `limit` records starting at `offset`.
    async fn fetch_page(&self, offset: u64, limit: u64) -> Result<Page, SourceError>;
}

/// Outcome of a completed fetch phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchSummary {
    /// Total reported by the provider, if any.
    pub total: Option<u64>,
    /// Pages received.
    pub pages: u64,
    /// Records received.
    pub records: u64,
    /// Pages skipped under [`PageFailurePolicy::TolerateGap`].
    pub failed_pages: u64,
}

/// Builds the fetcher a source definition asks for. Relative file paths
/// are resolved against `data_dir`.
#[must_use]
pub fn fetcher_for(
    definition: &SourceDefinition,
    data_dir: &Path,
    client: &reqwest::Client,
) -> Arc<dyn PageFetcher> {
    match &definition.fetcher {
        FetcherConfig::Arcgis {
            query_url,
            page_size,
            where_clause,
        } => Arc::new(ArcgisFetcher::new(
            client.clone(),
            definition.id(),
            query_url.as_str(),
            *page_size,
            where_clause.as_deref(),
        )),
        FetcherConfig::File { path, page_size } => Arc::new(FileFetcher::new(
            definition.id(),
            data_dir.join(path),
            *page_size,
        )),
    }
}

/// Starts fetching in a background task and returns a receiver that yields
/// one page of raw records at a time.
///
/// The fetch result (and any error) is returned via the
/// [`tokio::task::JoinHandle`].
#[must_use]
pub fn spawn_fetch(
    fetcher: Arc<dyn PageFetcher>,
    policy: FetchPolicy,
    options: FetchOptions,
    progress: Arc<dyn ProgressCallback>,
) -> (
    mpsc::Receiver<Vec<serde_json::Value>>,
    tokio::task::JoinHandle<Result<FetchSummary, SourceError>>,
) {
    let (tx, rx) = mpsc::channel(PAGE_CHANNEL_BUFFER);
    let handle = tokio::spawn(async move {
        fetch_all(fetcher.as_ref(), &policy, &options, &tx, progress.as_ref()).await
    });
    (rx, handle)
}

/// Fetches every page and sends each non-empty page to `tx`.
///
/// # Errors
///
/// Returns [`SourceError::Cancelled`] if cancellation was requested or the
/// receiver was dropped, and [`SourceError::PageFailed`] if a page
/// exhausted its retries under [`PageFailurePolicy::Abort`].
pub async fn fetch_all(
    fetcher: &dyn PageFetcher,
    policy: &FetchPolicy,
    options: &FetchOptions,
    tx: &mpsc::Sender<Vec<serde_json::Value>>,
    progress: &dyn ProgressCallback,
) -> Result<FetchSummary, SourceError> {
    let label = fetcher.label().to_string();
    let retry_policy = RetryPolicy::from(policy);

    let total = match retry(&retry_policy, &label, || fetcher.total_count()).await {
        Ok(total) => total,
        Err(e) => {
            log::warn!("[{label}] count request failed, paging sequentially: {}", e.error);
            None
        }
    };

    let summary = match total {
        Some(total) => {
            let target = options.limit.map_or(total, |limit| limit.min(total));
            if target < total {
                log::info!("[{label}] {total} records available (fetching up to {target})");
            } else {
                log::info!("[{label}] {total} records available (fetching all)");
            }
            fetch_waves(fetcher, policy, &retry_policy, options, target, tx, progress).await?
        }
        None => {
            log::info!("[{label}] total unknown, paging sequentially");
            fetch_sequential(fetcher, policy, &retry_policy, options, tx, progress).await?
        }
    };

    let summary = FetchSummary { total, ..summary };
    progress.finish(format!("{label}: {} records fetched", summary.records));
    log::info!(
        "[{label}] fetch complete: {} records in {} pages ({} failed)",
        summary.records,
        summary.pages,
        summary.failed_pages
    );
    Ok(summary)
}

/// Concurrent offset paging against a known total.
async fn fetch_waves(
    fetcher: &dyn PageFetcher,
    policy: &FetchPolicy,
    retry_policy: &RetryPolicy,
    options: &FetchOptions,
    target: u64,
    tx: &mpsc::Sender<Vec<serde_json::Value>>,
    progress: &dyn ProgressCallback,
) -> Result<FetchSummary, SourceError> {
    let label = fetcher.label();
    let page_size = fetcher.page_size().max(1);
    let offsets: Vec<u64> = std::iter::successors(Some(0u64), |o| Some(o + page_size))
        .take_while(|o| *o < target)
        .collect();
    let waves: Vec<&[u64]> = offsets.chunks(policy.workers.max(1)).collect();
    let mut summary = FetchSummary::default();
    progress.set_total(target);

    for (i, wave) in waves.iter().enumerate() {
        ensure_not_cancelled(options)?;

        let results = futures::future::join_all(wave.iter().map(|&offset| {
            let limit = page_size.min(target - offset);
            async move {
                let result = retry(retry_policy, label, || fetcher.fetch_page(offset, limit)).await;
                (offset, result)
            }
        }))
        .await;

        let pages_before = summary.pages + summary.failed_pages;
        for (offset, result) in results {
            match result {
                Ok(page) => deliver(page.records, &mut summary, tx, progress).await?,
                Err(e) => tolerate_or_abort(policy, label, offset, e, &mut summary)?,
            }
        }

        if i + 1 < waves.len() {
            pause_if_due(policy, pages_before, summary.pages + summary.failed_pages).await;
        }
    }

    Ok(summary)
}

/// Sequential paging driven by the provider's `has_more` flag.
///
/// A tolerated failure ends the fetch: without a total there is no way to
/// tell whether later offsets hold records.
async fn fetch_sequential(
    fetcher: &dyn PageFetcher,
    policy: &FetchPolicy,
    retry_policy: &RetryPolicy,
    options: &FetchOptions,
    tx: &mpsc::Sender<Vec<serde_json::Value>>,
    progress: &dyn ProgressCallback,
) -> Result<FetchSummary, SourceError> {
    let label = fetcher.label();
    let page_size = fetcher.page_size().max(1);
    let mut summary = FetchSummary::default();
    let mut offset = 0u64;
    if let Some(limit) = options.limit {
        progress.set_total(limit);
    }

    loop {
        ensure_not_cancelled(options)?;

        let remaining = options
            .limit
            .map_or(u64::MAX, |limit| limit.saturating_sub(summary.records));
        if remaining == 0 {
            break;
        }
        let limit = page_size.min(remaining);

        match retry(retry_policy, label, || fetcher.fetch_page(offset, limit)).await {
            Ok(Page {
                mut records,
                has_more,
            }) => {
                if records.is_empty() {
                    break;
                }
                let received = records.len() as u64;
                records.truncate(usize::try_from(remaining).unwrap_or(usize::MAX));
                offset += received;
                let pages_before = summary.pages;
                deliver(records, &mut summary, tx, progress).await?;
                if !has_more {
                    break;
                }
                pause_if_due(policy, pages_before, summary.pages).await;
            }
            Err(e) => {
                tolerate_or_abort(policy, label, offset, e, &mut summary)?;
                break;
            }
        }
    }

    Ok(summary)
}

async fn deliver(
    records: Vec<serde_json::Value>,
    summary: &mut FetchSummary,
    tx: &mpsc::Sender<Vec<serde_json::Value>>,
    progress: &dyn ProgressCallback,
) -> Result<(), SourceError> {
    let count = records.len() as u64;
    summary.pages += 1;
    summary.records += count;
    progress.inc(count);
    if count > 0 {
        tx.send(records).await.map_err(|_| SourceError::Cancelled)?;
    }
    Ok(())
}

fn tolerate_or_abort(
    policy: &FetchPolicy,
    label: &str,
    offset: u64,
    failure: RetryError,
    summary: &mut FetchSummary,
) -> Result<(), SourceError> {
    match policy.on_page_failure {
        PageFailurePolicy::Abort => Err(SourceError::PageFailed {
            offset,
            attempts: failure.attempts,
            message: failure.error.to_string(),
        }),
        PageFailurePolicy::TolerateGap => {
            log::warn!(
                "[{label}] skipping page at offset {offset} after {} attempts: {}",
                failure.attempts,
                failure.error
            );
            summary.failed_pages += 1;
            Ok(())
        }
    }
}

fn ensure_not_cancelled(options: &FetchOptions) -> Result<(), SourceError> {
    if options.is_cancelled() {
        Err(SourceError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleeps for the configured pause when the page count crossed a multiple
/// of `pause_every_pages` (or always, when no interval is set).
async fn pause_if_due(policy: &FetchPolicy, pages_before: u64, pages_after: u64) {
    if policy.pause_ms == 0 {
        return;
    }
    let due = match policy.pause_every_pages {
        None | Some(0) => true,
        Some(every) => pages_before / every != pages_after / every,
    };
    if due {
        tokio::time::sleep(Duration::from_millis(policy.pause_ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use super::*;
    use crate::progress::null_progress;

    /// Serves `len` records `{"n": i}`; offsets in `failing` always fail,
    /// offsets in `flaky` fail once.
    struct MockFetcher {
        len: u64,
        page_size: u64,
        report_total: bool,
        failing: BTreeSet<u64>,
        flaky: Mutex<BTreeSet<u64>>,
        calls: AtomicU32,
    }

    impl MockFetcher {
        fn new(len: u64, page_size: u64, report_total: bool) -> Self {
            Self {
                len,
                page_size,
                report_total,
                failing: BTreeSet::new(),
                flaky: Mutex::new(BTreeSet::new()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        fn label(&self) -> &str {
            "mock"
        }

        fn page_size(&self) -> u64 {
            self.page_size
        }

        async fn total_count(&self) -> Result<Option<u64>, SourceError> {
            Ok(self.report_total.then_some(self.len))
        }

        async fn change_token(&self) -> Result<Option<String>, SourceError> {
            Ok(None)
        }

        async fn fetch_page(&self, offset: u64, limit: u64) -> Result<Page, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let unavailable = SourceError::Status {
                status: 503,
                url: format!("mock://{offset}"),
            };
            if self.failing.contains(&offset) || self.flaky.lock().unwrap().remove(&offset) {
                return Err(unavailable);
            }
            let end = (offset + limit).min(self.len);
            Ok(Page {
                records: (offset..end).map(|n| json!({ "n": n })).collect(),
                has_more: end < self.len,
            })
        }
    }

    fn policy() -> FetchPolicy {
        FetchPolicy {
            workers: 3,
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..FetchPolicy::default()
        }
    }

    async fn run(
        fetcher: MockFetcher,
        policy: FetchPolicy,
        options: FetchOptions,
    ) -> (Vec<u64>, Result<FetchSummary, SourceError>) {
        let (mut rx, handle) = spawn_fetch(Arc::new(fetcher), policy, options, null_progress());
        let mut seen = Vec::new();
        while let Some(page) = rx.recv().await {
            seen.extend(page.iter().map(|r| r["n"].as_u64().unwrap()));
        }
        (seen, handle.await.unwrap())
    }

    #[tokio::test]
    async fn concurrent_waves_deliver_in_offset_order() {
        let (seen, summary) = run(MockFetcher::new(23, 5, true), policy(), FetchOptions::default()).await;
        let summary = summary.unwrap();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        assert_eq!(summary.total, Some(23));
        assert_eq!(summary.pages, 5);
        assert_eq!(summary.records, 23);
    }

    #[tokio::test]
    async fn sequential_paging_follows_has_more() {
        let (seen, summary) = run(MockFetcher::new(12, 5, false), policy(), FetchOptions::default()).await;
        let summary = summary.unwrap();
        assert_eq!(seen, (0..12).collect::<Vec<_>>());
        assert_eq!(summary.total, None);
        assert_eq!(summary.pages, 3);
    }

    #[tokio::test]
    async fn limit_caps_records_in_both_modes() {
        for report_total in [true, false] {
            let (seen, summary) = run(
                MockFetcher::new(50, 5, report_total),
                policy(),
                FetchOptions::with_limit(Some(12)),
            )
            .await;
            assert_eq!(seen, (0..12).collect::<Vec<_>>());
            assert_eq!(summary.unwrap().records, 12);
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let fetcher = MockFetcher::new(10, 5, true);
        fetcher.flaky.lock().unwrap().insert(5);
        let (seen, summary) = run(fetcher, policy(), FetchOptions::default()).await;
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        assert_eq!(summary.unwrap().failed_pages, 0);
    }

    #[tokio::test]
    async fn exhausted_page_aborts_by_default() {
        let mut fetcher = MockFetcher::new(10, 5, true);
        fetcher.failing.insert(5);
        let (_, summary) = run(fetcher, policy(), FetchOptions::default()).await;
        assert!(matches!(
            summary,
            Err(SourceError::PageFailed {
                offset: 5,
                attempts: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn tolerated_gap_is_tallied() {
        let mut fetcher = MockFetcher::new(15, 5, true);
        fetcher.failing.insert(5);
        let policy = FetchPolicy {
            on_page_failure: PageFailurePolicy::TolerateGap,
            ..policy()
        };
        let (seen, summary) = run(fetcher, policy, FetchOptions::default()).await;
        let summary = summary.unwrap();
        assert_eq!(summary.failed_pages, 1);
        assert_eq!(summary.records, 10);
        assert_eq!(seen, [0, 1, 2, 3, 4, 10, 11, 12, 13, 14]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_page() {
        let options = FetchOptions::default();
        options.cancel();
        let (seen, summary) = run(MockFetcher::new(10, 5, false), policy(), options).await;
        assert!(seen.is_empty());
        assert!(matches!(summary, Err(SourceError::Cancelled)));
    }

    #[tokio::test]
    async fn pauses_do_not_change_results() {
        let policy = FetchPolicy {
            pause_every_pages: Some(2),
            pause_ms: 1,
            ..policy()
        };
        let (seen, summary) = run(MockFetcher::new(20, 3, false), policy, FetchOptions::default()).await;
        assert_eq!(seen.len(), 20);
        assert_eq!(summary.unwrap().pages, 7);
    }
}

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parcel data sources and schema normalization.
//!
//! A [`source_def::SourceDefinition`] describes one provider dataset in
//! TOML: how to fetch it, which raw fields map to which canonical fields,
//! and which dialect its dates, areas and coordinates are in. Raw pages
//! are pulled through a [`fetch::PageFetcher`] and each record is turned
//! into a [`parcel_map_parcel_models::NormalizedParcel`] by a
//! [`normalize::Normalizer`].

pub mod arcgis;
pub mod crs;
pub mod fetch;
pub mod file;
pub mod land_use;
pub mod normalize;
pub mod parsing;
pub mod progress;
pub mod registry;
pub mod retry;
pub mod source_def;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Errors that can occur during data source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Numeric status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (file read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A source definition could not be parsed.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A source definition is structurally valid but unusable.
    #[error("Invalid source configuration: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },

    /// The provider answered with an unexpected payload.
    #[error("Unexpected response: {message}")]
    Protocol {
        /// Description of what went wrong.
        message: String,
    },

    /// A page could not be fetched after exhausting all attempts.
    #[error("Page at offset {offset} failed after {attempts} attempts: {message}")]
    PageFailed {
        /// Record offset of the page.
        offset: u64,
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        message: String,
    },

    /// The fetch was cancelled between pages.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl SourceError {
    /// Returns `true` if retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, HTTP 429, HTTP 5xx and truncated
    /// bodies are transient. Client errors and configuration problems are
    /// permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
            }
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            Self::Json(_) => true,
            Self::Io(_)
            | Self::Toml(_)
            | Self::Config { .. }
            | Self::Protocol { .. }
            | Self::PageFailed { .. }
            | Self::Cancelled => false,
        }
    }
}

/// Per-run options for fetching data from a source.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Maximum number of records to fetch.
    pub limit: Option<u64>,
    /// Set to `true` to stop the fetch at the next page boundary.
    pub cancel: Arc<AtomicBool>,
}

impl FetchOptions {
    /// Options that fetch at most `limit` records.
    #[must_use]
    pub fn with_limit(limit: Option<u64>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Requests cancellation of any fetch using these options.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = SourceError::Status {
            status: 503,
            url: "http://localhost".to_string(),
        };
        assert!(err.is_transient());
        let err = SourceError::Status {
            status: 429,
            url: "http://localhost".to_string(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        let err = SourceError::Status {
            status: 404,
            url: "http://localhost".to_string(),
        };
        assert!(!err.is_transient());
        assert!(!SourceError::Cancelled.is_transient());
    }

    #[test]
    fn cancel_flag_is_shared_between_clones() {
        let options = FetchOptions::with_limit(Some(10));
        let clone = options.clone();
        assert!(!clone.is_cancelled());
        options.cancel();
        assert!(clone.is_cancelled());
    }
}

//! Source fetchers: turn "give me N candidates" into bounded, resumable
//! queries against rate-limited external corpora, and download single
//! candidates to disk.
//!
//! Each source (arXiv paper sources, GitHub Pages repositories, IMSLP
//! score PDFs) implements the [`Fetcher`] trait. The date-window state
//! machine shared by windowed fetchers lives in [`window`].

pub mod arxiv;
pub mod github;
pub mod http;
pub mod imslp;
pub mod window;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{DownloadError, ScrapeError};

pub use arxiv::ArxivFetcher;
pub use github::GithubFetcher;
pub use imslp::ImslpFetcher;
pub use window::DateWindow;

/// One discoverable candidate artifact returned by a fetcher's search step.
#[derive(Debug, Clone)]
pub struct ScrapeResult {
    /// Where to download the actual data.
    pub download_url: String,

    /// Stable identifier, also used as a dedup and filesystem key.
    /// Must be filesystem-safe; two results sharing a name are treated
    /// as duplicates by identity.
    pub instance_name: String,

    /// Publication/creation timestamp, used for quota windowing.
    pub date: DateTime<Utc>,

    /// Open key/value bag: language, author id, page count, etc.
    pub additional_info: Map<String, Value>,
}

impl ScrapeResult {
    /// Replace characters that are unsafe in a single path component.
    pub fn sanitize_name(name: &str) -> String {
        name.chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c => c,
            })
            .collect()
    }
}

/// A source of candidate artifacts.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Return as close to `count` results as the remaining date range
    /// allows.
    ///
    /// Returns [`ScrapeError::Exhausted`] once the configured lower date
    /// boundary is passed without satisfying the request; any other
    /// error is a retryable condition for the orchestrator.
    async fn scrape(&mut self, count: usize) -> Result<Vec<ScrapeResult>, ScrapeError>;

    /// Materialize the artifact for `result` under `destination_path`.
    async fn download(
        &self,
        destination_path: &Path,
        result: &ScrapeResult,
    ) -> Result<(), DownloadError>;

    /// Signal from the orchestrator that the date-boundary filter
    /// rejected results from this fetcher: the internal window is
    /// producing stale data and needs to move.
    fn notify_window_stale(&mut self);
}

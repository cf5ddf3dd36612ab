//! Acceptance filters for each pipeline stage.
//!
//! Three filter families run at different points of the pipeline:
//! - [`FetchFilter`]: metadata-only decisions over a `ScrapeResult`,
//!   before any download happens.
//! - [`FileFilter`]: decisions over a downloaded artifact on disk.
//! - [`RenderingFilter`]: decisions over a produced image.
//!
//! Filters own private, mutex-guarded bookkeeping (dedup sets, per-date
//! quotas, seen perceptual hashes); the orchestrator never touches that
//! state directly.

pub mod fetch;
pub mod file;
pub mod rendering;
pub mod toxicity;

use std::path::Path;

use async_trait::async_trait;

use crate::error::FilterError;
use crate::fetch::ScrapeResult;

/// Auditing payload returned by file and rendering filters, merged into
/// the instance metadata keyed by filter name.
pub type FilterInfo = serde_json::Map<String, serde_json::Value>;

/// Metadata-only accept/reject decision over a scrape result.
pub trait FetchFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(true)` accepts, `Ok(false)` rejects; an error means the
    /// filter could not render a decision (e.g. required metadata is
    /// missing) and the candidate is skipped.
    fn filter(&self, result: &ScrapeResult) -> Result<bool, FilterError>;
}

/// Accept/reject decision over a downloaded artifact on disk.
#[async_trait]
pub trait FileFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// The returned info is recorded for auditability regardless of the
    /// accept/reject outcome.
    async fn filter(&self, path: &Path) -> Result<(bool, FilterInfo), FilterError>;
}

/// Accept/reject decision over a produced image.
pub trait RenderingFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn check_and_accept_image(&self, image_path: &Path)
        -> Result<(bool, FilterInfo), FilterError>;
}

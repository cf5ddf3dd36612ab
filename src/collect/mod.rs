//! The collection orchestrator: wires a fetcher, filter chains and a
//! compiler into one pipeline and drives the
//! scrape → filter → download → filter → compile → filter → persist
//! cycle until per-category quotas are satisfied.

pub mod persist;
pub mod progress;
pub mod run;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::compile::Compiler;
use crate::fetch::Fetcher;
use crate::filter::{FetchFilter, FileFilter, RenderingFilter};

pub use progress::CategoryProgress;
pub use run::run;

/// Everything needed to run the pipeline for one source.
pub struct Runner {
    /// Name of the runner; also the output subdirectory.
    pub name: String,

    /// Supplies candidates and downloads their payloads.
    pub fetcher: Box<dyn Fetcher>,

    /// Metadata-only filters, applied before any download.
    pub fetch_filters: Vec<Box<dyn FetchFilter>>,

    /// Filters over the downloaded artifact on disk.
    pub file_filters: Vec<Box<dyn FileFilter>>,

    /// Turns downloaded artifacts into rendered units.
    pub compiler: Box<dyn Compiler>,

    /// Filters over each produced image.
    pub rendering_filters: Vec<Box<dyn RenderingFilter>>,
}

/// Run-level configuration shared by all runners.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of permanent storage; the runner name is appended.
    pub destination_path: PathBuf,

    /// Temporary working directory, fully reset per candidate.
    pub tmp_path: PathBuf,

    /// Target accepted-instance count per category.
    pub num_instances: usize,

    /// Candidates requested from the fetcher per batch.
    pub batch_size: usize,

    /// Pause after a transient scrape failure before retrying.
    pub retry_delay: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            destination_path: PathBuf::from("./data"),
            tmp_path: PathBuf::from("./data/tmp"),
            num_instances: 100,
            batch_size: 50,
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub downloaded: usize,
    pub compiled: usize,
    pub collected: HashMap<String, usize>,
}

//! Compilers: turn a downloaded artifact into zero or more rendered
//! images plus extracted structure and text.

pub mod latex;
pub mod music;
pub mod render;
pub mod tex;
pub mod webpage;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CompilationError;
use crate::fetch::ScrapeResult;

pub use latex::LatexCompiler;
pub use music::MusicCompiler;
pub use webpage::WebpageCompiler;

/// Free-form details about a compilation, merged into instance metadata.
pub type CompilationInfo = serde_json::Map<String, serde_json::Value>;

/// One renderable unit produced from a downloaded artifact.
#[derive(Debug, Clone)]
pub struct CompilationResult {
    /// Rendered image; always refers to an existing file once returned.
    pub rendering_path: PathBuf,

    /// Classification bucket determining the output partition.
    pub category: String,

    /// Structured source backing the rendering (file or directory).
    pub data_path: Option<PathBuf>,

    /// Extracted plain text, when the source has a natural text form.
    pub text: Option<String>,

    /// Auxiliary files referenced by the rendering.
    pub assets_path: Vec<PathBuf>,
}

/// Cumulative per-category compilation counts, shared between the
/// orchestrator and the compiler.
///
/// The orchestrator acknowledges each persisted instance; compilers read
/// the counts to stop rendering a category once its overall target is
/// reached, so a handful of artifacts cannot dominate one category.
#[derive(Debug, Clone, Default)]
pub struct CompilerProgress {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl CompilerProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one persisted instance of `category`.
    pub fn acknowledge(&self, category: &str) {
        let mut counts = self.counts.lock().expect("progress lock poisoned");
        *counts.entry(category.to_string()).or_insert(0) += 1;
    }

    /// Instances acknowledged so far for `category`.
    pub fn count(&self, category: &str) -> usize {
        let counts = self.counts.lock().expect("progress lock poisoned");
        counts.get(category).copied().unwrap_or(0)
    }
}

/// Compiles a downloaded artifact into rendered units.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile the artifact at `data_path`, writing renderings and
    /// intermediate files under `destination_path`.
    ///
    /// Partial success (some sub-units render, others fail) surfaces as
    /// a non-empty result list with the failures omitted; an error means
    /// the artifact could not be processed at all.
    async fn compile(
        &self,
        data_path: &Path,
        destination_path: &Path,
        scrape_result: Option<&ScrapeResult>,
        progress: &CompilerProgress,
    ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError>;
}

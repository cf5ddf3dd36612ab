//! structforge: labeled image dataset collection.
//!
//! Repeatedly fetches candidate source artifacts from external corpora,
//! filters them at multiple stages, compiles them into rendered images
//! plus extracted structure/text, and persists accepted instances with
//! metadata until per-category quotas are met.

// Core modules
pub mod cli;
pub mod collect;
pub mod compile;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod util;

// Re-export commonly used error types
pub use error::{CollectError, CompilationError, DownloadError, FilterError, ScrapeError};

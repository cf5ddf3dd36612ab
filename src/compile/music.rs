//! Music-sheet compiler: rasterizes one page of a score PDF, verifies
//! it looks like sheet music, and splits it into one cropped image per
//! system using a row-wise ink-density profile.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use rand::RngExt;
use serde_json::Value;

use crate::compile::render::PdfRasterizer;
use crate::compile::{CompilationInfo, CompilationResult, Compiler, CompilerProgress};
use crate::error::CompilationError;
use crate::fetch::http;
use crate::fetch::ScrapeResult;
use crate::util::image::{non_white_bbox, row_ink_profile};

/// Pages must be at least this fraction white to be a printed score.
const WHITE_THRESHOLD: f32 = 0.5;

/// Rows with ink density below this are empty.
const EPSILON: f32 = 1e-6;

/// Minimum run of empty rows separating two segments, as a fraction of
/// the page height.
const SEGMENT_MIN_EMPTY_ROW_FRAC: f32 = 0.01;

/// Minimum segment height, as a fraction of the page height.
const SEGMENT_MIN_ROW_FRAC: f32 = 0.05;

/// Decides whether a rasterized page actually shows sheet music.
/// Treated as a black box; the production implementation calls a remote
/// image-classification service.
#[async_trait]
pub trait SheetClassifier: Send + Sync {
    async fn is_sheet_music(&self, image_path: &Path) -> Result<bool, CompilationError>;
}

/// HTTP classifier client: POSTs the PNG bytes and reads back
/// `{"is_sheet_music": bool}`.
pub struct HttpSheetClassifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSheetClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http::client(timeout),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SheetClassifier for HttpSheetClassifier {
    async fn is_sheet_music(&self, image_path: &Path) -> Result<bool, CompilationError> {
        let bytes = tokio::fs::read(image_path).await?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "image/png")
            .body(bytes)
            .send()
            .await
            .map_err(|e| CompilationError::RenderFailed(format!("classifier: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CompilationError::RenderFailed(format!(
                "classifier returned HTTP {status}"
            )));
        }
        let raw: Value = response
            .json()
            .await
            .map_err(|e| CompilationError::RenderFailed(format!("classifier: {e}")))?;
        raw.get("is_sheet_music")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                CompilationError::RenderFailed("classifier response missing verdict".to_string())
            })
    }
}

/// Compiles IMSLP score PDFs into per-system cropped images.
pub struct MusicCompiler {
    /// Also trim empty space left and right of each segment.
    crop_sides: bool,
    rasterizer: Box<dyn PdfRasterizer>,
    classifier: Box<dyn SheetClassifier>,
}

impl MusicCompiler {
    pub fn new(
        rasterizer: Box<dyn PdfRasterizer>,
        classifier: Box<dyn SheetClassifier>,
        crop_sides: bool,
    ) -> Self {
        Self {
            crop_sides,
            rasterizer,
            classifier,
        }
    }

    /// Select a page, preferring neither the first two pages (often a
    /// title) nor the last two (often blank).
    fn pick_page(total_num_pages: u32) -> u32 {
        match total_num_pages {
            0 | 1 => 1,
            2 | 3 => 2,
            4 => 3,
            n => rand::rng().random_range(3..=n - 2),
        }
    }

    /// Split a row ink profile into contiguous non-empty segments
    /// separated by at least `min_empty_rows` empty rows, discarding
    /// segments shorter than `min_rows`.
    fn segments(profile: &[f32], min_empty_rows: usize, min_rows: usize) -> Vec<(usize, usize)> {
        let mut segments = Vec::new();
        let mut count_empty_rows = 0usize;
        let mut start: Option<usize> = None;

        for (i, &ink) in profile.iter().enumerate().skip(1) {
            match start {
                Some(s) => {
                    if ink < EPSILON {
                        if i - s >= min_rows {
                            segments.push((s, i));
                        }
                        start = None;
                    }
                }
                None => {
                    if ink < EPSILON {
                        count_empty_rows += 1;
                    } else {
                        if count_empty_rows >= min_empty_rows {
                            start = Some(i);
                        }
                        count_empty_rows = 0;
                    }
                }
            }
        }
        if let Some(s) = start {
            if profile.len() - s >= min_rows {
                segments.push((s, profile.len()));
            }
        }

        segments
    }

    /// Reject pages that cannot be a printed score.
    fn check_page(rgba: &[u8]) -> Result<(), CompilationError> {
        let white = rgba
            .chunks_exact(4)
            .filter(|px| px[0] == 255 && px[1] == 255 && px[2] == 255)
            .count();
        let proportion = white as f32 / (rgba.len() / 4).max(1) as f32;
        if proportion < WHITE_THRESHOLD {
            return Err(CompilationError::UnusableImage(format!(
                "page contains too little white: {proportion:.2}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Compiler for MusicCompiler {
    async fn compile(
        &self,
        data_path: &Path,
        destination_path: &Path,
        scrape_result: Option<&ScrapeResult>,
        _progress: &CompilerProgress,
    ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError> {
        if !data_path.exists() {
            return Err(CompilationError::InputMissing(data_path.to_path_buf()));
        }
        let scrape_result = scrape_result.ok_or_else(|| {
            CompilationError::MissingMetadata("scrape result".to_string())
        })?;
        let total_num_pages = scrape_result
            .additional_info
            .get("page_count")
            .and_then(Value::as_u64)
            .ok_or_else(|| CompilationError::MissingMetadata("page_count".to_string()))?
            as u32;

        let page_number = Self::pick_page(total_num_pages);
        let mut info = CompilationInfo::new();
        info.insert("page_number".to_string(), Value::from(page_number));

        let page_path = destination_path.join(format!("{}_page.png", scrape_result.instance_name));
        self.rasterizer
            .rasterize(data_path, page_number, &page_path)
            .await?;

        let page = image::open(&page_path)
            .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
        let rgba = page.to_rgba8();
        Self::check_page(&rgba)?;

        if !self.classifier.is_sheet_music(&page_path).await? {
            return Err(CompilationError::UnusableImage(
                "page is not sheet music".to_string(),
            ));
        }

        let luma = page.to_luma8();
        let profile = row_ink_profile(luma.width(), luma.height(), &luma);
        let min_empty_rows = (SEGMENT_MIN_EMPTY_ROW_FRAC * profile.len() as f32) as usize;
        let min_rows = (SEGMENT_MIN_ROW_FRAC * profile.len() as f32) as usize;
        let mut segments = Self::segments(&profile, min_empty_rows, min_rows);
        if page_number == 1 && !segments.is_empty() {
            // The first segment of a first page is the title.
            segments.remove(0);
        }

        let mut results = Vec::new();
        for (i, (start, end)) in segments.iter().enumerate() {
            let mut cropped =
                page.crop_imm(0, *start as u32, page.width(), (end - start) as u32);
            if self.crop_sides {
                let segment_rgba = cropped.to_rgba8();
                if let Some((x0, y0, x1, y1)) =
                    non_white_bbox(segment_rgba.width(), segment_rgba.height(), &segment_rgba)
                {
                    cropped = cropped.crop_imm(x0, y0, x1 - x0, y1 - y0);
                }
            }

            let image_path =
                destination_path.join(format!("{}_{i}.png", scrape_result.instance_name));
            if let Err(e) = cropped.save(&image_path) {
                tracing::debug!(segment = i, error = %e, "failed to save segment");
                continue;
            }
            results.push(CompilationResult {
                rendering_path: image_path,
                category: "music".to_string(),
                data_path: None,
                text: None,
                assets_path: Vec::new(),
            });
        }

        let _ = std::fs::remove_file(&page_path);
        Ok((results, info))
    }
}

//! LaTeX compiler: extracts delimited environments from paper sources
//! and renders each as a standalone cropped image.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::compile::render::TexRenderer;
use crate::compile::tex::{
    asset_references, delimited_spans, AssetRenamer, TexCategory, TEX_BEGIN, TEX_CATEGORIES,
    TEX_END,
};
use crate::compile::{CompilationInfo, CompilationResult, Compiler, CompilerProgress};
use crate::error::CompilationError;
use crate::fetch::ScrapeResult;
use crate::util::image::white_pixel_percentage;

/// Compiles arXiv paper sources into per-category rendered sub-units.
pub struct LatexCompiler {
    categories: Vec<String>,
    /// Cap on sub-units of one category taken from a single source, so
    /// one paper cannot dominate a category.
    max_per_source: usize,
    /// Overall per-category target, consulted through the shared
    /// progress value.
    target_per_category: usize,
    renderer: Box<dyn TexRenderer>,
    renamer: AssetRenamer,
}

impl LatexCompiler {
    pub fn new(
        renderer: Box<dyn TexRenderer>,
        categories: Vec<String>,
        max_per_source: usize,
        target_per_category: usize,
    ) -> Self {
        Self {
            categories,
            max_per_source,
            target_per_category,
            renderer,
            renamer: AssetRenamer::new(),
        }
    }

    /// All categories the compiler extracts by default.
    pub fn default_categories() -> Vec<String> {
        TEX_CATEGORIES.iter().map(|c| c.name.to_string()).collect()
    }

    /// Read every `.tex` file under `src_dir`, rewriting asset
    /// references into `work_dir`. Files that are not valid UTF-8 are
    /// skipped.
    fn collect_sources(&self, src_dir: &Path, work_dir: &Path) -> Vec<String> {
        WalkDir::new(src_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| {
                e.file_type().is_file()
                    && e.path().extension().is_some_and(|ext| ext == "tex")
            })
            .filter_map(|e| std::fs::read_to_string(e.path()).ok())
            .map(|code| self.renamer.rename_and_copy(&code, src_dir, work_dir))
            .collect()
    }

    /// Render one span; `Ok(None)` means the span was skipped (blank
    /// render or missing asset), which is not a failure.
    async fn render_span(
        &self,
        span: &str,
        category: &str,
        index: usize,
        work_dir: &Path,
        destination_path: &Path,
    ) -> Result<Option<CompilationResult>, CompilationError> {
        let image_dir = destination_path.join("images").join(category);
        let structure_dir = destination_path.join("structures").join(category);
        let asset_dir = destination_path.join("assets");
        std::fs::create_dir_all(&image_dir)?;
        std::fs::create_dir_all(&structure_dir)?;
        std::fs::create_dir_all(&asset_dir)?;

        let image_path = image_dir.join(format!("{index}.png"));
        let document = format!("{TEX_BEGIN}{span}{TEX_END}");
        self.renderer
            .render(&document, work_dir, &image_path)
            .await?;

        // A uniformly blank render carries no information; drop it
        // without counting.
        let rendered = image::open(&image_path)
            .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
        let rgba = rendered.to_rgba8();
        let (width, height) = rgba.dimensions();
        if white_pixel_percentage(width, height, &rgba) >= 100.0 {
            let _ = std::fs::remove_file(&image_path);
            tracing::debug!(category, "render is fully white, skipping");
            return Ok(None);
        }

        // The span references renamed (flattened) assets living in the
        // work directory; all of them must be present to keep the span.
        let mut assets_path: Vec<PathBuf> = Vec::new();
        for asset_name in asset_references(span) {
            let from = work_dir.join(&asset_name);
            let to = asset_dir.join(asset_name.replace('/', "_"));
            if std::fs::copy(&from, &to).is_err() {
                tracing::debug!(asset = %asset_name, "asset missing at render time, skipping span");
                let _ = std::fs::remove_file(&image_path);
                return Ok(None);
            }
            assets_path.push(to);
        }

        let code_path = structure_dir.join(format!("{index}.tex"));
        std::fs::write(&code_path, span)?;

        Ok(Some(CompilationResult {
            rendering_path: image_path,
            category: category.to_string(),
            data_path: Some(code_path),
            text: None,
            assets_path,
        }))
    }

    fn active_categories(&self, progress: &CompilerProgress) -> Vec<&'static TexCategory> {
        TEX_CATEGORIES
            .iter()
            .filter(|c| self.categories.iter().any(|name| name == c.name))
            .filter(|c| progress.count(c.name) < self.target_per_category)
            .collect()
    }
}

#[async_trait]
impl Compiler for LatexCompiler {
    async fn compile(
        &self,
        data_path: &Path,
        destination_path: &Path,
        _scrape_result: Option<&ScrapeResult>,
        progress: &CompilerProgress,
    ) -> Result<(Vec<CompilationResult>, CompilationInfo), CompilationError> {
        if !data_path.is_dir() {
            return Err(CompilationError::NotADirectory(data_path.to_path_buf()));
        }

        let work_dir = destination_path.join("work");
        std::fs::create_dir_all(&work_dir)?;

        let sources = self.collect_sources(data_path, &work_dir);

        let mut compilations = Vec::new();
        let mut num_done = CompilationInfo::new();

        for category in self.active_categories(progress) {
            let mut spans: Vec<String> = sources
                .iter()
                .flat_map(|source| delimited_spans(source, category))
                .collect();
            spans.shuffle(&mut rand::rng());

            let remaining = self
                .target_per_category
                .saturating_sub(progress.count(category.name));
            let max_images = remaining.min(self.max_per_source);
            let mut rendered = 0usize;

            for span in &spans {
                if rendered >= max_images {
                    break;
                }
                match self
                    .render_span(span, category.name, rendered, &work_dir, destination_path)
                    .await
                {
                    Ok(Some(result)) => {
                        compilations.push(result);
                        rendered += 1;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!(category = category.name, error = %e, "span failed to render");
                    }
                }
            }

            if rendered > 0 {
                num_done.insert(category.name.to_string(), Value::from(rendered));
            }
        }

        let mut info = CompilationInfo::new();
        if !num_done.is_empty() {
            info.insert("num_done".to_string(), json!(num_done));
        }
        Ok((compilations, info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Renderer that draws a deterministic non-white image per call.
    struct FakeRenderer {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TexRenderer for FakeRenderer {
        async fn render(
            &self,
            _tex_source: &str,
            _assets_dir: &Path,
            output_png: &Path,
        ) -> Result<(), CompilationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            let img = image::RgbImage::from_fn(32, 32, |x, y| {
                image::Rgb([((x * 7 + y * 3 + n * 11) % 255) as u8, 128, 64])
            });
            img.save(output_png)
                .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
            Ok(())
        }
    }

    /// Renderer that always produces a fully white image.
    struct WhiteRenderer;

    #[async_trait]
    impl TexRenderer for WhiteRenderer {
        async fn render(
            &self,
            _tex_source: &str,
            _assets_dir: &Path,
            output_png: &Path,
        ) -> Result<(), CompilationError> {
            image::RgbImage::from_pixel(32, 32, image::Rgb([255, 255, 255]))
                .save(output_png)
                .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
            Ok(())
        }
    }

    fn paper_with_equations(count: usize) -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut source = String::new();
        for i in 0..count {
            source.push_str(&format!(
                "\\begin{{equation}}\nx_{i} = {i}\n\\end{{equation}}\n"
            ));
        }
        std::fs::write(dir.path().join("paper.tex"), source).unwrap();
        dir
    }

    fn compiler(renderer: Box<dyn TexRenderer>, max_per_source: usize, target: usize) -> LatexCompiler {
        LatexCompiler::new(
            renderer,
            LatexCompiler::default_categories(),
            max_per_source,
            target,
        )
    }

    #[tokio::test]
    async fn compiles_equations_up_to_per_source_cap() {
        let paper = paper_with_equations(5);
        let dest = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = compiler(Box::new(FakeRenderer { calls }), 3, 100);

        let (results, info) = compiler
            .compile(paper.path(), dest.path(), None, &CompilerProgress::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.category == "equation"));
        assert!(results.iter().all(|r| r.rendering_path.exists()));
        assert!(results.iter().all(|r| r
            .data_path
            .as_ref()
            .is_some_and(|p| p.exists())));
        assert_eq!(info["num_done"]["equation"], 3);
    }

    #[tokio::test]
    async fn respects_global_category_target() {
        let paper = paper_with_equations(5);
        let dest = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = compiler(Box::new(FakeRenderer { calls }), 10, 4);

        let progress = CompilerProgress::new();
        progress.acknowledge("equation");
        progress.acknowledge("equation");
        progress.acknowledge("equation");

        let (results, _) = compiler
            .compile(paper.path(), dest.path(), None, &progress)
            .await
            .unwrap();
        // Only one slot left before the target of 4.
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn category_at_target_is_not_extracted() {
        let paper = paper_with_equations(2);
        let dest = TempDir::new().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = compiler(Box::new(FakeRenderer { calls: calls.clone() }), 10, 1);

        let progress = CompilerProgress::new();
        progress.acknowledge("equation");

        let (results, _) = compiler
            .compile(paper.path(), dest.path(), None, &progress)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn white_renders_are_discarded_without_counting() {
        let paper = paper_with_equations(3);
        let dest = TempDir::new().unwrap();
        let compiler = compiler(Box::new(WhiteRenderer), 10, 100);

        let (results, info) = compiler
            .compile(paper.path(), dest.path(), None, &CompilerProgress::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(!info.contains_key("num_done"));
    }

    #[tokio::test]
    async fn non_directory_input_is_an_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not_a_dir.tex");
        std::fs::write(&file, "x").unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let compiler = compiler(Box::new(FakeRenderer { calls }), 3, 100);

        let err = compiler
            .compile(&file, dir.path(), None, &CompilerProgress::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::NotADirectory(_)));
    }
}

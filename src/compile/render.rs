//! Subprocess rendering backends: TeX-to-image and PDF rasterization.
//!
//! These are the replaceable leaf integrations behind the compilers.
//! Both shell out to external tools (`pdflatex`, `pdftoppm`) with a
//! caller-supplied timeout; a timeout kills the child and surfaces as a
//! `CompilationError` for the current candidate only.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CompilationError;
use crate::util::image::non_white_bbox;

/// Renders a standalone TeX document to a PNG image.
#[async_trait]
pub trait TexRenderer: Send + Sync {
    /// Render `tex_source` to `output_png`. Asset references in the
    /// source are resolved against `assets_dir`.
    async fn render(
        &self,
        tex_source: &str,
        assets_dir: &Path,
        output_png: &Path,
    ) -> Result<(), CompilationError>;
}

/// Rasterizes one page of a PDF file to a PNG image.
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Rasterize `page_number` (1-based) of `pdf_path` to `output_png`.
    async fn rasterize(
        &self,
        pdf_path: &Path,
        page_number: u32,
        output_png: &Path,
    ) -> Result<(), CompilationError>;
}

/// Run `command`, bounded by `timeout`. The child is killed on timeout.
async fn run_bounded(
    mut command: tokio::process::Command,
    timeout: Duration,
    what: &str,
) -> Result<(), CompilationError> {
    let mut child = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CompilationError::RenderFailed(format!("{what}: {e}")))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(CompilationError::RenderFailed(format!(
            "{what} exited with {status}"
        ))),
        Ok(Err(e)) => Err(CompilationError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(CompilationError::Timeout {
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// `pdflatex` + `pdftoppm` renderer.
pub struct PdfLatexRenderer {
    timeout: Duration,
    /// Trim the white border around the rendered content.
    crop: bool,
    /// Rasterization resolution in DPI.
    resolution: u32,
}

impl PdfLatexRenderer {
    pub fn new(timeout: Duration, crop: bool) -> Self {
        Self {
            timeout,
            crop,
            resolution: 150,
        }
    }

    /// Crop `png_path` in place to the bounding box of its non-white
    /// pixels.
    fn trim_white_border(png_path: &Path) -> Result<(), CompilationError> {
        let img = image::open(png_path)
            .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let Some((x0, y0, x1, y1)) = non_white_bbox(width, height, &rgba) else {
            // Fully white; the compiler discards these separately.
            return Ok(());
        };
        let cropped = img.crop_imm(x0, y0, x1 - x0, y1 - y0);
        cropped
            .save(png_path)
            .map_err(|e| CompilationError::RenderFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TexRenderer for PdfLatexRenderer {
    async fn render(
        &self,
        tex_source: &str,
        assets_dir: &Path,
        output_png: &Path,
    ) -> Result<(), CompilationError> {
        let work = tempfile::tempdir()?;
        let tex_path = work.path().join("unit.tex");
        tokio::fs::write(&tex_path, tex_source).await?;

        // TEXINPUTS with a trailing separator keeps the default search
        // path while resolving renamed assets from the work directory.
        let mut latex = tokio::process::Command::new("pdflatex");
        latex
            .arg("-interaction=nonstopmode")
            .arg("-halt-on-error")
            .arg("unit.tex")
            .current_dir(work.path())
            .env("TEXINPUTS", format!("{}:", assets_dir.display()));
        run_bounded(latex, self.timeout, "pdflatex").await?;

        let pdf_path = work.path().join("unit.pdf");
        if !pdf_path.exists() {
            return Err(CompilationError::RenderFailed(
                "pdflatex produced no output".to_string(),
            ));
        }

        let out_stem = work.path().join("unit");
        let mut pdftoppm = tokio::process::Command::new("pdftoppm");
        pdftoppm
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(self.resolution.to_string())
            .arg(&pdf_path)
            .arg(&out_stem);
        run_bounded(pdftoppm, self.timeout, "pdftoppm").await?;

        let rendered = work.path().join("unit.png");
        tokio::fs::copy(&rendered, output_png).await?;

        if self.crop {
            Self::trim_white_border(output_png)?;
        }
        Ok(())
    }
}

/// `pdftoppm` page rasterizer.
pub struct PdftoppmRasterizer {
    timeout: Duration,
    resolution: u32,
}

impl PdftoppmRasterizer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            resolution: 150,
        }
    }
}

#[async_trait]
impl PdfRasterizer for PdftoppmRasterizer {
    async fn rasterize(
        &self,
        pdf_path: &Path,
        page_number: u32,
        output_png: &Path,
    ) -> Result<(), CompilationError> {
        if !pdf_path.exists() {
            return Err(CompilationError::InputMissing(pdf_path.to_path_buf()));
        }
        let work = tempfile::tempdir()?;
        let out_stem = work.path().join("page");

        let mut command = tokio::process::Command::new("pdftoppm");
        command
            .arg("-png")
            .arg("-singlefile")
            .arg("-f")
            .arg(page_number.to_string())
            .arg("-l")
            .arg(page_number.to_string())
            .arg("-r")
            .arg(self.resolution.to_string())
            .arg(pdf_path)
            .arg(&out_stem);
        run_bounded(command, self.timeout, "pdftoppm").await?;

        let rendered = work.path().join("page.png");
        if !rendered.exists() {
            return Err(CompilationError::RenderFailed(format!(
                "page {page_number} of {} produced no image",
                pdf_path.display()
            )));
        }
        tokio::fs::copy(&rendered, output_png).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn rasterize_missing_pdf_is_input_missing() {
        let dir = TempDir::new().unwrap();
        let rasterizer = PdftoppmRasterizer::new(Duration::from_secs(5));
        let err = rasterizer
            .rasterize(
                &dir.path().join("missing.pdf"),
                1,
                &dir.path().join("out.png"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CompilationError::InputMissing(_)));
    }

    #[test]
    fn trim_white_border_crops_to_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bordered.png");
        let mut img = image::RgbImage::from_pixel(50, 50, image::Rgb([255, 255, 255]));
        for x in 10..20 {
            for y in 15..25 {
                img.put_pixel(x, y, image::Rgb([0, 0, 0]));
            }
        }
        img.save(&path).unwrap();

        PdfLatexRenderer::trim_white_border(&path).unwrap();
        let cropped = image::open(&path).unwrap();
        assert_eq!(cropped.width(), 10);
        assert_eq!(cropped.height(), 10);
    }

    #[test]
    fn trim_white_border_keeps_fully_white_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("white.png");
        image::RgbImage::from_pixel(20, 20, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        PdfLatexRenderer::trim_white_border(&path).unwrap();
        let img = image::open(&path).unwrap();
        assert_eq!(img.width(), 20);
    }
}
